//! Mapbox geocoding and walking-directions client.

use super::loader::RoutingService;
use super::{LoadedRoute, RouteStep};
use crate::config::RouteOptions;
use crate::error::{NavError, NavResult};
use crate::types::GeoPoint;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ===== Wire format =====

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Vec<f64> },
    LineString { coordinates: Vec<Vec<f64>> },
}

impl Geometry {
    /// Coordinates as points; GeoJSON order is [lon, lat]
    pub fn points(&self) -> Vec<GeoPoint> {
        match self {
            Geometry::Point { coordinates } => lon_lat(coordinates).into_iter().collect(),
            Geometry::LineString { coordinates } => coordinates.iter().filter_map(|c| lon_lat(c)).collect(),
        }
    }
}

fn lon_lat(c: &[f64]) -> Option<GeoPoint> {
    match c {
        [lon, lat, ..] => Some(GeoPoint::flat(*lat, *lon)),
        _ => None,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Maneuver {
    #[serde(default)]
    pub bearing_before: f64,
    #[serde(default)]
    pub bearing_after: f64,
    #[serde(default)]
    pub instruction: String,
    /// [lon, lat]
    pub location: Vec<f64>,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    pub maneuver: Maneuver,
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteLeg {
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub legs: Vec<RouteLeg>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    #[serde(default)]
    pub name: String,
    pub location: Vec<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub waypoints: Vec<Waypoint>,
}

impl RouteResponse {
    pub fn parse(body: &str) -> NavResult<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// First leg of the first route, as navigation steps.
    pub fn into_route(self) -> NavResult<LoadedRoute> {
        if self.code != "Ok" {
            let message = self.message.unwrap_or(self.code);
            return Err(NavError::RouteQuery(message));
        }

        let route = self
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| NavError::RouteQuery("No route returned".to_string()))?;
        let geometry = route.geometry.as_ref().map(Geometry::points).unwrap_or_default();
        let leg = route
            .legs
            .into_iter()
            .next()
            .ok_or_else(|| NavError::RouteQuery("Route has no legs".to_string()))?;

        let steps = leg
            .steps
            .into_iter()
            .filter_map(|s| {
                let location = lon_lat(&s.maneuver.location)?;
                Some(RouteStep {
                    location,
                    instruction: s.maneuver.instruction,
                    name: s.name,
                    distance: s.distance,
                    maneuver_type: s.maneuver.kind,
                    bearing_before: s.maneuver.bearing_before,
                    bearing_after: s.maneuver.bearing_after,
                })
            })
            .collect();

        Ok(LoadedRoute {
            name: String::new(),
            steps,
            distance: leg.distance,
            geometry,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeocodingFeature {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub place_name: String,
    #[serde(default)]
    pub relevance: f64,
    #[serde(default)]
    pub center: Option<Vec<f64>>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GeocodingResponse {
    #[serde(default)]
    pub features: Vec<GeocodingFeature>,
}

impl GeocodingResponse {
    pub fn parse(body: &str) -> NavResult<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// Location of the best match
    pub fn first_location(&self) -> Option<GeoPoint> {
        let feature = self.features.first()?;
        feature
            .geometry
            .as_ref()
            .and_then(|g| g.points().into_iter().next())
            .or_else(|| feature.center.as_deref().and_then(lon_lat))
    }
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

// ===== Client =====

pub struct MapboxClient {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl MapboxClient {
    pub fn new(options: &RouteOptions) -> Self {
        if options.mapbox_token.is_empty() {
            log::warn!("[mapbox] no access token configured; requests will be rejected");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.request_timeout_secs))
            .user_agent(concat!("geo_anchor/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        MapboxClient {
            client,
            api_base: options.api_base.trim_end_matches('/').to_string(),
            token: options.mapbox_token.clone(),
        }
    }

    fn url(&self, segments: &[&str]) -> NavResult<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.api_base).map_err(|e| NavError::Config(format!("api_base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| NavError::Config(format!("api_base cannot take a path: {}", self.api_base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, url: reqwest::Url, query: &[(&str, &str)]) -> NavResult<String> {
        log::debug!("[mapbox] GET {}", url.path());
        let response = self.client.get(url).query(query).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ApiMessage>(&body)
                .map(|m| m.message)
                .unwrap_or_else(|_| format!("status {}", status.as_u16()));
            return Err(NavError::Http(message));
        }
        Ok(body)
    }
}

impl RoutingService for MapboxClient {
    async fn geocode(&self, query: &str) -> NavResult<GeoPoint> {
        let segment = format!("{}.json", query);
        let url = self.url(&["geocoding", "v5", "mapbox.places", segment.as_str()])?;
        let body = self
            .get(url, &[("access_token", self.token.as_str())])
            .await
            .map_err(|e| NavError::WaypointResolution(e.to_string()))?;

        GeocodingResponse::parse(&body)?
            .first_location()
            .ok_or_else(|| NavError::WaypointResolution(format!("No results for '{}'", query)))
    }

    async fn directions(&self, from: &GeoPoint, to: &GeoPoint) -> NavResult<LoadedRoute> {
        let coords = format!(
            "{},{};{},{}",
            from.longitude, from.latitude, to.longitude, to.latitude
        );
        let url = self.url(&["directions", "v5", "mapbox", "walking", coords.as_str()])?;
        let body = self
            .get(
                url,
                &[
                    ("alternatives", "false"),
                    ("geometries", "geojson"),
                    ("steps", "true"),
                    ("access_token", self.token.as_str()),
                ],
            )
            .await
            .map_err(|e| NavError::RouteQuery(e.to_string()))?;

        RouteResponse::parse(&body)?.into_route()
    }
}
