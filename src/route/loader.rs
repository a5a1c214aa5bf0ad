//! Waypoint resolution and route queries.

use super::custom::CustomRoute;
use super::LoadedRoute;
use crate::error::{NavError, NavResult};
use crate::types::GeoPoint;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::str::FromStr;

/// One end of a route query
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RouteWaypoint {
    /// The device's current location
    UserLocation,
    Location { location: GeoPoint },
    /// Free-text address or place name, geocoded before the query
    Query { query: String },
}

impl FromStr for RouteWaypoint {
    type Err = Infallible;

    /// `user`, `lat,lon`, or anything else as a place query.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("user") {
            return Ok(RouteWaypoint::UserLocation);
        }

        let coords: Vec<f64> = s.split(',').filter_map(|c| c.trim().parse().ok()).collect();
        match coords.as_slice() {
            [lat, lon] if s.matches(',').count() == 1 && lat.abs() <= 90.0 && lon.abs() <= 180.0 => {
                Ok(RouteWaypoint::Location {
                    location: GeoPoint::flat(*lat, *lon),
                })
            }
            _ => Ok(RouteWaypoint::Query { query: s.to_string() }),
        }
    }
}

/// Remote geocoding and directions
pub trait RoutingService {
    fn geocode(&self, query: &str) -> impl Future<Output = NavResult<GeoPoint>>;

    fn directions(&self, from: &GeoPoint, to: &GeoPoint) -> impl Future<Output = NavResult<LoadedRoute>>;
}

/// Where the current route came from; kept so it can be reloaded
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RouteSettings {
    Mapbox { from: RouteWaypoint, to: RouteWaypoint },
    Custom(CustomRoute),
}

pub struct RouteLoader<S> {
    service: S,
}

impl<S: RoutingService> RouteLoader<S> {
    pub fn new(service: S) -> Self {
        RouteLoader { service }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Turn a waypoint into a location.
    ///
    /// # Arguments
    /// * `user` - current device location, if the provider has one
    pub async fn resolve(&self, waypoint: &RouteWaypoint, user: Option<GeoPoint>) -> NavResult<GeoPoint> {
        match waypoint {
            RouteWaypoint::UserLocation => user.ok_or_else(|| {
                NavError::WaypointResolution("Current location is not available yet".to_string())
            }),
            RouteWaypoint::Location { location } => Ok(*location),
            RouteWaypoint::Query { query } => {
                let location = self.service.geocode(query).await?;
                log::debug!(
                    "[route] '{}' resolved to ({:.6}, {:.6})",
                    query,
                    location.latitude,
                    location.longitude
                );
                Ok(location)
            }
        }
    }

    pub async fn load(&self, from: &RouteWaypoint, to: &RouteWaypoint, user: Option<GeoPoint>) -> NavResult<LoadedRoute> {
        let start = self.resolve(from, user).await?;
        let end = self.resolve(to, user).await?;

        let route = self.service.directions(&start, &end).await?;
        if route.steps.is_empty() {
            return Err(NavError::RouteQuery("Route has no steps".to_string()));
        }
        log::info!(
            "[route] loaded {} steps, {:.0} m",
            route.steps.len(),
            route.distance
        );
        Ok(route)
    }

    pub async fn load_settings(&self, settings: &RouteSettings, user: Option<GeoPoint>) -> NavResult<LoadedRoute> {
        match settings {
            RouteSettings::Mapbox { from, to } => self.load(from, to, user).await,
            RouteSettings::Custom(route) => Ok(route.to_route()),
        }
    }
}
