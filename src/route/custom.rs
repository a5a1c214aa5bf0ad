//! Hand-authored routes stored as JSON.
//!
//! ```json
//! {
//!   "name": "campus loop",
//!   "points": [
//!     { "location": { "latitude": 51.5, "longitude": -0.12 }, "name": "Gate" },
//!     { "location": { "latitude": 51.5003, "longitude": -0.12 }, "is_step": true,
//!       "instruction": "Turn right" },
//!     { "location": { "latitude": 51.5003, "longitude": -0.1195 }, "name": "Library" }
//!   ]
//! }
//! ```

use super::{LoadedRoute, RouteStep};
use crate::error::{NavError, NavResult};
use crate::types::GeoPoint;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomRoutePoint {
    pub location: GeoPoint,
    /// Whether a maneuver happens here; first and last points always count
    #[serde(default)]
    pub is_step: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub instruction: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomRoute {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub points: Vec<CustomRoutePoint>,
}

impl CustomRoute {
    pub fn load(path: &Path) -> NavResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> NavResult<Self> {
        let mut route: CustomRoute = serde_json::from_str(text)?;
        route.normalize();
        if route.points.len() < 2 {
            return Err(NavError::Parse(format!(
                "custom route '{}' needs at least two points, found {}",
                route.name,
                route.points.len()
            )));
        }
        Ok(route)
    }

    /// Mark the end points as steps.
    pub fn normalize(&mut self) {
        if let Some(first) = self.points.first_mut() {
            first.is_step = true;
        }
        if let Some(last) = self.points.last_mut() {
            last.is_step = true;
        }
    }

    /// Start and end of the route, empty if there are fewer than two points
    pub fn waypoints(&self) -> Vec<(String, GeoPoint)> {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) if self.points.len() >= 2 => vec![
                (first.name.clone(), first.location),
                (last.name.clone(), last.location),
            ],
            _ => Vec::new(),
        }
    }

    pub fn to_route(&self) -> LoadedRoute {
        let geometry: Vec<GeoPoint> = self.points.iter().map(|p| p.location).collect();
        let last = self.points.len().saturating_sub(1);

        let steps = self
            .points
            .iter()
            .enumerate()
            .filter(|(i, p)| p.is_step || *i == 0 || *i == last)
            .map(|(_, p)| RouteStep {
                location: p.location,
                instruction: p.instruction.clone(),
                name: p.name.clone(),
                ..Default::default()
            })
            .collect();

        LoadedRoute {
            name: self.name.clone(),
            steps,
            distance: polyline_length(&geometry),
            geometry,
        }
    }
}

fn polyline_length(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| crate::geo_math::horizontal_distance(&w[0], &w[1]))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const ROUTE: &str = r#"{
        "name": "loop",
        "points": [
            { "location": { "latitude": 51.5, "longitude": -0.12 }, "name": "Gate" },
            { "location": { "latitude": 51.5009, "longitude": -0.12 } },
            { "location": { "latitude": 51.5009, "longitude": -0.1186 }, "is_step": true, "instruction": "Turn right" },
            { "location": { "latitude": 51.5018, "longitude": -0.1186 }, "name": "Library" }
        ]
    }"#;

    #[test]
    fn test_end_points_are_steps() {
        let route = CustomRoute::from_json(ROUTE).unwrap();
        let loaded = route.to_route();

        assert_eq!(loaded.steps.len(), 3);
        assert_eq!(loaded.steps[0].name, "Gate");
        assert_eq!(loaded.steps[1].instruction, "Turn right");
        assert_eq!(loaded.steps[2].name, "Library");
        assert_eq!(loaded.geometry.len(), 4);
        assert!(loaded.distance > 280.0 && loaded.distance < 320.0, "distance = {}", loaded.distance);
    }

    #[test]
    fn test_waypoints() {
        let route = CustomRoute::from_json(ROUTE).unwrap();
        let w = route.waypoints();
        assert_eq!(w.len(), 2);
        assert_eq!(w[1].0, "Library");
        assert_relative_eq!(w[1].1.latitude, 51.5018);
    }

    #[test]
    fn test_single_point_rejected() {
        let json = r#"{ "points": [ { "location": { "latitude": 1.0, "longitude": 2.0 } } ] }"#;
        assert!(matches!(CustomRoute::from_json(json), Err(NavError::Parse(_))));
        assert!(CustomRoute::default().waypoints().is_empty());
    }
}
