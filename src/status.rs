use crate::provider::ProviderStatus;
use crate::route::MachineState;
use crate::session::Session;
use crate::types::GeoPoint;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Snapshot of a running session, written as JSON for dashboards and scripts
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NavigationStatus {
    pub timestamp: f64,
    pub provider_status: ProviderStatus,
    pub provider_enabled: bool,
    pub location_updates: u32,
    // Device
    pub location: Option<GeoPoint>,
    pub accuracy: f64,
    pub heading: f64,
    pub distance_from_start: f64,
    // Calibration
    pub root_yaw_deg: f64,
    pub orientation_settled: bool,
    pub orientation_updates: u32,
    pub ground_y: f64,
    // Route
    pub route_steps: usize,
    pub route_distance: f64,
    pub current_target: Option<usize>,
    pub target_instruction: Option<String>,
    pub distance_to_target: Option<f64>,
    pub signposts: Vec<Option<MachineState>>,
    pub load_route_error: Option<String>,
}

impl NavigationStatus {
    pub fn capture(session: &Session) -> Self {
        let provider = session.provider().borrow();
        let calibrator = session.calibrator().borrow();
        let route = session.route();
        let enabled = provider.is_enabled();
        let current = provider.current_location();

        Self {
            timestamp: current_timestamp(),
            provider_status: provider.status(),
            provider_enabled: enabled,
            location_updates: provider.location_update_count(),
            location: enabled.then_some(current.position),
            accuracy: current.accuracy,
            heading: provider.current_heading().heading,
            distance_from_start: provider.distance_from_start_point(),
            root_yaw_deg: session.frame().borrow().root_yaw_deg,
            orientation_settled: calibrator.is_settled(),
            orientation_updates: calibrator.state().update_count,
            ground_y: session.ground_y(),
            route_steps: route.number_of_steps(),
            route_distance: route.route_distance(),
            current_target: route.current_target_index(),
            target_instruction: route.current_step().map(|s| s.instruction.clone()),
            distance_to_target: route.distance_to_target(),
            signposts: route.signpost_states(),
            load_route_error: route.load_route_error().map(str::to_string),
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub fn current_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NavConfig;
    use crate::provider::MockSource;
    use crate::route::CustomRoute;
    use crate::types::{HeadingReading, LocationReading};

    #[test]
    fn test_capture_and_save() {
        let (source, feed) = MockSource::new();
        let mut session = Session::new(Box::new(source), NavConfig::default());
        session.start_now();
        feed.push_heading(HeadingReading::new(45.0, 1));
        feed.push_location(LocationReading::new(GeoPoint::flat(51.5, -0.12), 4.0, 1));
        session.tick(0.1);

        let route = CustomRoute::from_json(
            r#"{ "points": [
                { "location": { "latitude": 51.5, "longitude": -0.12 }, "instruction": "Start" },
                { "location": { "latitude": 51.5005, "longitude": -0.12 }, "instruction": "Arrive" }
            ] }"#,
        )
        .unwrap();
        assert!(session.route_mut().load_custom_route(route));

        let status = NavigationStatus::capture(&session);
        assert!(status.provider_enabled);
        assert_eq!(status.provider_status, ProviderStatus::Started);
        assert_eq!(status.route_steps, 2);
        assert_eq!(status.current_target, Some(0));
        assert_eq!(status.target_instruction.as_deref(), Some("Start"));
        assert_eq!(status.signposts.len(), 2);

        let path = std::env::temp_dir().join("geo_anchor_status_test.json");
        status.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let back: NavigationStatus = serde_json::from_str(&text).unwrap();
        assert_eq!(back.route_steps, 2);
        let _ = std::fs::remove_file(&path);
    }
}
