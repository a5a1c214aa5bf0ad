//! Tunable options for every component, loadable from a JSON file.
//!
//! Every field has a serde default so partial files are accepted. Call
//! [`NavConfig::validate`] after loading; inconsistent thresholds are clamped
//! rather than rejected.

use crate::error::{NavError, NavResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

mod defaults {
    pub fn time_between_updates() -> f64 {
        2.0
    }
    pub fn accuracy_radius() -> f64 {
        25.0
    }
    pub fn max_wait_time() -> u32 {
        200
    }

    pub fn orientation_max_updates() -> u32 {
        4
    }
    pub fn average_count() -> usize {
        150
    }
    pub fn yes() -> bool {
        true
    }
    pub fn movement_smoothing_factor() -> f64 {
        0.015
    }
    pub fn low_pass_filter_factor() -> f64 {
        0.9
    }

    pub fn initial_ground_height_guess() -> f64 {
        1.4
    }
    pub fn min_ground_height() -> f64 {
        0.4
    }
    pub fn max_ground_height() -> f64 {
        3.0
    }
    pub fn ground_smoothing() -> f64 {
        0.05
    }
    pub fn ground_precision() -> f64 {
        0.005
    }

    pub fn movement_smoothing() -> f64 {
        0.05
    }
    pub fn max_location_updates() -> u32 {
        4
    }
    pub fn show_after_updates() -> u32 {
        1
    }
    pub fn moving_average_window() -> usize {
        10
    }

    pub fn follow_distance() -> f64 {
        10.0
    }
    pub fn drop_distance() -> f64 {
        5.0
    }
    pub fn deactivation_distance() -> f64 {
        10.0
    }
    pub fn sign_height() -> f64 {
        2.0
    }
    pub fn arrow_drop_duration() -> f64 {
        2.0
    }
    pub fn pin_drop_duration() -> f64 {
        1.5
    }
    pub fn pin_drop_height() -> f64 {
        50.0
    }

    pub fn api_base() -> String {
        "https://api.mapbox.com".to_string()
    }
    pub fn request_timeout_secs() -> u64 {
        30
    }
    pub fn route_ground_height() -> f64 {
        1.4
    }
}

/// Location update gating and start-up policy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationProviderOptions {
    /// Minimum time between accepted readings (seconds)
    #[serde(default = "defaults::time_between_updates")]
    pub time_between_updates: f64,

    /// Minimum horizontal distance between accepted readings (metres)
    #[serde(default)]
    pub min_distance: f64,

    /// Readings with a worse accuracy radius are dropped; 0 accepts all
    #[serde(default = "defaults::accuracy_radius")]
    pub accuracy_radius: f64,

    /// Auto-pause after this many accepted readings; 0 = unlimited
    #[serde(default)]
    pub max_number_of_updates: u32,

    /// Seconds to wait for the platform source to start
    #[serde(default = "defaults::max_wait_time")]
    pub max_wait_time: u32,

    /// Seconds to wait before requesting updates
    #[serde(default)]
    pub start_delay: u32,

    /// Compass low-pass factor; 0 disables filtering
    #[serde(default)]
    pub compass_low_pass_factor: f64,
}

impl Default for LocationProviderOptions {
    fn default() -> Self {
        Self {
            time_between_updates: defaults::time_between_updates(),
            min_distance: 0.0,
            accuracy_radius: defaults::accuracy_radius(),
            max_number_of_updates: 0,
            max_wait_time: defaults::max_wait_time(),
            start_delay: 0,
            compass_low_pass_factor: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrientationOptions {
    /// Cap on applied orientation updates; 0 = unlimited
    #[serde(default = "defaults::orientation_max_updates")]
    pub max_number_of_updates: u32,

    /// Samples per averaged update; <= 1 disables averaging
    #[serde(default = "defaults::average_count")]
    pub average_count: usize,

    #[serde(default = "defaults::yes")]
    pub use_raw_until_first_average: bool,

    /// Fraction of the yaw gap left after one second; 0 = instant
    #[serde(default = "defaults::movement_smoothing_factor")]
    pub movement_smoothing_factor: f64,

    /// Manual declination added to the magnetic heading; 0 uses the platform heading
    #[serde(default)]
    pub true_north_offset: f64,

    /// Forwarded to the provider's compass filter when > 0
    #[serde(default = "defaults::low_pass_filter_factor")]
    pub low_pass_filter_factor: f64,
}

impl Default for OrientationOptions {
    fn default() -> Self {
        Self {
            max_number_of_updates: defaults::orientation_max_updates(),
            average_count: defaults::average_count(),
            use_raw_until_first_average: true,
            movement_smoothing_factor: defaults::movement_smoothing_factor(),
            true_north_offset: 0.0,
            low_pass_filter_factor: defaults::low_pass_filter_factor(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroundHeightOptions {
    #[serde(default = "defaults::initial_ground_height_guess")]
    pub initial_ground_height_guess: f64,

    #[serde(default = "defaults::min_ground_height")]
    pub min_ground_height: f64,

    #[serde(default = "defaults::max_ground_height")]
    pub max_ground_height: f64,

    #[serde(default = "defaults::ground_smoothing")]
    pub smoothing: f64,

    #[serde(default = "defaults::ground_precision")]
    pub precision: f64,

    /// Height above the tracked ground
    #[serde(default)]
    pub altitude: f64,

    #[serde(default)]
    pub disable_update: bool,
}

impl Default for GroundHeightOptions {
    fn default() -> Self {
        Self {
            initial_ground_height_guess: defaults::initial_ground_height_guess(),
            min_ground_height: defaults::min_ground_height(),
            max_ground_height: defaults::max_ground_height(),
            smoothing: defaults::ground_smoothing(),
            precision: defaults::ground_precision(),
            altitude: 0.0,
            disable_update: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlacementOptions {
    /// Fraction of the position gap left after one second; 0 snaps
    #[serde(default = "defaults::movement_smoothing")]
    pub movement_smoothing: f64,

    /// Cap on applied location updates; 0 = unlimited
    #[serde(default = "defaults::max_location_updates")]
    pub max_number_of_location_updates: u32,

    #[serde(default)]
    pub use_moving_average: bool,

    #[serde(default = "defaults::moving_average_window")]
    pub moving_average_window: usize,

    #[serde(default = "defaults::yes")]
    pub hide_object_until_it_is_placed: bool,

    /// 0 disables hiding
    #[serde(default = "defaults::show_after_updates")]
    pub show_object_after_this_many_updates: u32,
}

impl Default for PlacementOptions {
    fn default() -> Self {
        Self {
            movement_smoothing: defaults::movement_smoothing(),
            max_number_of_location_updates: defaults::max_location_updates(),
            use_moving_average: false,
            moving_average_window: defaults::moving_average_window(),
            hide_object_until_it_is_placed: true,
            show_object_after_this_many_updates: defaults::show_after_updates(),
        }
    }
}

/// Thresholds for the per-step signpost state machine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignpostOptions {
    /// L0: beyond this the road-sign follows ahead of the user
    #[serde(default = "defaults::follow_distance")]
    pub follow_distance: f64,

    /// L1: inside this the direction arrow drops in
    #[serde(default = "defaults::drop_distance")]
    pub drop_distance: f64,

    /// L2: inside this the step is deactivated and the next one targeted
    #[serde(default = "defaults::deactivation_distance")]
    pub deactivation_distance: f64,

    #[serde(default)]
    pub hide_arrow_on_next_target: bool,

    #[serde(default = "defaults::sign_height")]
    pub sign_height: f64,

    #[serde(default = "defaults::arrow_drop_duration")]
    pub arrow_drop_duration: f64,

    #[serde(default = "defaults::pin_drop_duration")]
    pub pin_drop_duration: f64,

    #[serde(default = "defaults::pin_drop_height")]
    pub pin_drop_height: f64,
}

impl Default for SignpostOptions {
    fn default() -> Self {
        Self {
            follow_distance: defaults::follow_distance(),
            drop_distance: defaults::drop_distance(),
            deactivation_distance: defaults::deactivation_distance(),
            hide_arrow_on_next_target: false,
            sign_height: defaults::sign_height(),
            arrow_drop_duration: defaults::arrow_drop_duration(),
            pin_drop_duration: defaults::pin_drop_duration(),
            pin_drop_height: defaults::pin_drop_height(),
        }
    }
}

impl SignpostOptions {
    /// Enforce L0 >= L1 >= L2 by pulling the dependent threshold down.
    pub fn validate(&mut self) {
        if self.drop_distance > self.follow_distance {
            log::warn!(
                "drop_distance {} exceeds follow_distance {}; clamping",
                self.drop_distance,
                self.follow_distance
            );
            self.drop_distance = self.follow_distance;
        }
        if self.deactivation_distance > self.drop_distance {
            log::warn!(
                "deactivation_distance {} exceeds drop_distance {}; clamping",
                self.deactivation_distance,
                self.drop_distance
            );
            self.deactivation_distance = self.drop_distance;
        }
    }

    pub fn validated(mut self) -> Self {
        self.validate();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteOptions {
    #[serde(default)]
    pub mapbox_token: String,

    #[serde(default = "defaults::api_base")]
    pub api_base: String,

    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Assumed device height above the ground, used when dropping the finish pin
    #[serde(default = "defaults::route_ground_height")]
    pub ground_height: f64,

    /// Load the configured route as soon as the provider is enabled
    #[serde(default = "defaults::yes")]
    pub load_route_at_startup: bool,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            mapbox_token: String::new(),
            api_base: defaults::api_base(),
            request_timeout_secs: defaults::request_timeout_secs(),
            ground_height: defaults::route_ground_height(),
            load_route_at_startup: true,
        }
    }
}

/// Host tracking policy
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Mute the provider until the host reports AR tracking
    #[serde(default)]
    pub wait_for_tracking: bool,

    /// Restart the provider and the calibrator when tracking comes back
    #[serde(default)]
    pub restart_when_tracking_restored: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NavConfig {
    #[serde(default)]
    pub provider: LocationProviderOptions,
    #[serde(default)]
    pub orientation: OrientationOptions,
    #[serde(default)]
    pub ground: GroundHeightOptions,
    #[serde(default)]
    pub placement: PlacementOptions,
    #[serde(default)]
    pub signpost: SignpostOptions,
    #[serde(default)]
    pub route: RouteOptions,
    #[serde(default)]
    pub session: SessionOptions,
}

impl NavConfig {
    pub fn load(path: &Path) -> NavResult<Self> {
        let text = fs::read_to_string(path)?;
        let mut config = Self::from_json(&text)?;
        config.validate();
        Ok(config)
    }

    pub fn from_json(text: &str) -> NavResult<Self> {
        serde_json::from_str(text).map_err(|e| NavError::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> NavResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Clamp inconsistent values in place.
    pub fn validate(&mut self) {
        self.signpost.validate();

        if self.ground.min_ground_height > self.ground.max_ground_height {
            log::warn!(
                "min_ground_height {} exceeds max_ground_height {}; clamping",
                self.ground.min_ground_height,
                self.ground.max_ground_height
            );
            self.ground.min_ground_height = self.ground.max_ground_height;
        }

        self.orientation.movement_smoothing_factor = clamp_factor(
            "orientation.movement_smoothing_factor",
            self.orientation.movement_smoothing_factor,
        );
        self.orientation.low_pass_filter_factor = clamp_factor(
            "orientation.low_pass_filter_factor",
            self.orientation.low_pass_filter_factor,
        );
        self.ground.smoothing = clamp_factor("ground.smoothing", self.ground.smoothing);
        self.placement.movement_smoothing =
            clamp_factor("placement.movement_smoothing", self.placement.movement_smoothing);
        self.provider.compass_low_pass_factor = clamp_factor(
            "provider.compass_low_pass_factor",
            self.provider.compass_low_pass_factor,
        );
    }
}

/// Smoothing factors live in [0, 1); 1 would never move.
fn clamp_factor(name: &str, value: f64) -> f64 {
    let upper = 1.0 - 1e-6;
    if value.is_nan() || value < 0.0 {
        log::warn!("{} = {} out of range; using 0", name, value);
        0.0
    } else if value > upper {
        log::warn!("{} = {} out of range; clamping below 1", name, value);
        upper
    } else {
        value
    }
}
