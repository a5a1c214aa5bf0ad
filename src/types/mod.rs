pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// How a point's altitude is interpreted when it is placed in the local frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AltitudeMode {
    /// Altitude above the WGS84 ellipsoid, compared against the device altitude.
    Absolute,
    /// Altitude is the local-frame height itself.
    DeviceRelative,
    /// Height follows the nearest detected ground plane, offset by the altitude.
    #[default]
    GroundRelative,
}

/// WGS84 point. Copied on assignment so owners never alias a cache.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
    #[serde(default)]
    pub altitude_mode: AltitudeMode,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64, altitude: f64, altitude_mode: AltitudeMode) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            altitude_mode,
        }
    }

    /// Ground-relative point with zero altitude offset
    pub fn flat(latitude: f64, longitude: f64) -> Self {
        Self::new(latitude, longitude, 0.0, AltitudeMode::GroundRelative)
    }

    pub fn with_altitude(mut self, altitude: f64, altitude_mode: AltitudeMode) -> Self {
        self.altitude = altitude;
        self.altitude_mode = altitude_mode;
        self
    }

    /// Component-wise equality within `eps` (degrees and metres).
    pub fn approx_eq(&self, other: &GeoPoint, eps: f64) -> bool {
        (self.latitude - other.latitude).abs() <= eps
            && (self.longitude - other.longitude).abs() <= eps
            && (self.altitude - other.altitude).abs() <= eps
    }

    pub fn to_geo_point(&self) -> geo::Point<f64> {
        geo::Point::new(self.longitude, self.latitude)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct LocationReading {
    pub position: GeoPoint,
    /// Horizontal accuracy radius in metres
    pub accuracy: f64,
    /// Epoch time in milliseconds
    pub timestamp: i64,
    /// Set on readings delivered through the raw channel, which skips update gating.
    #[serde(default)]
    pub raw: bool,
}

impl LocationReading {
    pub fn new(position: GeoPoint, accuracy: f64, timestamp: i64) -> Self {
        Self {
            position,
            accuracy,
            timestamp,
            raw: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadingReading {
    /// True-north heading in degrees, as corrected by the platform
    pub heading: f64,
    pub magnetic_heading: f64,
    pub accuracy: f64,
    pub timestamp: i64,
    pub is_magnetic_heading_available: bool,
}

impl HeadingReading {
    pub fn new(heading: f64, timestamp: i64) -> Self {
        Self {
            heading,
            magnetic_heading: heading,
            accuracy: 0.0,
            timestamp,
            is_magnetic_heading_available: true,
        }
    }
}
