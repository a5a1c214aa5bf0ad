//! Geo-anchored AR placement and walking navigation.
//!
//! The host feeds camera poses, AR tracking state and detected planes into a
//! [`session::Session`] and ticks it once per frame; the session turns
//! location and compass readings into a calibrated local frame, places
//! geo-anchored objects in it, and guides the user along a route.

pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod geo_math;
pub mod ground;
pub mod orientation;
pub mod placement;
pub mod provider;
pub mod route;
pub mod session;
pub mod smoothing;
pub mod status;
pub mod types;

pub use config::NavConfig;
pub use error::{NavError, NavResult};
pub use session::Session;
pub use types::{AltitudeMode, GeoPoint, HeadingReading, LocalPoint, LocationReading};
