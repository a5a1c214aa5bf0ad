//! Local-frame vector types and angle helpers
//!
//! Axes: x = east, y = up, z = north. Yaw angles are in degrees and follow the
//! compass convention: a positive yaw turns the +z (north) axis toward +x (east).

use nalgebra::{UnitQuaternion, Vector2, Vector3};

pub type LocalPoint = Vector3<f64>;
pub type LocalVec2 = Vector2<f64>;
pub type YawRotation = UnitQuaternion<f64>;

/// Differences below this are treated as equal angles.
pub const ANGLE_EPSILON_DEG: f64 = 0.001;

/// Rotation about +y for a compass-style yaw in degrees
pub fn yaw_rotation(yaw_deg: f64) -> YawRotation {
    UnitQuaternion::from_axis_angle(&Vector3::y_axis(), yaw_deg.to_radians())
}

/// Drop the vertical component: (x, y, z) -> (x, z)
pub fn horizontal(v: &LocalPoint) -> LocalVec2 {
    Vector2::new(v.x, v.z)
}

pub fn horizontal_distance(a: &LocalPoint, b: &LocalPoint) -> f64 {
    (horizontal(a) - horizontal(b)).norm()
}

pub fn with_y(v: &LocalPoint, y: f64) -> LocalPoint {
    Vector3::new(v.x, y, v.z)
}

/// Normalize an angle into (-180, 180]
pub fn normalize_angle_180(angle: f64) -> f64 {
    let mut a = angle % 360.0;
    if a <= -180.0 {
        a += 360.0;
    } else if a > 180.0 {
        a -= 360.0;
    }
    a
}

/// Normalize an angle into [0, 360)
pub fn normalize_angle_360(angle: f64) -> f64 {
    let a = angle % 360.0;
    if a < 0.0 {
        a + 360.0
    } else {
        a
    }
}

/// Shortest signed difference `to - from`, in (-180, 180]
pub fn delta_angle(from: f64, to: f64) -> f64 {
    normalize_angle_180(to - from)
}

/// Interpolate along the shortest arc; `t` is clamped to [0, 1].
pub fn lerp_angle(from: f64, to: f64, t: f64) -> f64 {
    from + delta_angle(from, to) * t.clamp(0.0, 1.0)
}

/// Blend weight for one tick of an exponential approach.
///
/// `factor` is the fraction of the gap left after one second: 0 snaps, values near 1 crawl.
pub fn approach_weight(factor: f64, dt: f64) -> f64 {
    1.0 - factor.powf(dt)
}
