//! Geodetic helpers: WGS84 <-> ECEF, local east/north/up offsets, and the
//! planar point-to-segment projection used for nearest-target selection.
//!
//! Local offsets are built from ECEF differences rotated into the tangent plane
//! at the first point, which stays accurate over the few-kilometre spans a
//! walking route covers. Distance, bearing and destination use geodesics on
//! the same WGS84 ellipsoid, so points built with [`destination`] land where
//! [`enu_vector`] expects them.

use crate::types::{AltitudeMode, GeoPoint, LocalPoint, LocalVec2};
use geo::{GeodesicBearing, GeodesicDestination, GeodesicDistance};
use nalgebra::Vector3;

/// WGS84 equatorial radius (metres)
pub const EARTH_EQUATORIAL_RADIUS_M: f64 = 6_378_137.0;
/// WGS84 first eccentricity squared
pub const EARTH_FIRST_ECCENTRICITY_SQUARED: f64 = 0.006_694_379_990_14;

/// WGS84 point -> ECEF (x, y, z) in metres. Altitude is ignored.
pub fn location_to_ecef(p: &GeoPoint) -> Vector3<f64> {
    let lat = p.latitude.to_radians();
    let lon = p.longitude.to_radians();
    let a = EARTH_EQUATORIAL_RADIUS_M;
    let e2 = EARTH_FIRST_ECCENTRICITY_SQUARED;
    let n = a / (1.0 - e2 * lat.sin().powi(2)).sqrt();

    Vector3::new(
        n * lat.cos() * lon.cos(),
        n * lat.cos() * lon.sin(),
        (1.0 - e2) * n * lat.sin(),
    )
}

/// ECEF -> WGS84 via Zhu's closed-form solution.
pub fn ecef_to_location(ecef: &Vector3<f64>) -> GeoPoint {
    let a = EARTH_EQUATORIAL_RADIUS_M;
    let e2 = EARTH_FIRST_ECCENTRICITY_SQUARED;
    let b = a * (1.0 - e2).sqrt();
    let (x, y, z) = (ecef.x, ecef.y, ecef.z);

    let r = (x * x + y * y).sqrt();
    let ep2 = (a * a - b * b) / (b * b);
    let f = 54.0 * b * b * z * z;
    let g = r * r + (1.0 - e2) * z * z - e2 * (a * a - b * b);
    let c = (e2 * e2 * f * r * r) / (g * g * g);
    let s = (1.0 + c + (c * c + 2.0 * c).sqrt()).cbrt();
    let p = f / (3.0 * (s + 1.0 / s + 1.0).powi(2) * g * g);
    let q = (1.0 + 2.0 * e2 * e2 * p).sqrt();
    let r0 = -(p * e2 * r) / (1.0 + q)
        + ((a * a * 0.5) * (1.0 + 1.0 / q)
            - (p * (1.0 - e2) * z * z) / (q * (1.0 + q))
            - p * r * r * 0.5)
            .sqrt();
    let u = ((r - e2 * r0).powi(2) + z * z).sqrt();
    let v = ((r - e2 * r0).powi(2) + (1.0 - e2) * z * z).sqrt();
    let z0 = (b * b * z) / (a * v);

    let h = u * (1.0 - (b * b) / (a * v));
    let phi = ((z + ep2 * z0) / r).atan();
    let lambda = y.atan2(x);

    GeoPoint::new(phi.to_degrees(), lambda.to_degrees(), h, AltitudeMode::GroundRelative)
}

/// Horizontal (east, north) offset of `to` in the tangent plane at `from`, in metres.
pub fn enu_vector(from: &GeoPoint, to: &GeoPoint) -> LocalVec2 {
    let lat = from.latitude.to_radians();
    let lon = from.longitude.to_radians();
    let delta = location_to_ecef(to) - location_to_ecef(from);

    let (slat, clat) = lat.sin_cos();
    let (slon, clon) = lon.sin_cos();

    let east = -slon * delta.x + clon * delta.y;
    let north = -clon * slat * delta.x - slat * slon * delta.y + clat * delta.z;

    LocalVec2::new(east, north)
}

/// Inverse of [`enu_vector`] with an explicit up component.
pub fn location_from_enu(center: &GeoPoint, east: f64, north: f64, up: f64) -> GeoPoint {
    let lat = center.latitude.to_radians();
    let lon = center.longitude.to_radians();

    let (slat, clat) = lat.sin_cos();
    let (slon, clon) = lon.sin_cos();

    let dx = -east * slon - north * clon * slat + up * clon * clat;
    let dy = east * clon - north * slon * slat + up * slon * clat;
    let dz = north * clat + up * slat;

    let mut point = ecef_to_location(&(location_to_ecef(center) + Vector3::new(dx, dy, dz)));
    point.altitude_mode = center.altitude_mode;
    point
}

/// Horizontal distance in metres, measured in the tangent plane at `a`.
pub fn horizontal_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    enu_vector(a, b).norm()
}

pub fn distance_with_altitude(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let d = horizontal_distance(a, b);
    let h = (a.altitude - b.altitude).abs();
    (d * d + h * h).sqrt()
}

/// Local-frame displacement from `from` to `to`: (east, altitude delta, north).
///
/// # Arguments
/// * `ignore_height` - force the vertical component to zero
pub fn vector_from_to(from: &GeoPoint, to: &GeoPoint, ignore_height: bool) -> LocalPoint {
    let h = enu_vector(from, to);
    let up = if ignore_height {
        0.0
    } else {
        to.altitude - from.altitude
    };
    LocalPoint::new(h.x, up, h.y)
}

/// WGS84 geodesic distance in metres
pub fn geodesic_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    a.to_geo_point().geodesic_distance(&b.to_geo_point())
}

/// Initial geodesic bearing from `a` to `b`, degrees in [0, 360)
pub fn bearing(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let raw = a.to_geo_point().geodesic_bearing(b.to_geo_point());
    crate::types::normalize_angle_360(raw)
}

/// Point reached by travelling `distance_m` along `bearing_deg` from `start`.
pub fn destination(start: &GeoPoint, bearing_deg: f64, distance_m: f64) -> GeoPoint {
    let p = start
        .to_geo_point()
        .geodesic_destination(bearing_deg, distance_m);
    GeoPoint {
        latitude: p.y(),
        longitude: p.x(),
        ..*start
    }
}

/// Where a point's projection falls relative to a segment a->b
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentRegion {
    Start,
    Middle,
    End,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentDistance {
    pub distance: f64,
    pub region: SegmentRegion,
}

/// Distance from `point` to the segment a->b, with the region of the projection.
///
/// A zero-length segment reports the distance to `b` in the `End` region.
pub fn point_segment_distance(point: &LocalVec2, a: &LocalVec2, b: &LocalVec2) -> SegmentDistance {
    let ap = point - a;
    let ab = b - a;
    let bp = point - b;

    let len = ab.norm();
    if len <= f64::EPSILON {
        return SegmentDistance {
            distance: bp.norm(),
            region: SegmentRegion::End,
        };
    }

    let proj = ap.dot(&ab) / len;
    let u = proj / len;

    if u < 0.0 {
        SegmentDistance {
            distance: ap.norm(),
            region: SegmentRegion::Start,
        }
    } else if u > 1.0 {
        SegmentDistance {
            distance: bp.norm(),
            region: SegmentRegion::End,
        }
    } else {
        SegmentDistance {
            distance: (ap.norm_squared() - proj * proj).max(0.0).sqrt(),
            region: SegmentRegion::Middle,
        }
    }
}
