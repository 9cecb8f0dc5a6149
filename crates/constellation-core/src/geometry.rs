//! Inertial-frame geometry.
//!
//! Positions are Earth-centered inertial (ECI) Cartesian triples in meters,
//! matching the frame of the propagated orbit states. Geographic points are
//! rotated into that frame at a given epoch through GMST.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ECI position [m].
pub type EciPosition = [f64; 3];

// WGS84 ellipsoid
const WGS84_SEMI_MAJOR_M: f64 = 6_378_137.0;
const WGS84_FLATTENING: f64 = 1.0 / 298.257_223_563;

/// Euclidean distance between two inertial positions [m].
pub fn distance_m(a: &EciPosition, b: &EciPosition) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// A geographic point: geodetic latitude/longitude in degrees, altitude in
/// meters above the WGS84 ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
}

impl GeoPoint {
    pub fn new(lat_deg: f64, lon_deg: f64, alt_m: f64) -> Self {
        Self {
            lat_deg,
            lon_deg,
            alt_m,
        }
    }

    /// Ground-level point.
    pub fn surface(lat_deg: f64, lon_deg: f64) -> Self {
        Self::new(lat_deg, lon_deg, 0.0)
    }

    /// Inertial position of the point at `epoch`: WGS84 geodetic to ECEF,
    /// then rotation by Greenwich mean sidereal time into ECI.
    pub fn to_eci(&self, epoch: DateTime<Utc>) -> EciPosition {
        let [xe, ye, ze] = self.to_ecef();
        let theta = gmst_rad(epoch);
        let (sin_t, cos_t) = theta.sin_cos();
        [xe * cos_t - ye * sin_t, xe * sin_t + ye * cos_t, ze]
    }

    fn to_ecef(&self) -> [f64; 3] {
        let lat = self.lat_deg.to_radians();
        let lon = self.lon_deg.to_radians();
        let e2 = WGS84_FLATTENING * (2.0 - WGS84_FLATTENING);
        let n = WGS84_SEMI_MAJOR_M / (1.0 - e2 * lat.sin().powi(2)).sqrt();
        [
            (n + self.alt_m) * lat.cos() * lon.cos(),
            (n + self.alt_m) * lat.cos() * lon.sin(),
            (n * (1.0 - e2) + self.alt_m) * lat.sin(),
        ]
    }
}

/// Greenwich mean sidereal time [rad] at `epoch` (IAU 1982 series, UT1≈UTC,
/// well inside the meter-level accuracy this engine needs).
fn gmst_rad(epoch: DateTime<Utc>) -> f64 {
    let jd = epoch.timestamp_millis() as f64 / 86_400_000.0 + 2_440_587.5;
    let d = jd - 2_451_545.0;
    let t = d / 36_525.0;
    let gmst_deg = 280.460_618_37 + 360.985_647_366_29 * d + 0.000_387_933 * t * t
        - t * t * t / 38_710_000.0;
    gmst_deg.rem_euclid(360.0).to_radians()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn distance_is_euclidean() {
        let a = [0.0, 0.0, 0.0];
        let b = [3.0, 4.0, 0.0];
        assert!((distance_m(&a, &b) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn equator_point_stays_near_earth_radius() {
        let epoch = Utc.with_ymd_and_hms(2024, 3, 21, 12, 0, 0).unwrap();
        let p = GeoPoint::surface(0.0, 0.0).to_eci(epoch);
        let r = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
        assert!((r - WGS84_SEMI_MAJOR_M).abs() < 1.0);
        // On the equator the z component is zero regardless of epoch.
        assert!(p[2].abs() < 1e-6);
    }

    #[test]
    fn pole_is_epoch_independent() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 7, 1, 13, 30, 0).unwrap();
        let a = GeoPoint::surface(90.0, 0.0).to_eci(t0);
        let b = GeoPoint::surface(90.0, 45.0).to_eci(t1);
        // The pole sits on the rotation axis: x and y vanish.
        assert!(a[0].abs() < 1e-3 && a[1].abs() < 1e-3);
        assert!((a[2] - b[2]).abs() < 1e-6);
    }

    #[test]
    fn earth_rotation_moves_equatorial_points() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t6h = Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap();
        let p0 = GeoPoint::surface(0.0, 0.0).to_eci(t0);
        let p6 = GeoPoint::surface(0.0, 0.0).to_eci(t6h);
        // Six hours of rotation displace the point by roughly sqrt(2)*R.
        let d = distance_m(&p0, &p6);
        assert!(d > 0.8 * WGS84_SEMI_MAJOR_M * std::f64::consts::SQRT_2);
    }

    #[test]
    fn altitude_extends_radius() {
        let epoch = Utc.with_ymd_and_hms(2024, 3, 21, 12, 0, 0).unwrap();
        let lo = GeoPoint::new(45.0, 10.0, 0.0).to_eci(epoch);
        let hi = GeoPoint::new(45.0, 10.0, 1_000.0).to_eci(epoch);
        assert!((distance_m(&lo, &hi) - 1_000.0).abs() < 0.5);
    }
}
