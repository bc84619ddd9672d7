//! Spatial math for leg geometry, bearings and wind angles.

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub const KNOTS_PER_MPS: f64 = 1.943_844;

/// Calculate distance between two points in meters using Haversine formula.
///
/// # Arguments
/// * `lat1`, `lng1` - First point coordinates in decimal degrees
/// * `lat2`, `lng2` - Second point coordinates in decimal degrees
///
/// # Returns
/// Distance in meters
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lng2 - lng1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Initial great-circle bearing from point 1 to point 2, compass degrees in [0, 360).
pub fn bearing_deg(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dlambda = (lng2 - lng1).to_radians();
    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    normalize_deg(y.atan2(x).to_degrees())
}

/// Great-circle midpoint between two points, (lat, lng) in degrees.
pub fn midpoint(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> (f64, f64) {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let lambda1 = lng1.to_radians();
    let dlambda = (lng2 - lng1).to_radians();

    let bx = phi2.cos() * dlambda.cos();
    let by = phi2.cos() * dlambda.sin();
    let phi_m = (phi1.sin() + phi2.sin()).atan2(((phi1.cos() + bx).powi(2) + by * by).sqrt());
    let lambda_m = lambda1 + by.atan2(phi1.cos() + bx);
    (phi_m.to_degrees(), lambda_m.to_degrees())
}

/// Wrap any angle into [0, 360).
pub fn normalize_deg(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Fold an angle into [0, 180] using port/starboard symmetry.
pub fn fold_deg(deg: f64) -> f64 {
    let wrapped = normalize_deg(deg);
    if wrapped > 180.0 {
        360.0 - wrapped
    } else {
        wrapped
    }
}

pub fn mps_to_knots(mps: f64) -> f64 {
    mps * KNOTS_PER_MPS
}

pub fn knots_to_mps(knots: f64) -> f64 {
    knots / KNOTS_PER_MPS
}

/// A wind vector. `u` is the eastward and `v` the northward component, m/s.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindVector {
    pub u: f64,
    pub v: f64,
}

impl WindVector {
    pub const CALM: WindVector = WindVector { u: 0.0, v: 0.0 };

    pub fn new(u: f64, v: f64) -> Self {
        Self { u, v }
    }

    pub fn speed_mps(&self) -> f64 {
        (self.u * self.u + self.v * self.v).sqrt()
    }

    pub fn speed_knots(&self) -> f64 {
        mps_to_knots(self.speed_mps())
    }

    /// Compass direction the wind blows *from*, degrees in [0, 360).
    pub fn from_deg(&self) -> f64 {
        normalize_deg(self.u.atan2(self.v).to_degrees() + 180.0)
    }

    /// True wind angle relative to a heading, folded into [0, 180].
    ///
    /// 0 means the wind comes from dead ahead, 180 from dead astern.
    pub fn true_wind_angle(&self, heading_deg: f64) -> f64 {
        fold_deg(self.from_deg() - heading_deg)
    }

    pub(crate) fn lerp(a: WindVector, b: WindVector, t: f64) -> WindVector {
        WindVector {
            u: a.u + (b.u - a.u) * t,
            v: a.v + (b.v - a.v) * t,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_one_degree_latitude() {
        let dist = haversine_distance(0.0, 0.0, 1.0, 0.0);
        assert!((dist - 111_195.0).abs() < 10.0, "got {dist}");
    }

    #[test]
    fn bearing_cardinal_directions() {
        assert!(bearing_deg(0.0, 0.0, 1.0, 0.0).abs() < 1e-9);
        assert!((bearing_deg(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 1e-9);
        assert!((bearing_deg(0.0, 0.0, -1.0, 0.0) - 180.0).abs() < 1e-9);
        assert!((bearing_deg(0.0, 0.0, 0.0, -1.0) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn midpoint_on_equator() {
        let (lat, lng) = midpoint(0.0, 0.0, 0.0, 2.0);
        assert!(lat.abs() < 1e-9);
        assert!((lng - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fold_is_symmetric() {
        assert!((fold_deg(90.0) - 90.0).abs() < 1e-12);
        assert!((fold_deg(270.0) - 90.0).abs() < 1e-12);
        assert!((fold_deg(-45.0) - 45.0).abs() < 1e-12);
        assert!((fold_deg(540.0) - 180.0).abs() < 1e-12);
    }

    #[test]
    fn wind_from_direction() {
        // Blowing toward the south means wind from the north.
        assert!(WindVector::new(0.0, -8.0).from_deg().abs() < 1e-9);
        // Blowing toward the west means wind from the east.
        assert!((WindVector::new(-8.0, 0.0).from_deg() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn headwind_has_zero_true_wind_angle() {
        let north_wind = WindVector::new(0.0, -10.0);
        assert!(north_wind.true_wind_angle(0.0).abs() < 1e-9);
        assert!((north_wind.true_wind_angle(180.0) - 180.0).abs() < 1e-9);
        assert!((north_wind.true_wind_angle(90.0) - 90.0).abs() < 1e-9);
        assert!((north_wind.true_wind_angle(270.0) - 90.0).abs() < 1e-9);
    }
}
