//! WGS84 haversine distance, shared by position inference's
//! drift/jump gating and the persistence movement log.

const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (lat1, lng1, lat2, lng2) = (lat1.to_radians(), lng1.to_radians(), lat2.to_radians(), lng2.to_radians());
    let dlat = lat2 - lat1;
    let dlng = lng2 - lng1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_for_identical_points() {
        assert!(haversine_m(32.0, 34.0, 32.0, 34.0) < 1e-6);
    }

    #[test]
    fn known_distance_roughly_matches() {
        // ~0.001 degrees lat ~= 111 m.
        let d = haversine_m(32.0, 34.0, 32.001, 34.0);
        assert!((d - 111.0).abs() < 2.0, "got {d}");
    }

    #[test]
    fn about_5_6_meters_for_5e5_degree_offset() {
        let d = haversine_m(32.0, 34.0, 32.00005, 34.0);
        assert!(d > 4.0 && d < 7.0, "got {d}");
    }
}
