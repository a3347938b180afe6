//! Great-circle distance helpers for radius queries.

use crate::model::GeoPoint;

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Meters per degree of latitude, rounded down so boxes stay conservative.
const METERS_PER_DEGREE: f64 = 111_000.0;

/// Distance between two points in meters, using the haversine formula.
#[must_use]
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Whether `point` lies within `radius_m` meters of `center` (inclusive).
#[must_use]
pub fn within_radius(center: GeoPoint, point: GeoPoint, radius_m: f64) -> bool {
    haversine_meters(center, point) <= radius_m
}

/// A latitude/longitude rectangle enclosing a circle.
///
/// Used to prefilter rows in SQL before the exact haversine check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Western and eastern edges, or `None` when every longitude qualifies.
    pub lon_range: Option<(f64, f64)>,
}

impl BoundingBox {
    /// The box enclosing the circle of `radius_m` around `center`.
    ///
    /// Near the poles, or when the circle wraps the antimeridian, the
    /// longitude constraint is dropped.
    #[must_use]
    pub fn around(center: GeoPoint, radius_m: f64) -> Self {
        let d_lat = radius_m / METERS_PER_DEGREE;
        let min_lat = center.latitude - d_lat;
        let max_lat = center.latitude + d_lat;

        if min_lat <= -90.0 || max_lat >= 90.0 {
            return Self {
                min_lat: min_lat.max(-90.0),
                max_lat: max_lat.min(90.0),
                lon_range: None,
            };
        }

        // Widest point of the circle is at the latitude closest to a pole.
        let widest = min_lat.abs().max(max_lat.abs()).to_radians().cos();
        let d_lon = radius_m / (METERS_PER_DEGREE * widest);
        let min_lon = center.longitude - d_lon;
        let max_lon = center.longitude + d_lon;

        let lon_range = if d_lon >= 180.0 || min_lon < -180.0 || max_lon > 180.0 {
            None
        } else {
            Some((min_lon, max_lon))
        };

        Self {
            min_lat,
            max_lat,
            lon_range,
        }
    }

    /// Whether the box contains `point`.
    #[must_use]
    pub fn contains(&self, point: GeoPoint) -> bool {
        let lat_ok = (self.min_lat..=self.max_lat).contains(&point.latitude);
        let lon_ok = self
            .lon_range
            .is_none_or(|(min, max)| (min..=max).contains(&point.longitude));
        lat_ok && lon_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    #[test]
    fn test_zero_distance() {
        let p = point(48.8566, 2.3522);
        assert!(haversine_meters(p, p).abs() < 1e-6);
    }

    #[test]
    fn test_known_distance_paris_london() {
        let paris = point(48.8566, 2.3522);
        let london = point(51.5074, -0.1278);
        let d = haversine_meters(paris, london);
        assert!((d - 343_500.0).abs() < 2_000.0, "got {d}");
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = point(10.0, 20.0);
        let b = point(-5.0, 100.0);
        assert!((haversine_meters(a, b) - haversine_meters(b, a)).abs() < 1e-6);
    }

    #[test]
    fn test_within_radius_boundary() {
        let center = point(0.0, 0.0);
        // One thousandth of a degree of latitude is about 111 m.
        let near = point(0.001, 0.0);
        let d = haversine_meters(center, near);

        assert!(within_radius(center, near, d));
        assert!(!within_radius(center, near, d - 1.0));
    }

    #[test]
    fn test_bounding_box_contains_circle() {
        let center = point(40.0, -74.0);
        let bbox = BoundingBox::around(center, 5_000.0);

        for (lat, lon) in [(40.04, -74.0), (40.0, -74.058), (39.96, -73.95)] {
            let p = point(lat, lon);
            if within_radius(center, p, 5_000.0) {
                assert!(bbox.contains(p), "{lat},{lon} inside circle but not box");
            }
        }
        assert!(!bbox.contains(point(41.0, -74.0)));
        assert!(!bbox.contains(point(40.0, -73.0)));
    }

    #[test]
    fn test_bounding_box_near_pole_drops_longitude() {
        let bbox = BoundingBox::around(point(89.99, 0.0), 5_000.0);
        assert!(bbox.lon_range.is_none());
        assert!((bbox.max_lat - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bounding_box_across_antimeridian_drops_longitude() {
        let bbox = BoundingBox::around(point(0.0, 179.99), 5_000.0);
        assert!(bbox.lon_range.is_none());
        assert!(bbox.contains(point(0.0, -179.99)));
    }
}
