//! Distances on the WGS84 ellipsoid.

use geo::{Distance, Geodesic, Point};

/// Geodesic distance in kilometres between two `(lon, lat)` points.
///
/// Uses Karney's algorithm, accurate to well under a millimetre.
#[must_use]
pub fn distance_km(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    Geodesic.distance(Point::new(lon1, lat1), Point::new(lon2, lat2)) / 1000.0
}
