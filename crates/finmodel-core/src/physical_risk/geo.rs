//! Geospatial helpers for peril/asset matching.

/// Mean Earth radius in kilometres
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two coordinates (decimal degrees) via the
/// Haversine formula, in kilometres.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Whether a point lies within `radius_km` of a centre.
pub fn is_within_radius(
    point_lat: f64,
    point_lon: f64,
    center_lat: f64,
    center_lon: f64,
    radius_km: f64,
) -> bool {
    haversine_distance(point_lat, point_lon, center_lat, center_lon) <= radius_km
}

/// Linear intensity decay away from the peril centre:
/// `intensity * max(0, 1 - distance / radius)`, zero outside the radius.
pub fn intensity_with_decay(base_intensity: f64, distance_km: f64, radius_km: f64) -> f64 {
    if radius_km <= 0.0 || distance_km > radius_km {
        return 0.0;
    }
    base_intensity * (1.0 - distance_km / radius_km).max(0.0)
}
