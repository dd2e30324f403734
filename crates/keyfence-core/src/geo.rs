//! Great-circle distance between coordinates.

use crate::types::Coordinate;

/// Mean Earth radius in meters.
pub const EARTH_MEAN_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in meters between two coordinates.
///
/// The intermediate term is clamped to `[0, 1]` so rounding near identical or
/// antipodal points cannot produce NaN.
#[must_use]
pub fn distance_meters(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat_a = a.latitude().to_radians();
    let lat_b = b.latitude().to_radians();
    let delta_lat = (b.latitude() - a.latitude()).to_radians();
    let delta_lon = (b.longitude() - a.longitude()).to_radians();

    let sin_dlat = (delta_lat / 2.0).sin();
    let sin_dlon = (delta_lon / 2.0).sin();
    let h = sin_dlon
        .mul_add(
            sin_dlon * lat_a.cos() * lat_b.cos(),
            sin_dlat * sin_dlat,
        )
        .clamp(0.0, 1.0);

    2.0 * EARTH_MEAN_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Returns `true` when `b` lies within `radius_m` of `a` (closed threshold).
#[inline]
#[must_use]
pub fn within_radius(a: &Coordinate, b: &Coordinate, radius_m: f64) -> bool {
    distance_meters(a, b) <= radius_m
}
