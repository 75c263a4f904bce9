//! Great-circle helpers on a spherical earth.

use model::{Coordinate, ModelError};

/// IUGG mean earth radius.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Haversine distance in meters. Inputs are assumed to be validated.
pub fn haversine_m(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // h can drift above 1 by an ulp for antipodal points
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

pub fn distance_meters(a: &Coordinate, b: &Coordinate) -> Result<f64, ModelError> {
    a.validate()?;
    b.validate()?;
    Ok(haversine_m(a, b))
}

/// Forward azimuth from `a` to `b`, degrees clockwise from north in [0, 360).
pub fn initial_bearing_deg(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// Point reached travelling `distance_m` from `origin` along `bearing_deg`.
pub fn destination(origin: &Coordinate, bearing_deg: f64, distance_m: f64) -> Coordinate {
    let delta = distance_m / EARTH_RADIUS_M;
    let theta = bearing_deg.to_radians();
    let lat1 = origin.latitude.to_radians();
    let lon1 = origin.longitude.to_radians();

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
    let lon2 = lon1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());
    Coordinate {
        latitude: lat2.to_degrees(),
        longitude: (lon2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0,
    }
}

/// Compass point for a bearing, e.g. "NE".
pub fn compass_point(bearing_deg: f64) -> &'static str {
    const POINTS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    let idx = ((bearing_deg.rem_euclid(360.0) + 22.5) / 45.0) as usize % 8;
    POINTS[idx]
}
