use crate::geo::haversine_m;
use model::PositionSample;

pub const MPS_TO_KMH: f64 = 3.6;

/// Current speed in km/h. Prefers the device-reported speed; otherwise uses
/// displacement over time since `prev`.
pub fn instant_speed_kmh(prev: Option<&PositionSample>, cur: &PositionSample) -> f64 {
    if let Some(mps) = cur.instant_speed_mps.filter(|v| v.is_finite()) {
        return mps * MPS_TO_KMH;
    }
    let Some(prev) = prev else { return 0.0 };
    let dt_s = cur.timestamp_ms.saturating_sub(prev.timestamp_ms) as f64 / 1000.0;
    if dt_s <= 0.0 {
        return 0.0;
    }
    haversine_m(&prev.coordinate, &cur.coordinate) / dt_s * MPS_TO_KMH
}

/// Average speed over an accumulated interval, `None` for non-positive time.
pub fn average_speed_kmh(distance_m: f64, time_s: f64) -> Option<f64> {
    (time_s > 0.0).then(|| (distance_m / 1000.0) / (time_s / 3600.0))
}
