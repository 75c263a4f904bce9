//! Driving model shared by the speedtrap crates

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub const DEFAULT_DETECTION_RADIUS_M: f64 = 60.0;
pub const DEFAULT_WARNING_RADIUS_M: f64 = 350.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("invalid coordinate ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },
    #[error("invalid radius for camera {camera}: {radius_m} m")]
    InvalidRadius { camera: CameraId, radius_m: f64 },
    #[error("timestamp {0} ms is out of range")]
    InvalidTimestamp(i64),
    #[error("{0}")]
    Msg(String),
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ModelError> {
        let c = Self { latitude, longitude };
        c.validate()?;
        Ok(c)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let lat_ok = self.latitude.is_finite() && (-90.0..=90.0).contains(&self.latitude);
        let lon_ok = self.longitude.is_finite() && (-180.0..=180.0).contains(&self.longitude);
        if lat_ok && lon_ok {
            Ok(())
        } else {
            Err(ModelError::InvalidCoordinate {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct CameraId(pub i64);

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Camera {
    pub id: CameraId,
    pub name: String,
    pub position: Coordinate,
    pub speed_limit_kmh: u32,
    pub detection_radius_m: f64,
    pub warning_radius_m: f64,
}

/// One fix from a geolocation source.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct PositionSample {
    pub coordinate: Coordinate,
    #[serde(default)]
    pub instant_speed_mps: Option<f64>,
    #[serde(default)]
    pub heading_deg: Option<f64>,
    pub timestamp_ms: i64,
}

impl PositionSample {
    pub fn at(coordinate: Coordinate, timestamp_ms: i64) -> Self {
        Self { coordinate, instant_speed_mps: None, heading_deg: None, timestamp_ms }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct SegmentEndpoint {
    pub camera_id: CameraId,
    pub camera_name: String,
    pub coordinate: Coordinate,
    pub timestamp_ms: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OpenSegment {
    pub start: SegmentEndpoint,
    pub accumulated_distance_m: f64,
    pub accumulated_time_s: f64,
    pub last_sample: PositionSample,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct CompletedSegment {
    pub start: SegmentEndpoint,
    pub end: SegmentEndpoint,
    pub average_speed_kmh: f64,
}

/// A completed segment as the ledger stores it.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentRecord {
    pub user_id: Option<i64>,
    pub first_camera_id: CameraId,
    pub second_camera_id: CameraId,
    pub first_camera_name: String,
    pub second_camera_name: String,
    pub average_speed_kmh: f64,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
}

impl SegmentRecord {
    pub fn from_completed(seg: &CompletedSegment, user_id: Option<i64>) -> Result<Self, ModelError> {
        Ok(Self {
            user_id,
            first_camera_id: seg.start.camera_id,
            second_camera_id: seg.end.camera_id,
            first_camera_name: seg.start.camera_name.clone(),
            second_camera_name: seg.end.camera_name.clone(),
            average_speed_kmh: seg.average_speed_kmh,
            started_at: datetime_from_ms(seg.start.timestamp_ms)?,
            finished_at: datetime_from_ms(seg.end.timestamp_ms)?,
        })
    }
}

pub fn datetime_from_ms(ms: i64) -> Result<OffsetDateTime, ModelError> {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .map_err(|_| ModelError::InvalidTimestamp(ms))
}

// ---------- wire payloads ----------

/// Camera entry as served by `GET /api/cameras`. Numeric columns may arrive as
/// JSON strings (postgres NUMERIC), radii may be null.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct CameraRecord {
    pub id: i64,
    pub name: String,
    #[serde(deserialize_with = "number_or_string")]
    pub latitude: f64,
    #[serde(deserialize_with = "number_or_string")]
    pub longitude: f64,
    /// Display only: anything unreadable means "no posted limit".
    #[serde(default, deserialize_with = "lenient_limit")]
    pub limit_kmh: Option<u32>,
    #[serde(default, deserialize_with = "opt_number_or_string")]
    pub detection_radius_m: Option<f64>,
    #[serde(default, deserialize_with = "opt_number_or_string")]
    pub warning_radius_m: Option<f64>,
}

impl CameraRecord {
    /// Applies the 60/350 m radius defaults and validates the entry.
    pub fn into_camera(self) -> Result<Camera, ModelError> {
        let id = CameraId(self.id);
        let position = Coordinate::new(self.latitude, self.longitude)?;
        let detection = self.detection_radius_m.unwrap_or(DEFAULT_DETECTION_RADIUS_M);
        let warning = self.warning_radius_m.unwrap_or(DEFAULT_WARNING_RADIUS_M);
        for radius_m in [detection, warning] {
            if !radius_m.is_finite() || radius_m <= 0.0 {
                return Err(ModelError::InvalidRadius { camera: id, radius_m });
            }
        }
        Ok(Camera {
            id,
            name: self.name,
            position,
            speed_limit_kmh: self.limit_kmh.unwrap_or(0),
            detection_radius_m: detection,
            warning_radius_m: warning,
        })
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct SegmentCheck {
    pub exists: bool,
}

/// Body of `POST /api/segments`. The server stamps user and names itself.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSubmission {
    pub first_camera_id: CameraId,
    pub second_camera_id: CameraId,
    pub avg_speed_kmh: f64,
    pub started_at: String,
    pub finished_at: String,
}

impl TryFrom<&SegmentRecord> for SegmentSubmission {
    type Error = ModelError;

    fn try_from(r: &SegmentRecord) -> Result<Self, Self::Error> {
        let fmt = |t: &OffsetDateTime| t.format(&Rfc3339).map_err(|e| ModelError::Msg(e.to_string()));
        Ok(Self {
            first_camera_id: r.first_camera_id,
            second_camera_id: r.second_camera_id,
            avg_speed_kmh: r.average_speed_kmh,
            started_at: fmt(&r.started_at)?,
            finished_at: fmt(&r.finished_at)?,
        })
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct LedgerReply {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

impl NumberOrString {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            NumberOrString::Number(v) => Ok(v),
            NumberOrString::Text(s) => s.trim().parse().map_err(E::custom),
        }
    }
}

fn number_or_string<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    NumberOrString::deserialize(d)?.into_f64()
}

fn opt_number_or_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Option::<NumberOrString>::deserialize(d)?
        .map(NumberOrString::into_f64)
        .transpose()
}

fn lenient_limit<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    let limit = match Option::<serde_json::Value>::deserialize(d)? {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(limit
        .filter(|l| l.is_finite() && *l >= 0.0 && *l <= u32::MAX as f64)
        .map(|l| l.round() as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coordinate_bounds() {
        assert!(Coordinate::new(90.0, 180.0).is_ok());
        assert!(Coordinate::new(-90.0, -180.0).is_ok());
        assert!(matches!(
            Coordinate::new(90.5, 0.0),
            Err(ModelError::InvalidCoordinate { .. })
        ));
        assert!(Coordinate::new(0.0, -180.1).is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn camera_record_defaults_radii() {
        let rec: CameraRecord = serde_json::from_value(json!({
            "id": 7, "name": "Tsarigradsko", "latitude": 42.65, "longitude": 23.39,
            "limit_kmh": 80, "detection_radius_m": null
        }))
        .unwrap();
        let cam = rec.into_camera().unwrap();
        assert_eq!(cam.id, CameraId(7));
        assert_eq!(cam.speed_limit_kmh, 80);
        assert_eq!(cam.detection_radius_m, DEFAULT_DETECTION_RADIUS_M);
        assert_eq!(cam.warning_radius_m, DEFAULT_WARNING_RADIUS_M);
    }

    #[test]
    fn camera_record_accepts_numeric_strings() {
        let rec: CameraRecord = serde_json::from_value(json!({
            "id": 1, "name": "A", "latitude": "42.6977", "longitude": "23.3219",
            "limit_kmh": 50, "detection_radius_m": "75.5", "warning_radius_m": 400
        }))
        .unwrap();
        let cam = rec.into_camera().unwrap();
        assert_eq!(cam.position.latitude, 42.6977);
        assert_eq!(cam.detection_radius_m, 75.5);
        assert_eq!(cam.warning_radius_m, 400.0);
    }

    #[test]
    fn odd_limits_keep_the_camera() {
        let limit_of = |limit: serde_json::Value| {
            let rec: CameraRecord = serde_json::from_value(json!({
                "id": 9, "name": "L", "latitude": 42.0, "longitude": 23.0, "limit_kmh": limit
            }))
            .unwrap();
            rec.into_camera().unwrap().speed_limit_kmh
        };
        assert_eq!(limit_of(json!("60")), 60);
        assert_eq!(limit_of(json!(50.0)), 50);
        assert_eq!(limit_of(json!(-30)), 0);
        assert_eq!(limit_of(json!("fast")), 0);
        assert_eq!(limit_of(json!(null)), 0);
        assert_eq!(limit_of(json!(true)), 0);
    }

    #[test]
    fn camera_record_rejects_bad_entries() {
        let rec: CameraRecord = serde_json::from_value(json!({
            "id": 2, "name": "B", "latitude": 123.0, "longitude": 23.0
        }))
        .unwrap();
        assert!(matches!(rec.into_camera(), Err(ModelError::InvalidCoordinate { .. })));

        let rec: CameraRecord = serde_json::from_value(json!({
            "id": 3, "name": "C", "latitude": 42.0, "longitude": 23.0, "detection_radius_m": -5
        }))
        .unwrap();
        assert_eq!(
            rec.into_camera(),
            Err(ModelError::InvalidRadius { camera: CameraId(3), radius_m: -5.0 })
        );

        assert!(serde_json::from_value::<CameraRecord>(json!({"id": 4, "name": "D"})).is_err());
    }

    #[test]
    fn submission_body_is_camel_case_iso8601() {
        let endpoint = |id: i64, name: &str, ts: i64| SegmentEndpoint {
            camera_id: CameraId(id),
            camera_name: name.into(),
            coordinate: Coordinate { latitude: 0.0, longitude: 0.0 },
            timestamp_ms: ts,
        };
        let seg = CompletedSegment {
            start: endpoint(1, "A", 1_700_000_000_000),
            end: endpoint(2, "B", 1_700_000_060_000),
            average_speed_kmh: 60.0,
        };
        let record = SegmentRecord::from_completed(&seg, Some(42)).unwrap();
        assert_eq!(record.user_id, Some(42));
        assert_eq!(record.first_camera_name, "A");

        let body = serde_json::to_value(SegmentSubmission::try_from(&record).unwrap()).unwrap();
        assert_eq!(body["firstCameraId"], 1);
        assert_eq!(body["secondCameraId"], 2);
        assert_eq!(body["avgSpeedKmh"], 60.0);
        assert_eq!(body["startedAt"], "2023-11-14T22:13:20Z");
        assert_eq!(body["finishedAt"], "2023-11-14T22:14:20Z");
    }
}
