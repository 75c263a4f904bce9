//! Segment tracker: decides when the driver is between two cameras and
//! accumulates distance and time while a segment is open.
//!
//! A camera "triggers" when it becomes the nearest camera inside its detection
//! radius. Triggers are edge-detected per camera: once fired, the camera stays
//! latched until the driver is outside its warning radius again.
//!
//! ```text
//! Idle  --trigger(C)-->             Open(start = C)
//! Open(C) --trigger(C)-->           Idle  (cancelled, nothing persisted)
//! Open(C) --trigger(D), D != C -->  Idle  (segment closed, handed to the gateway)
//! ```

use crate::directory::CameraDirectory;
use crate::geo::{compass_point, haversine_m, initial_bearing_deg};
use crate::proximity::classify;
use crate::speed::{average_speed_kmh, instant_speed_kmh};
use model::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackerError {
    #[error("segment {first} -> {second} has non-positive duration ({elapsed_s:.3} s)")]
    InvalidDuration { first: CameraId, second: CameraId, elapsed_s: f64 },
}

/// What happens at the camera that closes a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainPolicy {
    /// Back to idle; the next segment needs a fresh trigger.
    #[default]
    RequireFreshTrigger,
    /// The closing camera immediately starts the next segment.
    ReopenAtEnd,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub chain_policy: ChainPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    Open(OpenSegment),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Speed { kmh: f64 },
    CameraAhead { camera_id: CameraId, name: String, distance_m: f64, direction: &'static str, limit_kmh: u32 },
    CameraReached { camera_id: CameraId, name: String },
    OverLimit { camera_id: CameraId, speed_kmh: f64, limit_kmh: u32 },
    SegmentStarted(SegmentEndpoint),
    LiveAverage { kmh: f64 },
    SegmentCancelled { camera_id: CameraId },
    SegmentClosed(CompletedSegment),
    SegmentDiscarded(TrackerError),
}

/// Per-camera edge latch. A camera fires once, then stays quiet until the
/// position leaves its warning ring.
#[derive(Debug, Clone, Default)]
struct TriggerLatch {
    flagged: BTreeSet<CameraId>,
}

impl TriggerLatch {
    fn fire(&mut self, id: CameraId) -> bool {
        self.flagged.insert(id)
    }

    fn rearm(&mut self, position: &Coordinate, directory: &CameraDirectory) {
        self.flagged.retain(|id| match directory.get(*id) {
            Some(cam) => haversine_m(position, &cam.position) <= cam.warning_radius_m,
            None => false,
        });
    }
}

#[derive(Debug, Clone)]
pub struct TrackerState {
    config: TrackerConfig,
    phase: Phase,
    detection: TriggerLatch,
    announced: TriggerLatch,
    speeding: TriggerLatch,
    last_sample: Option<PositionSample>,
}

impl TrackerState {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            detection: TriggerLatch::default(),
            announced: TriggerLatch::default(),
            speeding: TriggerLatch::default(),
            last_sample: None,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn is_open(&self) -> bool {
        matches!(self.phase, Phase::Open(_))
    }

    pub fn last_sample(&self) -> Option<&PositionSample> {
        self.last_sample.as_ref()
    }

    /// Feeds one fix through speed estimation, classification and the
    /// segment state machine.
    pub fn on_sample(&mut self, sample: PositionSample, directory: &CameraDirectory) -> Vec<TrackerEvent> {
        if let Some(last) = &self.last_sample {
            if sample.timestamp_ms < last.timestamp_ms {
                debug!("ignoring out-of-order fix t={} (last t={})", sample.timestamp_ms, last.timestamp_ms);
                return Vec::new();
            }
        }

        let mut events = Vec::new();
        let speed_kmh = instant_speed_kmh(self.last_sample.as_ref(), &sample);
        events.push(TrackerEvent::Speed { kmh: speed_kmh });

        if let Phase::Open(open) = &mut self.phase {
            accumulate(open, &sample);
            if let Some(kmh) = average_speed_kmh(open.accumulated_distance_m, open.accumulated_time_s) {
                events.push(TrackerEvent::LiveAverage { kmh });
            }
        }

        let position = sample.coordinate;
        self.detection.rearm(&position, directory);
        self.announced.rearm(&position, directory);
        self.speeding.rearm(&position, directory);

        let cl = classify(&position, directory.cameras());

        if let Some(hit) = cl.nearest_in_warning {
            let cam = hit.camera;
            if !self.detection.flagged.contains(&cam.id) && self.announced.fire(cam.id) {
                events.push(TrackerEvent::CameraAhead {
                    camera_id: cam.id,
                    name: cam.name.clone(),
                    distance_m: hit.distance_m,
                    direction: compass_point(initial_bearing_deg(&position, &cam.position)),
                    limit_kmh: cam.speed_limit_kmh,
                });
            }
        }

        if let Some((_, hit)) = cl.primary() {
            let limit = hit.camera.speed_limit_kmh;
            if limit > 0 && speed_kmh > limit as f64 && self.speeding.fire(hit.camera.id) {
                events.push(TrackerEvent::OverLimit { camera_id: hit.camera.id, speed_kmh, limit_kmh: limit });
            }
        }

        if let Some(hit) = cl.nearest_in_detection {
            let cam = hit.camera;
            if self.detection.fire(cam.id) {
                // passing the camera also covers its warning announcement
                self.announced.fire(cam.id);
                events.push(TrackerEvent::CameraReached { camera_id: cam.id, name: cam.name.clone() });
                self.on_trigger(cam, &sample, &mut events);
            }
        }

        self.last_sample = Some(sample);
        events
    }

    fn on_trigger(&mut self, cam: &Camera, sample: &PositionSample, events: &mut Vec<TrackerEvent>) {
        let endpoint = SegmentEndpoint {
            camera_id: cam.id,
            camera_name: cam.name.clone(),
            coordinate: cam.position,
            timestamp_ms: sample.timestamp_ms,
        };

        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => self.open(endpoint, sample, events),
            Phase::Open(open) if open.start.camera_id == cam.id => {
                info!("segment from camera {} cancelled: same camera triggered again", cam.id);
                events.push(TrackerEvent::SegmentCancelled { camera_id: cam.id });
            }
            Phase::Open(open) => {
                match close(open, endpoint.clone()) {
                    Ok(done) => {
                        info!(
                            "segment {} -> {} closed: {:.1} km/h",
                            done.start.camera_id, done.end.camera_id, done.average_speed_kmh
                        );
                        events.push(TrackerEvent::SegmentClosed(done));
                    }
                    Err(e) => {
                        warn!("discarding segment: {e}");
                        events.push(TrackerEvent::SegmentDiscarded(e));
                    }
                }
                if self.config.chain_policy == ChainPolicy::ReopenAtEnd {
                    self.open(endpoint, sample, events);
                }
            }
        }
    }

    fn open(&mut self, start: SegmentEndpoint, sample: &PositionSample, events: &mut Vec<TrackerEvent>) {
        info!("segment started at camera {} ({})", start.camera_id, start.camera_name);
        events.push(TrackerEvent::SegmentStarted(start.clone()));
        self.phase = Phase::Open(OpenSegment {
            start,
            accumulated_distance_m: 0.0,
            accumulated_time_s: 0.0,
            last_sample: sample.clone(),
        });
    }
}

impl Default for TrackerState {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

fn accumulate(open: &mut OpenSegment, sample: &PositionSample) {
    open.accumulated_distance_m += haversine_m(&open.last_sample.coordinate, &sample.coordinate);
    open.accumulated_time_s += sample.timestamp_ms.saturating_sub(open.last_sample.timestamp_ms) as f64 / 1000.0;
    open.last_sample = sample.clone();
}

/// Turns an open segment into a completed one at `end`. Segments without
/// positive elapsed time are rejected.
pub fn close(open: OpenSegment, end: SegmentEndpoint) -> Result<CompletedSegment, TrackerError> {
    let invalid = || TrackerError::InvalidDuration {
        first: open.start.camera_id,
        second: end.camera_id,
        elapsed_s: open.accumulated_time_s,
    };
    if end.timestamp_ms <= open.start.timestamp_ms {
        return Err(invalid());
    }
    let average_speed_kmh =
        average_speed_kmh(open.accumulated_distance_m, open.accumulated_time_s).ok_or_else(invalid)?;
    Ok(CompletedSegment { start: open.start, end, average_speed_kmh })
}
