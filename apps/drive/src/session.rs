use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use analysis::{CameraDirectory, TrackerConfig, TrackerEvent, TrackerState};
use geo_ingest_core::{GeoError, GeoEvent, PositionRx};
use iox::TraceRecorder;
use ledger_client::{SegmentLedger, SubmissionGateway, SubmissionOutcome};
use model::{CompletedSegment, PositionSample};

use crate::notices::{DriverNotice, NoticeTx};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    pub samples: u64,
    pub rejected: u64,
    pub gps_errors: u64,
    pub segments_closed: u64,
    pub segments_discarded: u64,
    pub submitted: u64,
    pub not_official: u64,
    pub failed: u64,
}

/// One driving session: owns the tracker, consumes position events and
/// hands completed segments to the gateway in the background.
pub struct DriveSession {
    id: Uuid,
    directory: Arc<CameraDirectory>,
    tracker: TrackerState,
    gateway: SubmissionGateway<dyn SegmentLedger>,
    notices: NoticeTx,
    runtime: Handle,
    recorder: Option<TraceRecorder>,
    pending: Vec<JoinHandle<()>>,
    summary: Arc<Mutex<SessionSummary>>,
    got_fix: bool,
}

impl DriveSession {
    pub fn new(
        directory: Arc<CameraDirectory>,
        tracker: TrackerConfig,
        gateway: SubmissionGateway<dyn SegmentLedger>,
        notices: NoticeTx,
        runtime: Handle,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            directory,
            tracker: TrackerState::new(tracker),
            gateway,
            notices,
            runtime,
            recorder: None,
            pending: Vec::new(),
            summary: Arc::new(Mutex::new(SessionSummary::default())),
            got_fix: false,
        }
    }

    pub fn with_recorder(mut self, recorder: TraceRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Pumps events until every sender is gone. Blocks the calling thread, so
    /// run it on a blocking thread, never inside an async task.
    pub fn run(mut self, rx: PositionRx) -> SessionSummary {
        let span = info_span!("session", id = %self.id);
        let _enter = span.enter();
        info!("session started with {} cameras", self.directory.len());
        for event in rx.iter() {
            self.on_event(event);
        }
        self.finish()
    }

    pub fn on_event(&mut self, event: GeoEvent) {
        match event {
            GeoEvent::Fix(sample) => self.feed_sample(sample),
            GeoEvent::Error(e) => self.on_geo_error(e),
        }
    }

    pub fn feed_sample(&mut self, sample: PositionSample) {
        if let Err(e) = sample.coordinate.validate() {
            warn!("dropping fix at t={}: {e}", sample.timestamp_ms);
            self.summary.lock().rejected += 1;
            return;
        }
        if !self.got_fix {
            self.got_fix = true;
            self.notify(DriverNotice::Status("GPS active".into()));
        }
        self.summary.lock().samples += 1;

        if let Some(rec) = &mut self.recorder {
            if let Err(e) = rec.record(&sample) {
                warn!("trace recording stopped: {e:#}");
                self.recorder = None;
            }
        }

        let directory = Arc::clone(&self.directory);
        for event in self.tracker.on_sample(sample, &directory) {
            self.dispatch(event);
        }
    }

    fn on_geo_error(&mut self, e: GeoError) {
        self.summary.lock().gps_errors += 1;
        let text = match &e {
            GeoError::PermissionDenied(_) => format!("GPS permission denied or error: {e}"),
            _ => format!("GPS error: {e}"),
        };
        self.notify(DriverNotice::Status(text));
    }

    fn dispatch(&mut self, event: TrackerEvent) {
        match event {
            TrackerEvent::Speed { kmh } => self.notify(DriverNotice::Speed { kmh }),
            TrackerEvent::LiveAverage { kmh } => self.notify(DriverNotice::AverageSpeed { kmh: Some(kmh) }),
            TrackerEvent::CameraAhead { name, distance_m, direction, limit_kmh, .. } => {
                self.notify(DriverNotice::CameraAhead { name, distance_m, direction, limit_kmh })
            }
            TrackerEvent::CameraReached { name, .. } => self.notify(DriverNotice::Camera { name }),
            TrackerEvent::OverLimit { speed_kmh, limit_kmh, .. } => {
                self.notify(DriverNotice::OverLimit { speed_kmh, limit_kmh })
            }
            TrackerEvent::SegmentStarted(start) => {
                self.notify(DriverNotice::Status(format!("Segment started at {}", start.camera_name)));
                self.notify(DriverNotice::AverageSpeed { kmh: None });
            }
            TrackerEvent::SegmentCancelled { camera_id } => {
                debug!("segment at camera {camera_id} cancelled");
                self.notify(DriverNotice::Status("Segment cancelled".into()));
                self.notify(DriverNotice::AverageSpeed { kmh: None });
            }
            TrackerEvent::SegmentDiscarded(e) => {
                self.summary.lock().segments_discarded += 1;
                debug!("{e}");
                self.notify(DriverNotice::Status("Invalid time difference between cameras".into()));
                self.notify(DriverNotice::AverageSpeed { kmh: None });
            }
            TrackerEvent::SegmentClosed(done) => {
                self.summary.lock().segments_closed += 1;
                self.notify(DriverNotice::Status(format!(
                    "Between {} and {}",
                    done.start.camera_name, done.end.camera_name
                )));
                self.notify(DriverNotice::AverageSpeed { kmh: Some(done.average_speed_kmh) });
                self.submit(done);
            }
        }
    }

    /// Fire and forget: the run loop never waits on the ledger.
    fn submit(&mut self, done: CompletedSegment) {
        self.pending.retain(|h| !h.is_finished());
        let gateway = self.gateway.clone();
        let notices = self.notices.clone();
        let summary = Arc::clone(&self.summary);
        let task = async move {
            let notice = match gateway.handle(&done).await {
                SubmissionOutcome::Submitted(rec) => {
                    summary.lock().submitted += 1;
                    DriverNotice::Saved {
                        first: rec.first_camera_id,
                        second: rec.second_camera_id,
                        kmh: rec.average_speed_kmh,
                    }
                }
                SubmissionOutcome::NotOfficial { .. } => {
                    summary.lock().not_official += 1;
                    DriverNotice::Toast(format!(
                        "{} -> {} is not an official segment",
                        done.start.camera_name, done.end.camera_name
                    ))
                }
                SubmissionOutcome::Failed(e) => {
                    summary.lock().failed += 1;
                    DriverNotice::Toast(format!("Could not save segment: {e}"))
                }
            };
            let _ = notices.send(notice);
        };
        self.pending.push(self.runtime.spawn(task.instrument(Span::current())));
    }

    fn notify(&self, notice: DriverNotice) {
        // presenter gone means nobody is watching; tracking goes on
        let _ = self.notices.send(notice);
    }

    fn finish(&mut self) -> SessionSummary {
        if let Some(rec) = &mut self.recorder {
            if let Err(e) = rec.flush() {
                warn!("flushing trace failed: {e:#}");
            }
        }
        for handle in self.pending.drain(..) {
            if let Err(e) = self.runtime.block_on(handle) {
                warn!("submission task died: {e}");
            }
        }
        let summary = self.summary.lock().clone();
        info!(
            "session ended: {} samples, {} segments closed, {} submitted",
            summary.samples, summary.segments_closed, summary.submitted
        );
        summary
    }
}
