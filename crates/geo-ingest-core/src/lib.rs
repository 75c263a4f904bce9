//! Position stream contract shared by every geolocation source

use model::PositionSample;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::{task::JoinHandle, time::Instant};

#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("location permission denied: {0}")]
    PermissionDenied(String),
    #[error("position unavailable: {0}")]
    Unavailable(String),
    #[error("no position fix within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GeoError {
    /// Classifies an io failure while opening a device or socket.
    pub fn from_io(err: std::io::Error, what: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => GeoError::PermissionDenied(format!("{what}: {err}")),
            _ => GeoError::Unavailable(format!("{what}: {err}")),
        }
    }
}

#[derive(Debug)]
pub enum GeoEvent {
    Fix(PositionSample),
    Error(GeoError),
}

pub type PositionTx = crossbeam_channel::Sender<GeoEvent>;
pub type PositionRx = crossbeam_channel::Receiver<GeoEvent>;

/// Trait for any live position feed
#[async_trait::async_trait]
pub trait PositionSource: Send + Sync {
    async fn run(&self, tx: PositionTx) -> Result<(), GeoError>;
}

pub fn channel() -> (PositionTx, PositionRx) {
    crossbeam_channel::unbounded()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Fixes older than this (wall clock) are dropped as stale.
    pub maximum_age_ms: u64,
    /// Silence longer than this raises a `Timeout` event.
    pub timeout_ms: u64,
    /// Deadline for the very first fix.
    pub first_fix_timeout_ms: u64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self { maximum_age_ms: 5_000, timeout_ms: 15_000, first_fix_timeout_ms: 10_000 }
    }
}

/// Tracks fix arrival so a source can raise `Timeout` once per silent window
/// and drop stale fixes.
#[derive(Debug)]
pub struct Watchdog {
    opts: WatchOptions,
    deadline: Instant,
    got_fix: bool,
}

impl Watchdog {
    pub fn new(opts: WatchOptions, now: Instant) -> Self {
        let deadline = now + Duration::from_millis(opts.first_fix_timeout_ms);
        Self { opts, deadline, got_fix: false }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn on_fix(&mut self, now: Instant) {
        self.got_fix = true;
        self.deadline = now + Duration::from_millis(self.opts.timeout_ms);
    }

    /// Called when the deadline passes; re-arms for the next window.
    pub fn on_timeout(&mut self, now: Instant) -> GeoError {
        let waited = if self.got_fix { self.opts.timeout_ms } else { self.opts.first_fix_timeout_ms };
        self.deadline = now + Duration::from_millis(self.opts.timeout_ms);
        GeoError::Timeout(Duration::from_millis(waited))
    }

    pub fn is_stale(&self, sample: &PositionSample, now_unix_ms: i64) -> bool {
        now_unix_ms.saturating_sub(sample.timestamp_ms) > self.opts.maximum_age_ms as i64
    }
}

pub fn unix_now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Live subscription to a source. Dropping it releases the watch: the source
/// task is aborted and its sender goes away with it.
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn spawn<S: PositionSource + 'static>(src: S, tx: PositionTx) -> Self {
        let task = tokio::spawn(async move {
            if let Err(e) = src.run(tx.clone()).await {
                tracing::warn!("position source stopped: {e}");
                let _ = tx.send(GeoEvent::Error(e));
            }
        });
        Self { task }
    }

    /// True once the source returned on its own, e.g. a replay ran out of fixes.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
