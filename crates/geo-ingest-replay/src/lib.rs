use geo_ingest_core::*;
use model::PositionSample;
use std::path::Path;
use tokio::time::{self, Duration};
use tracing::info;

/// Plays a recorded trace back as a live feed.
pub struct ReplaySource {
    samples: Vec<PositionSample>,
    /// Playback rate; 0 disables pacing.
    speedup: f64,
}

impl ReplaySource {
    pub fn new(samples: Vec<PositionSample>, speedup: f64) -> Self {
        Self { samples, speedup }
    }

    pub fn from_path(path: &Path, speedup: f64) -> Result<Self, GeoError> {
        if !path.exists() {
            return Err(GeoError::Unavailable(format!("trace {} not found", path.display())));
        }
        let samples = iox::import_trace(path)?;
        info!("loaded {} fixes from {}", samples.len(), path.display());
        Ok(Self::new(samples, speedup))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[async_trait::async_trait]
impl PositionSource for ReplaySource {
    async fn run(&self, tx: PositionTx) -> Result<(), GeoError> {
        let mut prev_ts: Option<i64> = None;
        for s in &self.samples {
            if let (Some(prev), true) = (prev_ts, self.speedup > 0.0) {
                time::sleep(pacing_delay(prev, s.timestamp_ms, self.speedup)).await;
            }
            prev_ts = Some(s.timestamp_ms);
            if tx.send(GeoEvent::Fix(s.clone())).is_err() {
                return Ok(());
            }
        }
        info!("trace finished after {} fixes", self.samples.len());
        Ok(())
    }
}

/// Wall-clock wait between two fixes at the given playback rate.
fn pacing_delay(prev_ms: i64, next_ms: i64, speedup: f64) -> Duration {
    let gap_ms = next_ms.saturating_sub(prev_ms).max(0) as f64 / speedup;
    Duration::from_micros((gap_ms * 1000.0) as u64)
}
