use crate::LedgerError;
use async_trait::async_trait;
use model::{CameraId, CompletedSegment, SegmentRecord};
use std::sync::Arc;
use tracing::{info, warn};

/// Remote store of official segments and of the segments users completed on them.
#[async_trait]
pub trait SegmentLedger: Send + Sync {
    /// Whether `(first, second)` is a registered segment. Order matters.
    async fn segment_exists(&self, first: CameraId, second: CameraId) -> Result<bool, LedgerError>;
    async fn submit(&self, record: &SegmentRecord) -> Result<(), LedgerError>;
}

#[derive(Debug)]
pub enum SubmissionOutcome {
    Submitted(SegmentRecord),
    NotOfficial { first: CameraId, second: CameraId },
    Failed(LedgerError),
}

/// Filters completed segments against the ledger and persists the official ones.
pub struct SubmissionGateway<L: ?Sized> {
    ledger: Arc<L>,
    user_id: Option<i64>,
}

impl<L: ?Sized> Clone for SubmissionGateway<L> {
    fn clone(&self) -> Self {
        Self { ledger: Arc::clone(&self.ledger), user_id: self.user_id }
    }
}

impl<L: SegmentLedger + ?Sized> SubmissionGateway<L> {
    pub fn new(ledger: Arc<L>, user_id: Option<i64>) -> Self {
        Self { ledger, user_id }
    }

    /// Checks the ordered camera pair and submits at most once. Errors end up in
    /// the outcome, never in the caller.
    pub async fn handle(&self, candidate: &CompletedSegment) -> SubmissionOutcome {
        let first = candidate.start.camera_id;
        let second = candidate.end.camera_id;

        match self.ledger.segment_exists(first, second).await {
            Ok(true) => {}
            Ok(false) => {
                info!("{first} -> {second} is not an official segment, dropping");
                return SubmissionOutcome::NotOfficial { first, second };
            }
            Err(e) => {
                warn!("segment check {first} -> {second} failed: {e}");
                return SubmissionOutcome::Failed(e);
            }
        }

        let record = match SegmentRecord::from_completed(candidate, self.user_id) {
            Ok(r) => r,
            Err(e) => return SubmissionOutcome::Failed(LedgerError::SubmissionFailed(e.to_string())),
        };
        match self.ledger.submit(&record).await {
            Ok(()) => {
                info!("submitted {first} -> {second} at {:.1} km/h", record.average_speed_kmh);
                SubmissionOutcome::Submitted(record)
            }
            Err(e) => {
                warn!("submitting {first} -> {second} failed: {e}");
                SubmissionOutcome::Failed(e)
            }
        }
    }
}
