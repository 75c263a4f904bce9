//! Clients for the camera directory and segment ledger services, and the
//! gateway that decides which completed segments get persisted.

pub mod gateway;
pub mod http;

pub use gateway::{SegmentLedger, SubmissionGateway, SubmissionOutcome};
pub use http::{HttpLedger, ServerConfig};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("segment submission failed: {0}")]
    SubmissionFailed(String),
}
