//! Ingestion error types.

use thiserror::Error;

/// Errors that can occur during ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The storage collaborator refused a write.
    #[error("store error: {0}")]
    Store(String),

    /// The pipeline's drain task is gone; no more events will be accepted.
    #[error("pipeline shut down")]
    Closed,
}

/// Ingestion result type.
pub type Result<T> = std::result::Result<T, IngestError>;
