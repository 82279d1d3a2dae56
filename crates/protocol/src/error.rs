//! Protocol error types.

use thiserror::Error;

/// Errors produced while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed message: {0}")]
    Malformed(String),

    /// The first array element named a message kind this client does not
    /// speak. Surfaced rather than skipped: it indicates a protocol-version
    /// mismatch with the relay.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("key error: {0}")]
    Key(String),
}

/// Reasons an event fails identity validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("event id mismatch: stored {stored}, computed {computed}")]
    IdMismatch { stored: String, computed: String },

    #[error("signature verification failed: {0}")]
    BadSignature(String),

    #[error("malformed field: {0}")]
    Malformed(String),
}

/// Protocol result type.
pub type Result<T> = std::result::Result<T, ProtocolError>;
