//! Client error types.

use thiserror::Error;

/// Client error type.
///
/// Transport-level trouble (a relay going away, a failed handshake) is
/// reported through the connection-status stream, not here; these errors
/// cover misuse and local failures.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid relay url: {0}")]
    InvalidUrl(String),

    #[error("not connected")]
    NotConnected,

    #[error("relay limit reached ({0} relays)")]
    PoolLimit(usize),

    #[error(transparent)]
    Protocol(#[from] weir_protocol::ProtocolError),

    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Client result type.
pub type Result<T> = std::result::Result<T, ClientError>;
