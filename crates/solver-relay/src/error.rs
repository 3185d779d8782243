//! Error types for solver-relay.

use thiserror::Error;

/// Relay error types.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Publish timed out")]
    PublishTimeout,

    #[error("Another solver won the quote")]
    SolverLost,

    #[error("Relay error {code}: {message}")]
    Relay { code: i64, message: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Result type alias for relay operations.
pub type RelayResult<T> = std::result::Result<T, RelayError>;
