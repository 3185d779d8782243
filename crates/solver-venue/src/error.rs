//! Error types for solver-venue.

use thiserror::Error;

/// Venue error types.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("Order book stale: age {age_ms}ms")]
    BookStale { age_ms: i64 },

    #[error("Order book side is empty")]
    BookEmpty,

    #[error("Insufficient liquidity: requested {requested}, available {available}")]
    InsufficientLiquidity { requested: f64, available: f64 },

    #[error("Venue client not initialized")]
    NotInitialized,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Order rejected by venue: {0}")]
    OrderRejected(String),

    #[error("Deserialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type alias for venue operations.
pub type VenueResult<T> = std::result::Result<T, VenueError>;
