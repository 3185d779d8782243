//! Error types for solver-chain.

use thiserror::Error;

/// Chain error types.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("View call failed: {0}")]
    View(String),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Deserialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type alias for chain operations.
pub type ChainResult<T> = std::result::Result<T, ChainError>;
