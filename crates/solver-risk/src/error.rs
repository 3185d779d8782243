//! Error types for solver-risk.

use thiserror::Error;

/// Risk error types.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Snapshot refresh failed: {0}")]
    Refresh(#[from] solver_venue::VenueError),

    #[error("Refresh already in flight")]
    RefreshInFlight,
}

/// Result type alias for risk operations.
pub type RiskResult<T> = std::result::Result<T, RiskError>;
