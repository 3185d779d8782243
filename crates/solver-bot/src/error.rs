//! Error types for the solver binary.

use thiserror::Error;

/// Application error types.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("Core error: {0}")]
    Core(#[from] solver_core::CoreError),

    #[error("Venue error: {0}")]
    Venue(#[from] solver_venue::VenueError),

    #[error("Chain error: {0}")]
    Chain(#[from] solver_chain::ChainError),

    #[error("Risk error: {0}")]
    Risk(#[from] solver_risk::RiskError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] solver_persistence::PersistenceError),
}

/// Result type alias for application operations.
pub type AppResult<T> = std::result::Result<T, AppError>;
