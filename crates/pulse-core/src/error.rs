//! Error types for pulse-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    #[error("Invalid timeframe: {0}")]
    InvalidTimeframe(String),

    #[error("Invalid direction: {0}")]
    InvalidDirection(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
