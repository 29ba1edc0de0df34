//! Position error types.

use pulse_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Position not found: {0}")]
    NotFound(String),

    #[error("Position limit reached: {0} open")]
    LimitExceeded(usize),

    #[error("Insufficient balance: required {required:.2}, available {available:.2}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("Fee {fee:.4} too high for margin {margin:.2}")]
    FeeTooHigh { fee: f64, margin: f64 },

    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type PositionResult<T> = Result<T, PositionError>;
