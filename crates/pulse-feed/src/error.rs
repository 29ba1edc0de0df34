//! Feed error types.

use pulse_gateway::GatewayError;
use pulse_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid refresh rate: {0}")]
    InvalidRate(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type FeedResult<T> = Result<T, FeedError>;
