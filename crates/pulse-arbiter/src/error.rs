//! Arbiter error types.

use pulse_gateway::GatewayError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ArbiterError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),
}

impl ArbiterError {
    /// The request was dropped by a context switch; not worth a fallback.
    pub fn is_abandoned(&self) -> bool {
        matches!(self, Self::Gateway(e) if e.is_abandoned())
    }
}

pub type ArbiterResult<T> = Result<T, ArbiterError>;
