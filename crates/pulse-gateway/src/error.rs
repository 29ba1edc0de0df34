//! Gateway error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("Request timed out after {after_ms}ms: {url}")]
    Timeout { url: String, after_ms: u64 },

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    /// The task was still queued when the queue was drained.
    #[error("Queue cleared")]
    QueueCleared,

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Abandoned by a context switch rather than failed.
    pub fn is_abandoned(&self) -> bool {
        matches!(self, Self::QueueCleared)
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Status { .. } | Self::Transport(_) | Self::Decode(_)
        )
    }

    /// Metrics label.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Status { .. } => "status",
            Self::Transport(_) => "transport",
            Self::Decode(_) => "decode",
            Self::QueueCleared => "cleared",
            Self::HttpClient(_) => "client",
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
