//! Prometheus metrics and structured logging for the pulse signal engine.
//!
//! - Structured logging with tracing (pretty in development, JSON in production)
//! - Prometheus metrics for the gateway, feed, arbiter and watchdog

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, init_logging_with_default};
pub use metrics::Metrics;
