//! Request gateway.
//!
//! Every remote call the engine issues goes through this crate:
//! - `RequestGateway`: FIFO queue bounding concurrent calls (default 2)
//! - `run_with_retry`: per-attempt timeout and exponential backoff
//! - `MarketClient`: price, kline and remote-analysis endpoints over reqwest

pub mod client;
pub mod error;
pub mod queue;
pub mod retry;

pub use client::{AnalyzeRequest, Endpoints, MarketClient};
pub use error::{GatewayError, GatewayResult};
pub use queue::RequestGateway;
pub use retry::{run_with_retry, RetryPolicy, RetryTask, TaskState};
