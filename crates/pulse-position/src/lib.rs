//! Simulated position management.
//!
//! # Key Components
//!
//! - [`PositionWatchdog`]: background task closing positions whose exit thresholds were hit
//! - [`evaluate_exit`]: pure TP / SL / liquidation check for one position
//! - [`PositionBook`]: paper book (balance, open positions, trade history)
//! - [`ExecutionSink`]: receives close requests from the watchdog

pub mod book;
pub mod error;
pub mod watchdog;

pub use book::{BookConfig, ClosedTrade, PositionBook, LIQUIDATION_FACTOR};
pub use error::{PositionError, PositionResult};
pub use watchdog::{
    evaluate_exit, ExecutionSink, PositionSource, PositionWatchdog, PriceProvider,
    WATCHDOG_INTERVAL,
};
