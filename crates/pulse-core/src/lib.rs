//! Core domain types for the pulse signal engine.
//!
//! This crate provides the types shared by every other crate:
//! - `Direction`, `Decision`, `Trend`, `SignalColor`: signal vocabulary
//! - `Timeframe`: candle intervals understood by the market feed
//! - `Candle`, `PriceTick`, `PriceSnapshot`: market data
//! - `IndicatorSet`, `Proposal`, `SubSignal`, `PipelineMeta`: analysis output
//! - `Position`, `CloseReason`: simulated positions

pub mod error;
pub mod lenient;
pub mod market;
pub mod position;
pub mod proposal;
pub mod signal;

use std::future::Future;
use std::pin::Pin;

pub use error::{CoreError, Result};
pub use market::{Candle, PriceSnapshot, PriceTick};
pub use position::{CloseReason, Position};
pub use proposal::{
    BollingerBands, DirectionVerdict, IndicatorSet, MacdValue, PipelineMeta, Proposal,
    ProposalOrigin, SubSignal,
};
pub use signal::{Decision, Direction, SignalColor, Timeframe, Trend};

/// Boxed future used by object-safe async traits across the workspace.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
