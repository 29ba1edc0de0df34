//! Technical indicators and the local decision scorer.
//!
//! The scorer is the offline fallback decision maker: it turns a candle series into an
//! `IndicatorSet`, accumulates weighted bull/bear points, resolves a direction and sizes
//! TP/SL/liquidation levels from ATR.
//!
//! Nothing in this crate fails: short or degenerate input yields neutral defaults.

pub mod config;
pub mod indicators;
pub mod levels;
pub mod scorer;

pub use config::{NeutralScore, ScorerConfig};
pub use indicators::compute_indicators;
pub use levels::{price_precision, TradeLevels};
pub use scorer::{Bias, DecisionScorer, Reason, SetupScore};
