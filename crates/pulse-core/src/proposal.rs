//! Analysis output: indicators, proposals and pipeline metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lenient;
use crate::signal::{Decision, Direction, SignalColor, Timeframe, Trend};

/// MACD line, signal line and histogram at the last bar.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Bollinger band triple at the last bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    /// Band width relative to the middle band.
    pub fn width_ratio(&self) -> f64 {
        if self.middle == 0.0 {
            return 0.0;
        }
        (self.upper - self.lower) / self.middle
    }
}

/// Indicator snapshot derived from a candle series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub price: f64,
    pub ema9: f64,
    pub ema21: f64,
    /// `None` until 50 bars are available.
    pub ema50: Option<f64>,
    pub rsi: f64,
    pub macd: MacdValue,
    pub bollinger: Option<BollingerBands>,
    pub atr: f64,
    pub stoch_k: f64,
    pub volume_ratio: f64,
    pub trend: Trend,
}

/// Where a proposal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalOrigin {
    #[default]
    Remote,
    Local,
}

/// One auxiliary evaluator's opinion embedded in a proposal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubSignal {
    #[serde(default)]
    pub name: String,
    /// Raw vocabulary as produced by the evaluator.
    #[serde(default)]
    pub signal: String,
    /// Normalized colour, filled in by the arbiter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<SignalColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SubSignal {
    pub fn new(name: impl Into<String>, signal: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signal: signal.into(),
            ..Self::default()
        }
    }
}

/// Decision/confidence pair for one evaluated side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionVerdict {
    pub decision: Decision,
    pub confidence: f64,
}

/// Timing and debug metadata attached by the arbiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMeta {
    pub analyzed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub long: Option<DirectionVerdict>,
    pub short: Option<DirectionVerdict>,
    pub chosen_direction: Direction,
    pub stability_filtered: bool,
    /// Fraction of green sub-signals, `None` when there are none.
    pub alignment: Option<f64>,
    pub green_signals: usize,
    pub total_signals: usize,
    /// Produced by the single-direction fallback path.
    #[serde(default)]
    pub degraded: bool,
}

/// A directional trade proposal.
///
/// Remote evaluators return loosely-typed JSON, so every field tolerates absence and
/// string-encoded numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub decision: Decision,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub confidence: f64,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub price: f64,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub tp: f64,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub sl: f64,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub liq: f64,
    #[serde(default = "default_leverage", deserialize_with = "lenient::u32_or_default")]
    pub leverage: u32,
    #[serde(default, alias = "interval", deserialize_with = "lenient::or_none")]
    pub timeframe: Option<Timeframe>,
    #[serde(default, alias = "rrRatio", deserialize_with = "lenient::opt_f64")]
    pub rr_ratio: Option<f64>,
    #[serde(default)]
    pub reason: String,
    #[serde(default, deserialize_with = "lenient::or_none")]
    pub indicators: Option<IndicatorSet>,
    #[serde(default, alias = "bots", alias = "sourceBots")]
    pub source_bots: Vec<SubSignal>,
    #[serde(default)]
    pub origin: ProposalOrigin,
    /// Set when a stability filter replaced the evaluator's output.
    #[serde(default)]
    pub filtered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineMeta>,
}

fn default_leverage() -> u32 {
    1
}

impl Proposal {
    /// An empty WAIT proposal used when nothing can be said about the market.
    pub fn wait(
        symbol: impl Into<String>,
        direction: Direction,
        confidence: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            decision: Decision::Wait,
            confidence,
            price: 0.0,
            tp: 0.0,
            sl: 0.0,
            liq: 0.0,
            leverage: 1,
            timeframe: None,
            rr_ratio: None,
            reason: reason.into(),
            indicators: None,
            source_bots: Vec::new(),
            origin: ProposalOrigin::Local,
            filtered: false,
            pipeline: None,
        }
    }

    /// Arbitration score: ENTER outranks everything, confidence breaks ties.
    pub fn rank_score(&self) -> f64 {
        let enter_bonus = if self.decision == Decision::Enter { 100.0 } else { 0.0 };
        enter_bonus + self.confidence
    }

    /// True when TP/SL sit on the correct sides of the entry price.
    pub fn levels_consistent(&self) -> bool {
        match self.direction {
            Direction::Long => self.tp > self.price && self.price > self.sl,
            Direction::Short => self.tp < self.price && self.price < self.sl,
            Direction::Neutral => false,
        }
    }
}
