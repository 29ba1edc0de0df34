//! Decision scorer: weighted bull/bear point accumulation over an `IndicatorSet`.
//!
//! # Scoring
//!
//! | Rule | Points |
//! |---|---|
//! | EMA9 vs EMA21 ordering | 15, plus 10 when price is beyond EMA9 |
//! | RSI < 30 / > 70 | 15 |
//! | RSI < 40 / > 60 | 8 |
//! | MACD histogram and line/signal agree | 15 |
//! | Price within 0.5% of a Bollinger band | 12 |
//! | Volume > 1.5x average, with trend | 8 |
//! | EMA21 vs EMA50 consistent with trend | 10 |
//!
//! A side wins only with a lead of more than 10 points.

use pulse_core::{
    Candle, Decision, Direction, IndicatorSet, Proposal, ProposalOrigin, Timeframe, Trend,
};
use rand::Rng;
use tracing::debug;

use crate::config::{NeutralScore, ScorerConfig};
use crate::indicators::compute_indicators;
use crate::levels::TradeLevels;

const NEUTRAL_MIDPOINT: f64 = 45.0;
const INSUFFICIENT_CONFIDENCE: f64 = 30.0;
const CONFLICT_PENALTY: f64 = 20.0;
const CONFLICT_FLOOR: f64 = 25.0;
const MIN_LEAD: u32 = 10;

/// Which side a reason supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    Bull,
    Bear,
    Neutral,
}

/// A human-readable scoring reason.
#[derive(Debug, Clone, PartialEq)]
pub struct Reason {
    pub bias: Bias,
    pub weight: u32,
    pub text: String,
}

impl Reason {
    fn new(bias: Bias, weight: u32, text: impl Into<String>) -> Self {
        Self {
            bias,
            weight,
            text: text.into(),
        }
    }
}

/// Result of scoring one indicator snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupScore {
    pub bull: u32,
    pub bear: u32,
    pub score: f64,
    pub suggested: Direction,
    /// Sorted by weight, heaviest first.
    pub reasons: Vec<Reason>,
}

/// Local, deterministic (with the default config) decision maker.
#[derive(Debug, Clone, Default)]
pub struct DecisionScorer {
    config: ScorerConfig,
}

impl DecisionScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Produce a proposal for `symbol` from its candle history.
    ///
    /// `requested` is the direction the caller wants evaluated; `None` (or NEUTRAL) lets
    /// the indicators choose. Never fails: short history yields a WAIT/NEUTRAL proposal
    /// with confidence 30.
    pub fn evaluate(
        &self,
        symbol: &str,
        candles: &[Candle],
        requested: Option<Direction>,
        leverage: u32,
        timeframe: Timeframe,
    ) -> Proposal {
        let requested = requested.filter(Direction::is_tradeable);

        let indicators = match compute_indicators(candles) {
            Some(set) if candles.len() >= self.config.min_candles => set,
            _ => {
                debug!(
                    symbol,
                    candles = candles.len(),
                    required = self.config.min_candles,
                    "Not enough candles to score"
                );
                let mut proposal = Proposal::wait(
                    symbol,
                    Direction::Neutral,
                    INSUFFICIENT_CONFIDENCE,
                    format!(
                        "insufficient data: {} candles, need {}",
                        candles.len(),
                        self.config.min_candles
                    ),
                );
                proposal.price = candles.last().map(|c| c.close).unwrap_or(0.0);
                proposal.leverage = leverage.max(1);
                proposal.timeframe = Some(timeframe);
                return proposal;
            }
        };

        let setup = self.score_setup(&indicators, requested);
        let conflict = matches!(
            requested,
            Some(dir) if setup.suggested.is_tradeable() && dir != setup.suggested
        );

        let mut decision = if setup.score >= self.config.enter_threshold {
            Decision::Enter
        } else if setup.score >= self.config.wait_threshold {
            Decision::Wait
        } else {
            Decision::Cancel
        };
        if conflict {
            decision = Decision::Wait;
        }

        let direction = requested.unwrap_or(setup.suggested);
        let price = indicators.price;
        let levels = TradeLevels::compute(
            price,
            direction,
            leverage,
            timeframe,
            indicators.atr,
            self.config.liquidation_factor,
        );

        let reason = if setup.reasons.is_empty() {
            "automatic technical analysis".to_string()
        } else {
            setup
                .reasons
                .iter()
                .take(3)
                .map(|r| r.text.as_str())
                .collect::<Vec<_>>()
                .join(" | ")
        };

        debug!(
            symbol,
            bull = setup.bull,
            bear = setup.bear,
            score = setup.score,
            suggested = %setup.suggested,
            %direction,
            %decision,
            "Setup scored"
        );

        Proposal {
            symbol: symbol.to_string(),
            direction,
            decision,
            confidence: setup.score.clamp(20.0, 95.0),
            price,
            tp: levels.map(|l| l.tp).unwrap_or(0.0),
            sl: levels.map(|l| l.sl).unwrap_or(0.0),
            liq: levels.map(|l| l.liq).unwrap_or(0.0),
            leverage: leverage.max(1),
            timeframe: Some(timeframe),
            rr_ratio: levels.and_then(|l| l.rr_ratio()),
            reason,
            indicators: Some(indicators),
            source_bots: Vec::new(),
            origin: ProposalOrigin::Local,
            filtered: false,
            pipeline: None,
        }
    }

    /// Accumulate bull/bear points and resolve a suggested direction.
    pub fn score_setup(&self, ind: &IndicatorSet, requested: Option<Direction>) -> SetupScore {
        let mut bull = 0u32;
        let mut bear = 0u32;
        let mut reasons = Vec::new();

        // EMA structure
        if ind.ema9 > ind.ema21 {
            bull += 15;
            if ind.price > ind.ema9 {
                bull += 10;
                reasons.push(Reason::new(Bias::Bull, 10, "price above rising EMAs"));
            }
        } else if ind.ema9 < ind.ema21 {
            bear += 15;
            if ind.price < ind.ema9 {
                bear += 10;
                reasons.push(Reason::new(Bias::Bear, 10, "price below falling EMAs"));
            }
        }

        // RSI
        if ind.rsi < 30.0 {
            bull += 15;
            reasons.push(Reason::new(Bias::Bull, 15, format!("RSI oversold ({:.0})", ind.rsi)));
        } else if ind.rsi < 40.0 {
            bull += 8;
        } else if ind.rsi > 70.0 {
            bear += 15;
            reasons.push(Reason::new(Bias::Bear, 15, format!("RSI overbought ({:.0})", ind.rsi)));
        } else if ind.rsi > 60.0 {
            bear += 8;
        }

        // MACD
        let m = ind.macd;
        if m.histogram > 0.0 && m.macd > m.signal {
            bull += 15;
            reasons.push(Reason::new(Bias::Bull, 15, "MACD bullish with positive histogram"));
        } else if m.histogram < 0.0 && m.macd < m.signal {
            bear += 15;
            reasons.push(Reason::new(Bias::Bear, 15, "MACD bearish with negative histogram"));
        }

        // Bollinger
        if let Some(bb) = ind.bollinger {
            if ind.price <= bb.lower * 1.005 {
                bull += 12;
                reasons.push(Reason::new(Bias::Bull, 12, "touching lower Bollinger band"));
            } else if ind.price >= bb.upper * 0.995 {
                bear += 12;
                reasons.push(Reason::new(Bias::Bear, 12, "touching upper Bollinger band"));
            }
            if bb.width_ratio() < 0.03 {
                reasons.push(Reason::new(Bias::Neutral, 5, "Bollinger squeeze, breakout likely"));
            }
        }

        // Volume
        if ind.volume_ratio > 1.5 {
            match ind.trend {
                Trend::Up => bull += 8,
                Trend::Down => bear += 8,
                Trend::Flat => {}
            }
            reasons.push(Reason::new(
                Bias::Neutral,
                8,
                format!("high volume ({:.1}x)", ind.volume_ratio),
            ));
        }

        // Trend alignment
        if let Some(ema50) = ind.ema50 {
            if ind.trend == Trend::Up && ind.ema21 > ema50 {
                bull += 10;
            } else if ind.trend == Trend::Down && ind.ema21 < ema50 {
                bear += 10;
            }
        }

        let (suggested, mut score) = if bull > bear + MIN_LEAD {
            (Direction::Long, (50.0 + f64::from(bull - bear)).min(95.0))
        } else if bear > bull + MIN_LEAD {
            (Direction::Short, (50.0 + f64::from(bear - bull)).min(95.0))
        } else {
            (Direction::Neutral, self.neutral_score())
        };

        if let Some(requested) = requested {
            if suggested.is_tradeable() && requested == suggested.opposite() {
                score = (score - CONFLICT_PENALTY).max(CONFLICT_FLOOR);
            }
        }

        // Stable sort keeps insertion order among equal weights.
        reasons.sort_by(|a, b| b.weight.cmp(&a.weight));

        SetupScore {
            bull,
            bear,
            score,
            suggested,
            reasons,
        }
    }

    fn neutral_score(&self) -> f64 {
        match self.config.neutral_score {
            NeutralScore::Midpoint => NEUTRAL_MIDPOINT,
            NeutralScore::Jitter => rand::thread_rng().gen_range(40.0..50.0),
        }
    }
}
