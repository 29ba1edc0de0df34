//! Scorer configuration.

use serde::{Deserialize, Serialize};

/// Score used when neither side clearly dominates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeutralScore {
    /// Fixed 45, keeps the scorer fully deterministic.
    #[default]
    Midpoint,
    /// Uniform draw in [40, 50). Non-deterministic.
    Jitter,
}

/// Configuration for the local decision scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    /// Score at or above which the decision is ENTER.
    #[serde(default = "default_enter_threshold")]
    pub enter_threshold: f64,
    /// Score at or above which the decision is WAIT (below: CANCEL).
    #[serde(default = "default_wait_threshold")]
    pub wait_threshold: f64,
    #[serde(default)]
    pub neutral_score: NeutralScore,
    /// Maintenance factor in `price * (1 -/+ factor / leverage)`.
    #[serde(default = "default_liquidation_factor")]
    pub liquidation_factor: f64,
    /// Candles required before any scoring is attempted.
    #[serde(default = "default_min_candles")]
    pub min_candles: usize,
}

fn default_enter_threshold() -> f64 {
    70.0
}

fn default_wait_threshold() -> f64 {
    55.0
}

fn default_liquidation_factor() -> f64 {
    0.996
}

fn default_min_candles() -> usize {
    21
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            enter_threshold: default_enter_threshold(),
            wait_threshold: default_wait_threshold(),
            neutral_score: NeutralScore::default(),
            liquidation_factor: default_liquidation_factor(),
            min_candles: default_min_candles(),
        }
    }
}

impl ScorerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.wait_threshold >= self.enter_threshold {
            return Err(format!(
                "wait_threshold ({}) must be below enter_threshold ({})",
                self.wait_threshold, self.enter_threshold
            ));
        }
        if !(self.liquidation_factor > 0.0 && self.liquidation_factor <= 1.0) {
            return Err(format!(
                "liquidation_factor ({}) must be in (0, 1]",
                self.liquidation_factor
            ));
        }
        if self.min_candles < 21 {
            return Err(format!(
                "min_candles ({}) must be at least 21",
                self.min_candles
            ));
        }
        Ok(())
    }
}
