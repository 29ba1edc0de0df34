//! Simulated positions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::signal::Direction;

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    Liquidation,
    Manual,
}

impl CloseReason {
    /// Short label for metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::TakeProfit => "tp",
            Self::StopLoss => "sl",
            Self::Liquidation => "liq",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TakeProfit => write!(f, "Take Profit"),
            Self::StopLoss => write!(f, "Stop Loss"),
            Self::Liquidation => write!(f, "Liquidation"),
            Self::Manual => write!(f, "Manual"),
        }
    }
}

/// An open simulated position.
///
/// Threshold prices of `0.0` mean "not set" and are never triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    /// Notional size (margin x leverage).
    pub size: f64,
    pub margin: f64,
    pub leverage: u32,
    #[serde(default)]
    pub tp: f64,
    #[serde(default)]
    pub sl: f64,
    #[serde(default)]
    pub liq: f64,
    #[serde(default)]
    pub fee: f64,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    /// Check the fields a restored snapshot must carry.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(CoreError::InvalidPosition("missing id".to_string()));
        }
        if self.symbol.is_empty() {
            return Err(CoreError::InvalidPosition(format!("{}: missing symbol", self.id)));
        }
        if !self.direction.is_tradeable() {
            return Err(CoreError::InvalidPosition(format!(
                "{}: direction must be LONG or SHORT",
                self.id
            )));
        }
        for (name, value) in [("entry", self.entry), ("size", self.size), ("margin", self.margin)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(CoreError::InvalidPosition(format!(
                    "{}: {name} must be positive, got {value}",
                    self.id
                )));
            }
        }
        if self.leverage < 1 {
            return Err(CoreError::InvalidPosition(format!(
                "{}: leverage must be >= 1",
                self.id
            )));
        }
        Ok(())
    }

    /// Mark-to-market PnL before fees.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        if self.entry <= 0.0 {
            return 0.0;
        }
        (price - self.entry) / self.entry * self.size * self.direction.sign()
    }

    /// PnL if closed at `price`, net of the opening fee.
    pub fn realized_pnl(&self, price: f64) -> f64 {
        self.unrealized_pnl(price) - self.fee
    }
}
