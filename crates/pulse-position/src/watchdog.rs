//! Position watchdog.
//!
//! Every tick the watchdog reads the latest published prices, compares them with each open
//! position's thresholds and hands triggered positions to the [`ExecutionSink`]. It never
//! waits for a fresher snapshot and never awaits the price pollers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pulse_core::{CloseReason, Direction, Position};
use pulse_feed::MarketState;
use pulse_telemetry::Metrics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const WATCHDOG_INTERVAL: Duration = Duration::from_millis(2_000);

/// Latest known price per symbol.
pub trait PriceProvider: Send + Sync {
    /// `None` when no price is known for `symbol`.
    fn price(&self, symbol: &str) -> Option<f64>;
}

impl PriceProvider for MarketState {
    fn price(&self, symbol: &str) -> Option<f64> {
        MarketState::price(self, symbol)
    }
}

/// Open positions to watch.
pub trait PositionSource: Send + Sync {
    fn positions_snapshot(&self) -> Vec<Position>;
}

/// Closes positions on the watchdog's behalf. Nothing is returned to the watchdog.
#[cfg_attr(test, mockall::automock)]
pub trait ExecutionSink: Send + Sync {
    fn close_position(&self, id: &str, reason: CloseReason);
}

/// First exit condition met by `position` at `price`, if any.
///
/// Checked in priority order TP, SL, liquidation. A threshold of `0.0` is unset.
pub fn evaluate_exit(position: &Position, price: f64) -> Option<CloseReason> {
    let set = |threshold: f64| threshold > 0.0;
    match position.direction {
        Direction::Long => {
            if set(position.tp) && price >= position.tp {
                Some(CloseReason::TakeProfit)
            } else if set(position.sl) && price <= position.sl {
                Some(CloseReason::StopLoss)
            } else if set(position.liq) && price <= position.liq {
                Some(CloseReason::Liquidation)
            } else {
                None
            }
        }
        Direction::Short => {
            if set(position.tp) && price <= position.tp {
                Some(CloseReason::TakeProfit)
            } else if set(position.sl) && price >= position.sl {
                Some(CloseReason::StopLoss)
            } else if set(position.liq) && price >= position.liq {
                Some(CloseReason::Liquidation)
            } else {
                None
            }
        }
        Direction::Neutral => None,
    }
}

/// Periodic threshold monitor.
pub struct PositionWatchdog {
    positions: Arc<dyn PositionSource>,
    prices: Arc<dyn PriceProvider>,
    sink: Arc<dyn ExecutionSink>,
    interval: Duration,
    /// Ids already handed to the sink; a position never fires twice.
    closing: Mutex<HashSet<String>>,
}

impl PositionWatchdog {
    pub fn new(
        positions: Arc<dyn PositionSource>,
        prices: Arc<dyn PriceProvider>,
        sink: Arc<dyn ExecutionSink>,
    ) -> Self {
        Self {
            positions,
            prices,
            sink,
            interval: WATCHDOG_INTERVAL,
            closing: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one check over the current snapshot. Returns the closes that were triggered.
    pub fn check_once(&self) -> Vec<(String, CloseReason)> {
        let positions = self.positions.positions_snapshot();

        // Forget ids whose positions are gone.
        {
            let mut closing = self.closing.lock();
            closing.retain(|id| positions.iter().any(|p| &p.id == id));
        }

        if positions.is_empty() {
            return Vec::new();
        }

        let mut triggered = Vec::new();
        for position in &positions {
            if self.closing.lock().contains(&position.id) {
                continue;
            }
            let Some(price) = self.prices.price(&position.symbol) else {
                debug!(symbol = %position.symbol, id = %position.id, "No price, skipping");
                continue;
            };
            let Some(reason) = evaluate_exit(position, price) else {
                continue;
            };

            info!(
                id = %position.id,
                symbol = %position.symbol,
                direction = %position.direction,
                price,
                reason = %reason,
                "Exit threshold hit"
            );
            self.closing.lock().insert(position.id.clone());
            Metrics::watchdog_close(reason.as_label());
            self.sink.close_position(&position.id, reason);
            triggered.push((position.id.clone(), reason));
        }
        triggered
    }

    /// Check on a fixed cadence until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Position watchdog started");
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Position watchdog stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.check_once();
                }
            }
        }
    }
}
