//! Paper position book.
//!
//! Tracks a simulated balance, the open positions and the closed-trade history. The book
//! is the watchdog's [`ExecutionSink`] and [`PositionSource`]. Balance and open positions
//! are snapshotted to the key/value store after every change.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pulse_core::{CloseReason, Direction, Position, Proposal};
use pulse_feed::MarketState;
use pulse_persistence::{keys, load_json, store_json, KvStore};
use pulse_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PositionError, PositionResult};
use crate::watchdog::{evaluate_exit, ExecutionSink, PositionSource};

/// Fraction of the 1/leverage move that liquidates a position.
pub const LIQUIDATION_FACTOR: f64 = 0.996;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookConfig {
    pub initial_balance: f64,
    /// Fee charged on notional size when opening.
    pub fee_rate: f64,
    pub max_positions: usize,
    /// Opening is refused when the fee reaches this fraction of the margin.
    pub max_fee_ratio: f64,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            fee_rate: 0.0004,
            max_positions: 3,
            max_fee_ratio: 0.5,
        }
    }
}

/// A position after it was closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub position: Position,
    pub exit_price: f64,
    pub pnl: f64,
    /// PnL as a percentage of margin.
    pub pnl_percent: f64,
    pub reason: CloseReason,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug)]
struct BookState {
    balance: f64,
    positions: Vec<Position>,
    history: Vec<ClosedTrade>,
}

pub struct PositionBook {
    config: BookConfig,
    market: Arc<MarketState>,
    store: Arc<dyn KvStore>,
    state: RwLock<BookState>,
}

impl PositionBook {
    pub fn new(config: BookConfig, market: Arc<MarketState>, store: Arc<dyn KvStore>) -> Self {
        let state = BookState {
            balance: config.initial_balance,
            positions: Vec::new(),
            history: Vec::new(),
        };
        Self {
            config,
            market,
            store,
            state: RwLock::new(state),
        }
    }

    pub fn config(&self) -> &BookConfig {
        &self.config
    }

    pub fn balance(&self) -> f64 {
        self.state.read().balance
    }

    pub fn open_count(&self) -> usize {
        self.state.read().positions.len()
    }

    pub fn history(&self) -> Vec<ClosedTrade> {
        self.state.read().history.clone()
    }

    /// Mark-to-market PnL of every open position, net of the estimated exit fee.
    /// Symbols without a price are valued at entry.
    pub fn open_pnl(&self) -> f64 {
        self.state
            .read()
            .positions
            .iter()
            .map(|p| p.realized_pnl(self.market.price(&p.symbol).unwrap_or(p.entry)))
            .sum()
    }

    pub fn equity(&self) -> f64 {
        self.balance() + self.open_pnl()
    }

    /// Open a position in the proposal's direction with `margin` committed.
    ///
    /// The entry is the latest market price, or the proposal price when the market has
    /// none. Margin plus fee is debited from the balance.
    pub fn open(&self, proposal: &Proposal, margin: f64) -> PositionResult<Position> {
        if !proposal.direction.is_tradeable() {
            return Err(PositionError::InvalidProposal(format!(
                "{}: direction {} is not tradeable",
                proposal.symbol, proposal.direction
            )));
        }
        if !proposal.levels_consistent() {
            return Err(PositionError::InvalidProposal(format!(
                "{}: {} levels tp={} sl={} do not bracket price {}",
                proposal.symbol, proposal.direction, proposal.tp, proposal.sl, proposal.price
            )));
        }
        if !(margin.is_finite() && margin > 0.0) {
            return Err(PositionError::InvalidProposal(format!(
                "margin must be positive, got {margin}"
            )));
        }
        let entry = self
            .market
            .price(&proposal.symbol)
            .filter(|p| *p > 0.0)
            .unwrap_or(proposal.price);
        if !(entry.is_finite() && entry > 0.0) {
            return Err(PositionError::InvalidProposal(format!(
                "{}: no price available",
                proposal.symbol
            )));
        }

        let leverage = proposal.leverage.max(1);
        let size = margin * f64::from(leverage);
        let fee = size * self.config.fee_rate;

        let position = {
            let mut state = self.state.write();
            if state.positions.len() >= self.config.max_positions {
                return Err(PositionError::LimitExceeded(state.positions.len()));
            }
            if margin + fee > state.balance {
                return Err(PositionError::InsufficientBalance {
                    required: margin + fee,
                    available: state.balance,
                });
            }
            if fee >= margin * self.config.max_fee_ratio {
                return Err(PositionError::FeeTooHigh { fee, margin });
            }

            let position = Position {
                id: Uuid::new_v4().to_string(),
                symbol: proposal.symbol.clone(),
                direction: proposal.direction,
                entry,
                size,
                margin,
                leverage,
                tp: proposal.tp,
                sl: proposal.sl,
                liq: liquidation_price(proposal, entry, leverage),
                fee,
                timestamp: Utc::now(),
            };
            if let Some(reason) = evaluate_exit(&position, entry) {
                return Err(PositionError::InvalidProposal(format!(
                    "{}: entry {entry} already past {reason}",
                    proposal.symbol
                )));
            }
            state.balance -= margin + fee;
            state.positions.push(position.clone());
            position
        };

        info!(
            id = %position.id,
            symbol = %position.symbol,
            direction = %position.direction,
            entry = position.entry,
            size = position.size,
            tp = position.tp,
            sl = position.sl,
            liq = position.liq,
            "Position opened"
        );
        self.after_change();
        Ok(position)
    }

    /// Close `id` at `price`. The balance is credited with margin plus PnL.
    pub fn close(&self, id: &str, reason: CloseReason, price: f64) -> PositionResult<ClosedTrade> {
        let trade = {
            let mut state = self.state.write();
            let index = state
                .positions
                .iter()
                .position(|p| p.id == id)
                .ok_or_else(|| PositionError::NotFound(id.to_string()))?;
            let position = state.positions.remove(index);

            let pnl = position.realized_pnl(price);
            state.balance = (state.balance + position.margin + pnl).max(0.0);

            let trade = ClosedTrade {
                pnl_percent: pnl / position.margin * 100.0,
                position,
                exit_price: price,
                pnl,
                reason,
                closed_at: Utc::now(),
            };
            state.history.push(trade.clone());
            trade
        };

        info!(
            id,
            symbol = %trade.position.symbol,
            direction = %trade.position.direction,
            exit = price,
            pnl = trade.pnl,
            reason = %reason,
            "Position closed"
        );
        self.after_change();
        Ok(trade)
    }

    /// Write balance and open positions to the store.
    pub fn persist(&self) -> PositionResult<()> {
        let (balance, positions) = {
            let state = self.state.read();
            (state.balance, state.positions.clone())
        };
        store_json(self.store.as_ref(), keys::BALANCE, &balance)?;
        store_json(self.store.as_ref(), keys::POSITIONS, &positions)?;
        Ok(())
    }

    /// Load balance and open positions from the store. Invalid positions are dropped.
    ///
    /// Returns the number of positions restored.
    pub fn restore(&self) -> PositionResult<usize> {
        let balance = load_json::<f64>(self.store.as_ref(), keys::BALANCE)?
            .filter(|b| b.is_finite() && *b >= 0.0);
        let raw = load_json::<Vec<serde_json::Value>>(self.store.as_ref(), keys::POSITIONS)?
            .unwrap_or_default();

        let mut positions = Vec::with_capacity(raw.len());
        for value in raw {
            let position = match serde_json::from_value::<Position>(value) {
                Ok(position) => position,
                Err(e) => {
                    warn!(error = %e, "Dropping undecodable stored position");
                    continue;
                }
            };
            match position.validate() {
                Ok(()) => positions.push(position),
                Err(e) => warn!(error = %e, "Dropping invalid stored position"),
            }
        }

        let restored = positions.len();
        {
            let mut state = self.state.write();
            if let Some(balance) = balance {
                state.balance = balance;
            }
            state.positions = positions;
        }
        Metrics::open_positions(restored);
        info!(restored, balance = self.balance(), "Position book restored");
        Ok(restored)
    }

    /// Restore the initial balance and drop all positions and history.
    pub fn reset(&self) {
        {
            let mut state = self.state.write();
            state.balance = self.config.initial_balance;
            state.positions.clear();
            state.history.clear();
        }
        info!(balance = self.config.initial_balance, "Position book reset");
        self.after_change();
    }

    fn after_change(&self) {
        Metrics::open_positions(self.open_count());
        if let Err(e) = self.persist() {
            warn!(error = %e, "Failed to persist position book");
        }
    }
}

/// The proposal's liquidation price when it lies on the losing side of `entry`, otherwise
/// `entry * (1 ∓ 0.996 / leverage)`.
fn liquidation_price(proposal: &Proposal, entry: f64, leverage: u32) -> f64 {
    let offered = proposal.liq;
    let usable = offered > 0.0
        && match proposal.direction {
            Direction::Long => offered < entry,
            Direction::Short => offered > entry,
            Direction::Neutral => false,
        };
    if usable {
        return offered;
    }
    let move_fraction = LIQUIDATION_FACTOR / f64::from(leverage);
    match proposal.direction {
        Direction::Short => entry * (1.0 + move_fraction),
        _ => entry * (1.0 - move_fraction),
    }
}

impl PositionSource for PositionBook {
    fn positions_snapshot(&self) -> Vec<Position> {
        self.state.read().positions.clone()
    }
}

impl ExecutionSink for PositionBook {
    fn close_position(&self, id: &str, reason: CloseReason) {
        let symbol_price = {
            let state = self.state.read();
            state
                .positions
                .iter()
                .find(|p| p.id == id)
                .map(|p| self.market.price(&p.symbol).unwrap_or(p.entry))
        };
        let Some(price) = symbol_price else {
            debug!(id, "Close requested for unknown position");
            return;
        };
        if let Err(e) = self.close(id, reason, price) {
            warn!(id, error = %e, "Close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{Decision, PriceSnapshot, PriceTick};
    use pulse_persistence::MemoryStore;

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    fn proposal(direction: Direction, leverage: u32) -> Proposal {
        let mut p = Proposal::wait("BTC", direction, 80.0, "test");
        p.decision = Decision::Enter;
        p.price = 100.0;
        p.leverage = leverage;
        match direction {
            Direction::Short => {
                p.tp = 90.0;
                p.sl = 105.0;
            }
            _ => {
                p.tp = 110.0;
                p.sl = 95.0;
            }
        }
        p
    }

    fn book() -> (PositionBook, Arc<MarketState>, Arc<MemoryStore>) {
        let market = Arc::new(MarketState::new());
        let store = Arc::new(MemoryStore::new());
        let book = PositionBook::new(BookConfig::default(), market.clone(), store.clone());
        (book, market, store)
    }

    fn set_price(market: &MarketState, price: f64) {
        let mut snapshot = PriceSnapshot::new();
        snapshot.insert("BTC", PriceTick::new(price));
        market.replace_prices(snapshot);
    }

    #[test]
    fn test_open_sizes_and_debits() {
        let (book, _, _) = book();
        let position = book.open(&proposal(Direction::Long, 10), 100.0).unwrap();

        assert_close(position.size, 1000.0);
        assert_close(position.fee, 0.4);
        assert_close(position.liq, 90.04);
        assert_eq!(position.leverage, 10);
        assert_close(book.balance(), 10_000.0 - 100.4);
        assert_eq!(book.open_count(), 1);
    }

    #[test]
    fn test_open_uses_market_price_and_offered_liquidation() {
        let (book, market, _) = book();
        set_price(&market, 101.0);
        let mut short = proposal(Direction::Short, 10);
        short.liq = 111.0;

        let position = book.open(&short, 100.0).unwrap();
        assert_close(position.entry, 101.0);
        assert_close(position.liq, 111.0);

        // A liquidation on the wrong side is recomputed.
        let mut bad = proposal(Direction::Short, 10);
        bad.liq = 50.0;
        let position = book.open(&bad, 100.0).unwrap();
        assert_close(position.liq, 101.0 * (1.0 + 0.0996));
    }

    #[test]
    fn test_open_rejections() {
        let (book, _, _) = book();

        let neutral = proposal(Direction::Neutral, 10);
        assert!(matches!(book.open(&neutral, 100.0), Err(PositionError::InvalidProposal(_))));

        let err = book.open(&proposal(Direction::Long, 1), 10_000.0).unwrap_err();
        assert!(matches!(err, PositionError::InsufficientBalance { .. }));

        // Fee is 0.8 of margin at 2000x.
        let err = book.open(&proposal(Direction::Long, 2000), 1.0).unwrap_err();
        assert!(matches!(err, PositionError::FeeTooHigh { .. }));

        for _ in 0..3 {
            book.open(&proposal(Direction::Long, 10), 10.0).unwrap();
        }
        let err = book.open(&proposal(Direction::Long, 10), 10.0).unwrap_err();
        assert!(matches!(err, PositionError::LimitExceeded(3)));
    }

    #[test]
    fn test_open_rejects_misplaced_levels() {
        let (book, market, _) = book();

        // LONG carrying SHORT-side levels.
        let mut flipped = proposal(Direction::Long, 10);
        flipped.tp = 96.0;
        flipped.sl = 102.0;
        assert!(matches!(book.open(&flipped, 100.0), Err(PositionError::InvalidProposal(_))));

        let mut unset = proposal(Direction::Short, 10);
        unset.tp = 0.0;
        unset.sl = 0.0;
        assert!(matches!(book.open(&unset, 100.0), Err(PositionError::InvalidProposal(_))));

        // Market already through TP.
        set_price(&market, 111.0);
        let err = book.open(&proposal(Direction::Long, 10), 100.0).unwrap_err();
        assert!(matches!(err, PositionError::InvalidProposal(_)));

        assert_eq!(book.open_count(), 0);
        assert_close(book.balance(), 10_000.0);
    }

    #[test]
    fn test_close_long_and_short_pnl() {
        let (book, _, _) = book();
        let long = book.open(&proposal(Direction::Long, 10), 100.0).unwrap();
        let short = book.open(&proposal(Direction::Short, 10), 100.0).unwrap();

        let won = book.close(&long.id, CloseReason::TakeProfit, 110.0).unwrap();
        assert_close(won.pnl, 100.0 - 0.4);
        assert_close(won.pnl_percent, 99.6);

        let lost = book.close(&short.id, CloseReason::StopLoss, 105.0).unwrap();
        assert_close(lost.pnl, -50.0 - 0.4);

        assert_close(book.balance(), 10_000.0 - 2.0 * 100.4 + 100.0 + 99.6 + 100.0 - 50.4);
        assert_eq!(book.history().len(), 2);
        assert!(matches!(
            book.close(&long.id, CloseReason::Manual, 1.0),
            Err(PositionError::NotFound(_))
        ));
    }

    #[test]
    fn test_sink_prices_exit_from_market_or_entry() {
        let (book, market, _) = book();
        let first = book.open(&proposal(Direction::Long, 10), 100.0).unwrap();
        set_price(&market, 108.0);
        let second = book.open(&proposal(Direction::Long, 10), 100.0).unwrap();

        book.close_position(&second.id, CloseReason::Manual);
        assert_close(book.history()[0].exit_price, 108.0);

        market.replace_prices(PriceSnapshot::new());
        book.close_position(&first.id, CloseReason::Manual);
        assert_close(book.history()[1].exit_price, 100.0);

        // Unknown ids are ignored.
        book.close_position("missing", CloseReason::Manual);
        assert_eq!(book.history().len(), 2);
    }

    #[test]
    fn test_persist_and_restore() {
        let (book, market, store) = book();
        book.open(&proposal(Direction::Long, 10), 100.0).unwrap();
        let expected_balance = book.balance();

        let restored = PositionBook::new(BookConfig::default(), market, store);
        assert_eq!(restored.restore().unwrap(), 1);
        assert_close(restored.balance(), expected_balance);
        assert_eq!(restored.positions_snapshot(), book.positions_snapshot());
    }

    #[test]
    fn test_restore_drops_invalid_positions() {
        let store = Arc::new(MemoryStore::new());
        let valid = serde_json::json!({
            "id": "ok", "symbol": "BTC", "direction": "LONG", "entry": 100.0,
            "size": 1000.0, "margin": 100.0, "leverage": 10, "tp": 110.0, "sl": 95.0,
            "liq": 90.04, "fee": 0.4, "timestamp": "2026-01-01T00:00:00Z"
        });
        let mut zero_margin = valid.clone();
        zero_margin["id"] = "zero".into();
        zero_margin["margin"] = 0.0.into();
        let mut neutral = valid.clone();
        neutral["id"] = "neutral".into();
        neutral["direction"] = "NEUTRAL".into();
        let garbage = serde_json::json!({ "id": 7 });

        store
            .store(
                keys::POSITIONS,
                &serde_json::json!([valid, zero_margin, neutral, garbage]).to_string(),
            )
            .unwrap();
        store.store(keys::BALANCE, "-5").unwrap();

        let book = PositionBook::new(BookConfig::default(), Arc::new(MarketState::new()), store);
        assert_eq!(book.restore().unwrap(), 1);
        assert_eq!(book.positions_snapshot()[0].id, "ok");
        assert_close(book.balance(), 10_000.0);
    }

    #[test]
    fn test_open_pnl_and_reset() {
        let (book, market, _) = book();
        book.open(&proposal(Direction::Long, 10), 100.0).unwrap();
        set_price(&market, 105.0);
        assert_close(book.open_pnl(), 50.0 - 0.4);
        assert_close(book.equity(), 10_000.0 - 100.4 + 49.6);

        book.reset();
        assert_close(book.balance(), 10_000.0);
        assert_eq!(book.open_count(), 0);
    }
}
