//! Shared market state.
//!
//! The latest price snapshot is published as an `Arc` so readers (watchdog, arbiter,
//! position book) never hold a lock while they work on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use pulse_core::{Candle, PriceSnapshot, Timeframe};
use tracing::debug;

type CandleKey = (String, Timeframe);

/// Latest prices and candles.
#[derive(Debug, Default)]
pub struct MarketState {
    prices: RwLock<Arc<PriceSnapshot>>,
    candles: DashMap<CandleKey, Arc<Vec<Candle>>>,
    last_price_update: RwLock<Option<DateTime<Utc>>>,
    connected: AtomicBool,
}

impl MarketState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot wholesale and mark the feed connected.
    pub fn replace_prices(&self, snapshot: PriceSnapshot) {
        let count = snapshot.len();
        *self.prices.write() = Arc::new(snapshot);
        *self.last_price_update.write() = Some(Utc::now());
        self.connected.store(true, Ordering::SeqCst);
        debug!(symbols = count, "Price snapshot replaced");
    }

    /// Add symbols from a narrower feed without touching existing quotes.
    pub fn merge_missing_prices(&self, other: &PriceSnapshot) -> usize {
        let mut guard = self.prices.write();
        let mut merged = PriceSnapshot::clone(&guard);
        let added = merged.merge_missing(other);
        if added > 0 {
            *guard = Arc::new(merged);
        }
        added
    }

    /// Most recently published snapshot.
    pub fn prices(&self) -> Arc<PriceSnapshot> {
        self.prices.read().clone()
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.prices.read().price(symbol)
    }

    pub fn replace_candles(&self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        debug!(symbol, timeframe = %timeframe, count = candles.len(), "Candles replaced");
        self.candles
            .insert((symbol.to_string(), timeframe), Arc::new(candles));
    }

    pub fn candles(&self, symbol: &str, timeframe: Timeframe) -> Option<Arc<Vec<Candle>>> {
        self.candles
            .get(&(symbol.to_string(), timeframe))
            .map(|entry| entry.value().clone())
    }

    /// Drop every cached candle series for `symbol`.
    pub fn invalidate_candles(&self, symbol: &str) {
        self.candles.retain(|(s, _), _| s != symbol);
    }

    pub fn last_price_update(&self) -> Option<DateTime<Utc>> {
        *self.last_price_update.read()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::PriceTick;

    fn snapshot(entries: &[(&str, f64)]) -> PriceSnapshot {
        entries
            .iter()
            .map(|(s, p)| (s.to_string(), PriceTick::new(*p)))
            .collect()
    }

    #[test]
    fn test_replace_is_wholesale() {
        let state = MarketState::new();
        assert!(!state.is_connected());
        assert!(state.last_price_update().is_none());

        state.replace_prices(snapshot(&[("BTC", 100.0), ("ETH", 10.0)]));
        state.replace_prices(snapshot(&[("BTC", 101.0)]));

        assert_eq!(state.price("BTC"), Some(101.0));
        assert_eq!(state.price("ETH"), None);
        assert!(state.is_connected());
        assert!(state.last_price_update().is_some());
    }

    #[test]
    fn test_merge_only_adds_missing() {
        let state = MarketState::new();
        state.replace_prices(snapshot(&[("BTC", 100.0)]));

        let added = state.merge_missing_prices(&snapshot(&[("BTC", 1.0), ("SOL", 20.0)]));
        assert_eq!(added, 1);
        assert_eq!(state.price("BTC"), Some(100.0));
        assert_eq!(state.price("SOL"), Some(20.0));
    }

    #[test]
    fn test_readers_keep_old_snapshot() {
        let state = MarketState::new();
        state.replace_prices(snapshot(&[("BTC", 100.0)]));
        let held = state.prices();
        state.replace_prices(snapshot(&[("BTC", 200.0)]));
        assert_eq!(held.price("BTC"), Some(100.0));
        assert_eq!(state.price("BTC"), Some(200.0));
    }

    #[test]
    fn test_candles_per_symbol_and_timeframe() {
        let state = MarketState::new();
        let bar = Candle::new(0, 1.0, 2.0, 0.5, 1.5, 10.0);
        state.replace_candles("BTC", Timeframe::M15, vec![bar; 3]);
        state.replace_candles("BTC", Timeframe::H1, vec![bar]);
        state.replace_candles("ETH", Timeframe::M15, vec![bar]);

        assert_eq!(state.candles("BTC", Timeframe::M15).unwrap().len(), 3);
        assert!(state.candles("BTC", Timeframe::H4).is_none());

        state.invalidate_candles("BTC");
        assert!(state.candles("BTC", Timeframe::M15).is_none());
        assert!(state.candles("BTC", Timeframe::H1).is_none());
        assert!(state.candles("ETH", Timeframe::M15).is_some());
    }
}
