//! Market data types: candles and price snapshots.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::lenient;

/// One OHLCV bar.
///
/// Serialized with the compact keys used by the market feed (`t`, `o`, `h`, `l`, `c`, `v`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time in epoch milliseconds.
    #[serde(rename = "t", alias = "openTime", alias = "open_time", default)]
    pub open_time: i64,
    #[serde(rename = "o", alias = "open", deserialize_with = "lenient::f64")]
    pub open: f64,
    #[serde(rename = "h", alias = "high", deserialize_with = "lenient::f64")]
    pub high: f64,
    #[serde(rename = "l", alias = "low", deserialize_with = "lenient::f64")]
    pub low: f64,
    #[serde(rename = "c", alias = "close", deserialize_with = "lenient::f64")]
    pub close: f64,
    #[serde(
        rename = "v",
        alias = "volume",
        default,
        deserialize_with = "lenient::f64"
    )]
    pub volume: f64,
}

impl Candle {
    pub fn new(open_time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// A bar is usable when every price is finite and positive and high >= low.
    pub fn is_valid(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
            && self.high >= self.low
            && self.volume.is_finite()
    }
}

/// 24h ticker for a single symbol.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceTick {
    #[serde(default, deserialize_with = "lenient::f64")]
    pub price: f64,
    #[serde(
        rename = "change",
        alias = "change24h",
        default,
        deserialize_with = "lenient::f64"
    )]
    pub change_24h: f64,
    #[serde(
        rename = "volume",
        alias = "volume24h",
        default,
        deserialize_with = "lenient::f64"
    )]
    pub volume_24h: f64,
    #[serde(rename = "high24h", default, deserialize_with = "lenient::f64")]
    pub high_24h: f64,
    #[serde(rename = "low24h", default, deserialize_with = "lenient::f64")]
    pub low_24h: f64,
}

impl PriceTick {
    pub fn new(price: f64) -> Self {
        Self {
            price,
            ..Self::default()
        }
    }
}

/// Mapping symbol -> ticker, published as a whole on every successful poll.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceSnapshot {
    ticks: HashMap<String, PriceTick>,
}

impl PriceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: impl Into<String>, tick: PriceTick) {
        self.ticks.insert(symbol.into(), tick);
    }

    pub fn get(&self, symbol: &str) -> Option<&PriceTick> {
        self.ticks.get(symbol)
    }

    /// Current price for `symbol`, ignoring zero or non-finite quotes.
    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.ticks
            .get(symbol)
            .map(|t| t.price)
            .filter(|p| p.is_finite() && *p > 0.0)
    }

    /// Add symbols from `other` that this snapshot does not carry yet.
    ///
    /// Existing entries are never overwritten. Returns the number of symbols added.
    pub fn merge_missing(&mut self, other: &PriceSnapshot) -> usize {
        let mut added = 0;
        for (symbol, tick) in &other.ticks {
            if !self.ticks.contains_key(symbol) {
                self.ticks.insert(symbol.clone(), *tick);
                added += 1;
            }
        }
        added
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.ticks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

impl FromIterator<(String, PriceTick)> for PriceSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, PriceTick)>>(iter: I) -> Self {
        Self {
            ticks: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_candle_compact_and_long_keys() {
        let a: Candle =
            serde_json::from_value(json!({"t": 1, "o": 1.0, "h": 2.0, "l": 0.5, "c": 1.5, "v": 10}))
                .unwrap();
        let b: Candle = serde_json::from_value(json!({
            "openTime": 1, "open": "1.0", "high": "2.0", "low": "0.5", "close": "1.5", "volume": "10"
        }))
        .unwrap();
        assert_eq!(a, b);
        assert!(a.is_valid());
    }

    #[test]
    fn test_candle_invalid_when_high_below_low() {
        let c = Candle::new(0, 1.0, 0.5, 0.9, 0.7, 1.0);
        assert!(!c.is_valid());
    }

    #[test]
    fn test_snapshot_price_ignores_zero() {
        let mut snap = PriceSnapshot::new();
        snap.insert("BTC", PriceTick::new(50_000.0));
        snap.insert("DEAD", PriceTick::new(0.0));
        assert_eq!(snap.price("BTC"), Some(50_000.0));
        assert_eq!(snap.price("DEAD"), None);
        assert_eq!(snap.price("ETH"), None);
    }

    #[test]
    fn test_merge_missing_is_additive_only() {
        let mut wide = PriceSnapshot::new();
        wide.insert("BTC", PriceTick::new(100.0));

        let mut narrow = PriceSnapshot::new();
        narrow.insert("BTC", PriceTick::new(999.0));
        narrow.insert("ETH", PriceTick::new(10.0));

        assert_eq!(wide.merge_missing(&narrow), 1);
        assert_eq!(wide.price("BTC"), Some(100.0));
        assert_eq!(wide.price("ETH"), Some(10.0));
    }

    #[test]
    fn test_tick_accepts_feed_keys() {
        let tick: PriceTick = serde_json::from_value(
            json!({"price": "42.5", "change": -1.2, "volume": 1000, "high24h": 43, "low24h": "41"}),
        )
        .unwrap();
        assert_eq!(tick.price, 42.5);
        assert_eq!(tick.change_24h, -1.2);
        assert_eq!(tick.low_24h, 41.0);
    }
}
