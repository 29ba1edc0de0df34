//! Payload normalization for the price and kline endpoints.
//!
//! Both endpoints answer either with a `{data, source}` envelope or with the legacy bare
//! payload. Individual entries that do not parse are skipped; only a payload with no
//! recognizable shape at all is an error.

use pulse_core::lenient::value_as_f64;
use pulse_core::{Candle, PriceSnapshot, PriceTick};
use serde_json::Value;
use tracing::debug;

use crate::error::{FeedError, FeedResult};

/// Strip the `{data, source}` envelope if present.
fn unwrap_envelope(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) if map.contains_key("data") => {
            if let Some(source) = map.get("source").and_then(Value::as_str) {
                debug!(source, "Envelope payload");
            }
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn parse_tick(value: Value) -> Option<PriceTick> {
    let tick = match value {
        Value::Object(_) => serde_json::from_value::<PriceTick>(value).ok()?,
        other => PriceTick::new(value_as_f64(&other)?),
    };
    (tick.price.is_finite() && tick.price > 0.0).then_some(tick)
}

/// Normalize a price payload into a snapshot.
///
/// Accepted shapes (inside an optional envelope):
/// - `{"BTC": {"price": 1.0, "change": ..}, ...}` or `{"BTC": 1.0, ...}`
/// - `[{"symbol": "BTC", "price": 1.0, ...}, ...]`
pub fn normalize_prices(payload: Value) -> FeedResult<PriceSnapshot> {
    let mut snapshot = PriceSnapshot::new();

    match unwrap_envelope(payload) {
        Value::Object(map) => {
            for (symbol, entry) in map {
                match parse_tick(entry) {
                    Some(tick) => snapshot.insert(symbol, tick),
                    None => debug!(symbol = %symbol, "Skipping unparseable ticker"),
                }
            }
        }
        Value::Array(entries) => {
            for entry in entries {
                let symbol = entry
                    .get("symbol")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match (symbol, parse_tick(entry)) {
                    (Some(symbol), Some(tick)) => snapshot.insert(symbol, tick),
                    _ => debug!("Skipping ticker without symbol or price"),
                }
            }
        }
        other => {
            return Err(FeedError::InvalidPayload(format!(
                "price payload must be an object or array, got {}",
                kind(&other)
            )))
        }
    }

    Ok(snapshot)
}

/// `[openTime, open, high, low, close, volume, ...]` with numeric or string cells.
fn parse_positional(cells: &[Value]) -> Option<Candle> {
    if cells.len() < 6 {
        return None;
    }
    let open_time = cells[0]
        .as_i64()
        .or_else(|| value_as_f64(&cells[0]).map(|t| t as i64))?;
    Some(Candle::new(
        open_time,
        value_as_f64(&cells[1])?,
        value_as_f64(&cells[2])?,
        value_as_f64(&cells[3])?,
        value_as_f64(&cells[4])?,
        value_as_f64(&cells[5])?,
    ))
}

/// Normalize a kline payload into candles ordered by open time.
///
/// Each entry is either an object (`{t,o,h,l,c,v}` or long names) or an exchange-style
/// positional array.
pub fn normalize_candles(payload: Value) -> FeedResult<Vec<Candle>> {
    let entries = match unwrap_envelope(payload) {
        Value::Array(entries) => entries,
        other => {
            return Err(FeedError::InvalidPayload(format!(
                "kline payload must be an array, got {}",
                kind(&other)
            )))
        }
    };

    let total = entries.len();
    let mut candles: Vec<Candle> = entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::Array(cells) => parse_positional(&cells),
            obj @ Value::Object(_) => serde_json::from_value(obj).ok(),
            _ => None,
        })
        .filter(Candle::is_valid)
        .collect();

    if candles.len() < total {
        debug!(
            skipped = total - candles.len(),
            total, "Skipped unparseable candles"
        );
    }

    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
