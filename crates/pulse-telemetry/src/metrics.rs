//! Prometheus metrics for the pulse signal engine.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means duplicate metric names, a
//! programming error that should crash at first use rather than be silently ignored.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_int_counter, register_int_gauge, CounterVec, Encoder,
    IntCounter, IntGauge, TextEncoder,
};

use crate::error::TelemetryResult;

/// Gateway requests by outcome (ok/timeout/status/transport/decode/cleared).
pub static GATEWAY_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pulse_gateway_requests_total",
        "Gateway requests by final outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Gateway retry attempts.
pub static GATEWAY_RETRIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("pulse_gateway_retries_total", "Gateway retry attempts").unwrap()
});

pub static GATEWAY_QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "pulse_gateway_queue_depth",
        "Tasks waiting for a gateway slot"
    )
    .unwrap()
});

pub static GATEWAY_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "pulse_gateway_in_flight",
        "Tasks currently holding a gateway slot"
    )
    .unwrap()
});

/// Queued tasks rejected by a drain.
pub static GATEWAY_CLEARED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pulse_gateway_cleared_total",
        "Queued tasks rejected by a queue drain"
    )
    .unwrap()
});

/// Poll failures by feed (prices/candles).
pub static FEED_POLL_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pulse_feed_poll_failures_total",
        "Market data poll failures",
        &["feed"]
    )
    .unwrap()
});

pub static FEED_CONSECUTIVE_FAILURES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "pulse_feed_consecutive_failures",
        "Consecutive price poll failures"
    )
    .unwrap()
});

pub static FEED_AUTO_RESTARTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pulse_feed_auto_restarts_total",
        "Synchronizer self-stops followed by scheduled recovery"
    )
    .unwrap()
});

/// Arbiter cache lookups by result (hit/miss).
pub static ARBITER_CACHE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pulse_arbiter_cache_total",
        "Arbiter cache lookups",
        &["result"]
    )
    .unwrap()
});

/// Final arbitration results.
pub static ARBITER_DECISIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pulse_arbiter_decisions_total",
        "Arbitrated proposals by direction and decision",
        &["direction", "decision"]
    )
    .unwrap()
});

pub static ARBITER_STABILITY_OVERRIDES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pulse_arbiter_stability_overrides_total",
        "Proposals replaced by the stability filter"
    )
    .unwrap()
});

pub static ARBITER_NO_SIGNAL_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pulse_arbiter_no_signal_total",
        "Arbitrations that ended without a proposal"
    )
    .unwrap()
});

/// Watchdog closures by reason.
pub static WATCHDOG_CLOSES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pulse_watchdog_closes_total",
        "Positions closed by the watchdog",
        &["reason"]
    )
    .unwrap()
});

pub static OPEN_POSITIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("pulse_open_positions", "Open simulated positions").unwrap()
});

/// Metrics recorder facade.
pub struct Metrics;

impl Metrics {
    pub fn gateway_request(outcome: &str) {
        GATEWAY_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn gateway_retry() {
        GATEWAY_RETRIES_TOTAL.inc();
    }

    /// Publish current queue depth and in-flight count.
    pub fn gateway_load(queued: usize, in_flight: usize) {
        GATEWAY_QUEUE_DEPTH.set(queued as i64);
        GATEWAY_IN_FLIGHT.set(in_flight as i64);
    }

    pub fn gateway_cleared(count: usize) {
        GATEWAY_CLEARED_TOTAL.inc_by(count as u64);
    }

    pub fn feed_failure(feed: &str) {
        FEED_POLL_FAILURES_TOTAL.with_label_values(&[feed]).inc();
    }

    pub fn feed_consecutive_failures(count: u32) {
        FEED_CONSECUTIVE_FAILURES.set(i64::from(count));
    }

    pub fn feed_auto_restart() {
        FEED_AUTO_RESTARTS_TOTAL.inc();
    }

    pub fn cache_hit() {
        ARBITER_CACHE_TOTAL.with_label_values(&["hit"]).inc();
    }

    pub fn cache_miss() {
        ARBITER_CACHE_TOTAL.with_label_values(&["miss"]).inc();
    }

    pub fn arbiter_decision(direction: &str, decision: &str) {
        ARBITER_DECISIONS_TOTAL
            .with_label_values(&[direction, decision])
            .inc();
    }

    pub fn stability_override() {
        ARBITER_STABILITY_OVERRIDES_TOTAL.inc();
    }

    pub fn no_signal() {
        ARBITER_NO_SIGNAL_TOTAL.inc();
    }

    pub fn watchdog_close(reason: &str) {
        WATCHDOG_CLOSES_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn open_positions(count: usize) {
        OPEN_POSITIONS.set(count as i64);
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
