//! Application configuration.

use std::path::PathBuf;
use std::time::Duration;

use pulse_core::Timeframe;
use pulse_feed::{SyncConfig, SyncContext};
use pulse_gateway::{Endpoints, RetryPolicy};
use pulse_position::BookConfig;
use pulse_scorer::{NeutralScore, ScorerConfig};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Market data and analysis endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_prices_url")]
    pub prices_url: String,
    #[serde(default = "default_klines_url")]
    pub klines_url: String,
    #[serde(default = "default_analyze_url")]
    pub analyze_url: String,
    /// Ask the remote analysis endpoint first. When false only the local scorer runs.
    #[serde(default = "default_remote_analysis")]
    pub remote_analysis: bool,
}

fn default_prices_url() -> String {
    "http://localhost:3000/api/prices".to_string()
}

fn default_klines_url() -> String {
    "http://localhost:3000/api/klines".to_string()
}

fn default_analyze_url() -> String {
    "http://localhost:3000/api/analyze".to_string()
}

fn default_remote_analysis() -> bool {
    true
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            prices_url: default_prices_url(),
            klines_url: default_klines_url(),
            analyze_url: default_analyze_url(),
            remote_analysis: default_remote_analysis(),
        }
    }
}

impl EndpointsConfig {
    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            prices_url: self.prices_url.clone(),
            klines_url: self.klines_url.clone(),
            analyze_url: self.analyze_url.clone(),
        }
    }
}

/// Request gateway and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Maximum requests in flight. Default: 2.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Per-attempt timeout for price and kline fetches (ms). Default: 8000.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Timeout for a remote analysis call, which is never retried (ms). Default: 12000.
    #[serde(default = "default_analyze_timeout_ms")]
    pub analyze_timeout_ms: u64,
}

fn default_max_concurrent() -> usize {
    2
}

fn default_timeout_ms() -> u64 {
    8_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_cap_ms() -> u64 {
    4_000
}

fn default_analyze_timeout_ms() -> u64 {
    12_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            analyze_timeout_ms: default_analyze_timeout_ms(),
        }
    }
}

impl GatewayConfig {
    pub fn fetch_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            attempt_timeout: Duration::from_millis(self.timeout_ms),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_cap: Duration::from_millis(self.backoff_cap_ms),
        }
    }

    pub fn analyze_policy(&self) -> RetryPolicy {
        RetryPolicy::no_retry(Duration::from_millis(self.analyze_timeout_ms))
    }
}

/// Synchronizer cadences and failure escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    #[serde(default = "default_price_interval_ms")]
    pub price_interval_ms: u64,
    #[serde(default = "default_candle_interval_ms")]
    pub candle_interval_ms: u64,
    #[serde(default = "default_candle_limit")]
    pub candle_limit: u32,
    /// Consecutive price failures before auto-restart. Default: 5.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_recovery_delay_ms")]
    pub recovery_delay_ms: u64,
    #[serde(default = "default_restart_debounce_ms")]
    pub restart_debounce_ms: u64,
}

fn default_price_interval_ms() -> u64 {
    5_000
}

fn default_candle_interval_ms() -> u64 {
    10_000
}

fn default_candle_limit() -> u32 {
    100
}

fn default_max_failures() -> u32 {
    5
}

fn default_recovery_delay_ms() -> u64 {
    15_000
}

fn default_restart_debounce_ms() -> u64 {
    400
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            price_interval_ms: default_price_interval_ms(),
            candle_interval_ms: default_candle_interval_ms(),
            candle_limit: default_candle_limit(),
            max_failures: default_max_failures(),
            recovery_delay_ms: default_recovery_delay_ms(),
            restart_debounce_ms: default_restart_debounce_ms(),
        }
    }
}

impl SyncSection {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            price_interval: Duration::from_millis(self.price_interval_ms),
            candle_interval: Duration::from_millis(self.candle_interval_ms),
            max_failures: self.max_failures,
            recovery_delay: Duration::from_millis(self.recovery_delay_ms),
            restart_debounce: Duration::from_millis(self.restart_debounce_ms),
        }
    }
}

/// Local scorer thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerSection {
    #[serde(default = "default_enter_threshold")]
    pub enter_threshold: f64,
    #[serde(default = "default_wait_threshold")]
    pub wait_threshold: f64,
    #[serde(default)]
    pub neutral_score: NeutralScore,
    #[serde(default = "default_liquidation_factor")]
    pub liquidation_factor: f64,
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

impl Default for ScorerSection {
    fn default() -> Self {
        Self {
            enter_threshold: default_enter_threshold(),
            wait_threshold: default_wait_threshold(),
            neutral_score: NeutralScore::default(),
            liquidation_factor: default_liquidation_factor(),
        }
    }
}

impl ScorerSection {
    pub fn scorer_config(&self) -> ScorerConfig {
        ScorerConfig {
            enter_threshold: self.enter_threshold,
            wait_threshold: self.wait_threshold,
            neutral_score: self.neutral_score,
            liquidation_factor: self.liquidation_factor,
            ..ScorerConfig::default()
        }
    }
}

/// Which stability filter reviews arbitration results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityMode {
    #[default]
    AntiFlip,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterSection {
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    #[serde(default)]
    pub stability: StabilityMode,
}

fn default_cache_ttl_ms() -> u64 {
    25_000
}

impl Default for ArbiterSection {
    fn default() -> Self {
        Self {
            cache_ttl_ms: default_cache_ttl_ms(),
            stability: StabilityMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogSection {
    #[serde(default = "default_watchdog_interval_ms")]
    pub interval_ms: u64,
}

fn default_watchdog_interval_ms() -> u64 {
    2_000
}

impl Default for WatchdogSection {
    fn default() -> Self {
        Self {
            interval_ms: default_watchdog_interval_ms(),
        }
    }
}

/// Paper book parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSection {
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    #[serde(default = "default_max_fee_ratio")]
    pub max_fee_ratio: f64,
}

fn default_initial_balance() -> f64 {
    10_000.0
}

fn default_fee_rate() -> f64 {
    0.0004
}

fn default_max_positions() -> usize {
    3
}

fn default_max_fee_ratio() -> f64 {
    0.5
}

impl Default for BookSection {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            fee_rate: default_fee_rate(),
            max_positions: default_max_positions(),
            max_fee_ratio: default_max_fee_ratio(),
        }
    }
}

impl BookSection {
    pub fn book_config(&self) -> BookConfig {
        BookConfig {
            initial_balance: self.initial_balance,
            fee_rate: self.fee_rate,
            max_positions: self.max_positions,
            max_fee_ratio: self.max_fee_ratio,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Snapshot file. Default: data/state.json
    #[serde(default = "default_persistence_path")]
    pub path: PathBuf,
}

fn default_persistence_path() -> PathBuf {
    PathBuf::from("data/state.json")
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: default_persistence_path(),
        }
    }
}

/// Initial trading context. A stored symbol/timeframe takes precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default)]
    pub timeframe: Timeframe,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Periodic analysis cadence (ms). 0 disables the loop.
    #[serde(default)]
    pub analysis_interval_ms: u64,
}

fn default_symbol() -> String {
    "BTC".to_string()
}

fn default_leverage() -> u32 {
    35
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            timeframe: Timeframe::default(),
            leverage: default_leverage(),
            analysis_interval_ms: 0,
        }
    }
}

impl SessionConfig {
    pub fn sync_context(&self, candle_limit: u32) -> SyncContext {
        SyncContext {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            candle_limit,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub scorer: ScorerSection,
    #[serde(default)]
    pub arbiter: ArbiterSection,
    #[serde(default)]
    pub watchdog: WatchdogSection,
    #[serde(default)]
    pub book: BookSection,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        let fail = |msg: String| Err(AppError::Config(msg));

        if self.gateway.max_concurrent == 0 {
            return fail("gateway.max_concurrent must be at least 1".to_string());
        }
        for (name, value) in [
            ("gateway.timeout_ms", self.gateway.timeout_ms),
            ("gateway.analyze_timeout_ms", self.gateway.analyze_timeout_ms),
            ("sync.price_interval_ms", self.sync.price_interval_ms),
            ("sync.candle_interval_ms", self.sync.candle_interval_ms),
            ("watchdog.interval_ms", self.watchdog.interval_ms),
        ] {
            if value == 0 {
                return fail(format!("{name} must be non-zero"));
            }
        }
        if self.sync.candle_limit == 0 {
            return fail("sync.candle_limit must be at least 1".to_string());
        }
        if self.session.leverage < 1 {
            return fail("session.leverage must be at least 1".to_string());
        }
        if self.session.symbol.trim().is_empty() {
            return fail("session.symbol must not be empty".to_string());
        }
        if self.scorer.wait_threshold >= self.scorer.enter_threshold {
            return fail(format!(
                "scorer.wait_threshold ({}) must be below scorer.enter_threshold ({})",
                self.scorer.wait_threshold, self.scorer.enter_threshold
            ));
        }
        if self.book.max_positions == 0 {
            return fail("book.max_positions must be at least 1".to_string());
        }
        if !(self.book.fee_rate >= 0.0 && self.book.initial_balance >= 0.0) {
            return fail("book.fee_rate and book.initial_balance must be non-negative".to_string());
        }
        Ok(())
    }
}
