//! Dual-cadence market data synchronizer.
//!
//! Two poll loops (prices, candles) run on their own intervals. Each tick spawns a fetch
//! guarded by an in-flight flag, so a slow call is never issued twice.
//!
//! Price failures escalate: the first one raises a warning notice, and once
//! `max_failures` consecutive failures accumulate the synchronizer stops itself and
//! schedules a start after `recovery_delay` with the counter reset. Candle failures are
//! only logged.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use pulse_core::{PriceSnapshot, PriceTick, Timeframe};
use pulse_persistence::{keys, load_json, store_json, KvStore};
use pulse_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{FeedError, FeedResult};
use crate::market_state::MarketState;
use crate::source::MarketDataSource;

/// A named pair of poll cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshRate {
    pub label: &'static str,
    pub prices: Duration,
    pub candles: Duration,
}

impl RefreshRate {
    const fn new(label: &'static str, prices_ms: u64, candles_ms: u64) -> Self {
        Self {
            label,
            prices: Duration::from_millis(prices_ms),
            candles: Duration::from_millis(candles_ms),
        }
    }

    pub fn find(label: &str) -> Option<&'static RefreshRate> {
        REFRESH_OPTIONS.iter().find(|r| r.label == label)
    }
}

/// Selectable refresh presets.
pub const REFRESH_OPTIONS: [RefreshRate; 10] = [
    RefreshRate::new("1s", 1_000, 2_000),
    RefreshRate::new("2s", 2_000, 4_000),
    RefreshRate::new("5s", 5_000, 10_000),
    RefreshRate::new("10s", 10_000, 15_000),
    RefreshRate::new("30s", 30_000, 30_000),
    RefreshRate::new("1m", 60_000, 60_000),
    RefreshRate::new("5m", 300_000, 300_000),
    RefreshRate::new("15m", 900_000, 900_000),
    RefreshRate::new("30m", 1_800_000, 1_800_000),
    RefreshRate::new("1h", 3_600_000, 3_600_000),
];

/// Synchronizer timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub price_interval: Duration,
    pub candle_interval: Duration,
    /// Consecutive price failures before the synchronizer pauses itself.
    pub max_failures: u32,
    pub recovery_delay: Duration,
    pub restart_debounce: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            price_interval: Duration::from_millis(5_000),
            candle_interval: Duration::from_millis(10_000),
            max_failures: 5,
            recovery_delay: Duration::from_millis(15_000),
            restart_debounce: Duration::from_millis(400),
        }
    }
}

/// What the candle loop fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncContext {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candle_limit: u32,
}

impl Default for SyncContext {
    fn default() -> Self {
        Self {
            symbol: "BTC".to_string(),
            timeframe: Timeframe::M15,
            candle_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// User-facing, non-fatal notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncNotice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Persisted cadence. Older snapshots store a preset label.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum SavedRate {
    Millis { prices_ms: u64, candles_ms: u64 },
    Label(String),
}

#[derive(Debug, Clone, Copy)]
enum Feed {
    Prices,
    Candles,
}

impl Feed {
    fn as_str(self) -> &'static str {
        match self {
            Self::Prices => "prices",
            Self::Candles => "candles",
        }
    }
}

/// Clears an in-flight flag on drop.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        (!flag.swap(true, Ordering::SeqCst)).then_some(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Inner {
    source: Arc<dyn MarketDataSource>,
    state: Arc<MarketState>,
    store: Arc<dyn KvStore>,
    config: SyncConfig,
    rates: Mutex<(Duration, Duration)>,
    context: RwLock<SyncContext>,
    running: AtomicBool,
    /// Cancels the poll loops of the current run.
    loops: Mutex<Option<CancellationToken>>,
    /// Cancels a debounced restart or scheduled recovery.
    pending: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
    fetching_prices: AtomicBool,
    fetching_candles: AtomicBool,
    fail_count: AtomicU32,
    notices: broadcast::Sender<SyncNotice>,
}

/// Polls the market data source and publishes into `MarketState`.
///
/// Cheap to clone; clones share the same loops.
#[derive(Clone)]
pub struct DataSynchronizer {
    inner: Arc<Inner>,
}

impl DataSynchronizer {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        state: Arc<MarketState>,
        store: Arc<dyn KvStore>,
        config: SyncConfig,
        context: SyncContext,
    ) -> Self {
        let (notices, _) = broadcast::channel(32);
        let rates = (config.price_interval, config.candle_interval);
        Self {
            inner: Arc::new(Inner {
                source,
                state,
                store,
                config,
                rates: Mutex::new(rates),
                context: RwLock::new(context),
                running: AtomicBool::new(false),
                loops: Mutex::new(None),
                pending: Mutex::new(None),
                shutdown: CancellationToken::new(),
                fetching_prices: AtomicBool::new(false),
                fetching_candles: AtomicBool::new(false),
                fail_count: AtomicU32::new(0),
                notices,
            }),
        }
    }

    /// `STOPPED -> RUNNING`. Reloads the persisted cadence and fetches immediately.
    pub fn start(&self) {
        self.inner.start();
    }

    /// `RUNNING -> STOPPED`. Fetches already in flight run to completion.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Stop now and start after the debounce delay. Successive calls within the delay
    /// collapse into a single start.
    pub fn restart(&self) {
        self.inner.restart();
    }

    /// Stop for good, cancelling any pending restart or recovery.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.loops.lock().take();
        self.inner.pending.lock().take();
        info!("Synchronizer shut down");
    }

    /// Change both cadences. Persisted, and applied through a debounced restart when
    /// running.
    pub fn set_refresh_rate(&self, prices: Duration, candles: Duration) -> FeedResult<()> {
        if prices.is_zero() || candles.is_zero() {
            return Err(FeedError::InvalidRate(format!(
                "intervals must be non-zero (prices {}ms, candles {}ms)",
                prices.as_millis(),
                candles.as_millis()
            )));
        }

        *self.inner.rates.lock() = (prices, candles);
        if let Err(e) = self.inner.persist_rate(prices, candles) {
            warn!(error = %e, "Failed to persist refresh rate");
        }
        info!(
            prices_ms = prices.as_millis() as u64,
            candles_ms = candles.as_millis() as u64,
            "Refresh rate changed"
        );

        if self.is_running() {
            self.restart();
        }
        Ok(())
    }

    /// Apply one of `REFRESH_OPTIONS` by label.
    pub fn set_refresh_preset(&self, label: &str) -> FeedResult<()> {
        let rate = RefreshRate::find(label)
            .ok_or_else(|| FeedError::InvalidRate(format!("unknown preset {label}")))?;
        self.set_refresh_rate(rate.prices, rate.candles)
    }

    /// Switch the candle loop to another symbol/timeframe. Takes effect on the next tick.
    pub fn set_context(&self, context: SyncContext) {
        info!(
            symbol = %context.symbol,
            timeframe = %context.timeframe,
            "Sync context changed"
        );
        *self.inner.context.write() = context;
    }

    pub fn context(&self) -> SyncContext {
        self.inner.context.read().clone()
    }

    pub fn rates(&self) -> (Duration, Duration) {
        *self.inner.rates.lock()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.fail_count.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> &Arc<MarketState> {
        &self.inner.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotice> {
        self.inner.notices.subscribe()
    }
}

impl Inner {
    fn start(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            warn!("Synchronizer is shut down, ignoring start");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Synchronizer already running");
            return;
        }

        self.fail_count.store(0, Ordering::SeqCst);
        Metrics::feed_consecutive_failures(0);
        self.load_saved_rate();

        let (price_every, candle_every) = *self.rates.lock();
        let token = self.shutdown.child_token();
        if let Some(previous) = self.loops.lock().replace(token.clone()) {
            previous.cancel();
        }

        tokio::spawn(self.clone().poll_loop(Feed::Prices, price_every, token.clone()));
        tokio::spawn(self.clone().poll_loop(Feed::Candles, candle_every, token));

        info!(
            prices_ms = price_every.as_millis() as u64,
            candles_ms = candle_every.as_millis() as u64,
            "Synchronizer started"
        );
    }

    fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if let Some(token) = self.loops.lock().take() {
            token.cancel();
        }
        if was_running {
            info!("Synchronizer stopped");
        }
    }

    fn restart(self: &Arc<Self>) {
        self.stop();
        self.schedule_start(self.config.restart_debounce, false);
    }

    /// Start after `delay`, replacing any start already scheduled.
    fn schedule_start(self: &Arc<Self>, delay: Duration, reset_failures: bool) {
        let token = self.shutdown.child_token();
        if let Some(previous) = self.pending.lock().replace(token.clone()) {
            previous.cancel();
        }

        let inner = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => debug!("Scheduled start cancelled"),
                () = tokio::time::sleep(delay) => {
                    if reset_failures {
                        inner.fail_count.store(0, Ordering::SeqCst);
                    }
                    inner.start();
                }
            }
        });
    }

    async fn poll_loop(self: Arc<Self>, feed: Feed, period: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let inner = self.clone();
                    tokio::spawn(async move {
                        match feed {
                            Feed::Prices => inner.fetch_prices().await,
                            Feed::Candles => inner.fetch_candles().await,
                        }
                    });
                }
            }
        }
        debug!(feed = feed.as_str(), "Poll loop stopped");
    }

    async fn fetch_prices(self: &Arc<Self>) {
        let Some(_flight) = InFlight::acquire(&self.fetching_prices) else {
            debug!("Price fetch already in flight, skipping tick");
            return;
        };

        match self.source.fetch_prices().await {
            Ok(snapshot) => {
                self.state.replace_prices(snapshot);
                self.fill_price_from_candles();
                if self.fail_count.swap(0, Ordering::SeqCst) > 0 {
                    info!("Price feed recovered");
                }
                Metrics::feed_consecutive_failures(0);
            }
            Err(e) => self.on_price_failure(&e),
        }
    }

    fn on_price_failure(self: &Arc<Self>, error: &FeedError) {
        let failures = self.fail_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.set_connected(false);
        Metrics::feed_failure(Feed::Prices.as_str());
        Metrics::feed_consecutive_failures(failures);
        warn!(failures, error = %error, "Price fetch failed");

        if failures >= self.config.max_failures && self.running.load(Ordering::SeqCst) {
            error!(
                failures,
                recovery_ms = self.config.recovery_delay.as_millis() as u64,
                "Price feed unreachable, pausing synchronizer"
            );
            self.notify(NoticeLevel::Error, "Connection lost, check your network");
            self.stop();
            Metrics::feed_auto_restart();
            self.schedule_start(self.config.recovery_delay, true);
        } else if failures == 1 {
            self.notify(NoticeLevel::Warning, "Connection error, retrying");
        }
    }

    async fn fetch_candles(self: &Arc<Self>) {
        let Some(_flight) = InFlight::acquire(&self.fetching_candles) else {
            debug!("Candle fetch already in flight, skipping tick");
            return;
        };

        let context = self.context.read().clone();
        match self
            .source
            .fetch_candles(&context.symbol, context.timeframe, context.candle_limit)
            .await
        {
            Ok(candles) if candles.is_empty() => {
                debug!(symbol = %context.symbol, "Empty candle payload, keeping previous series");
            }
            Ok(candles) => {
                self.state
                    .replace_candles(&context.symbol, context.timeframe, candles);
                self.fill_price_from_candles();
            }
            Err(e) => {
                Metrics::feed_failure(Feed::Candles.as_str());
                warn!(symbol = %context.symbol, error = %e, "Candle fetch failed");
            }
        }
    }

    /// Quote the active symbol at its last close when the ticker feed does not list it.
    fn fill_price_from_candles(&self) {
        let context = self.context.read().clone();
        let Some(close) = self
            .state
            .candles(&context.symbol, context.timeframe)
            .and_then(|candles| candles.last().map(|c| c.close))
            .filter(|close| close.is_finite() && *close > 0.0)
        else {
            return;
        };

        let mut narrow = PriceSnapshot::new();
        narrow.insert(context.symbol.clone(), PriceTick::new(close));
        if self.state.merge_missing_prices(&narrow) > 0 {
            debug!(symbol = %context.symbol, close, "Active symbol quoted from last candle");
        }
    }

    fn notify(&self, level: NoticeLevel, message: &str) {
        // No subscribers is fine.
        let _ = self.notices.send(SyncNotice {
            level,
            message: message.to_string(),
        });
    }

    fn persist_rate(&self, prices: Duration, candles: Duration) -> FeedResult<()> {
        let saved = SavedRate::Millis {
            prices_ms: prices.as_millis() as u64,
            candles_ms: candles.as_millis() as u64,
        };
        store_json(self.store.as_ref(), keys::REFRESH_RATE, &saved)?;
        Ok(())
    }

    fn saved_rate(&self) -> FeedResult<Option<(Duration, Duration)>> {
        let saved: Option<SavedRate> = load_json(self.store.as_ref(), keys::REFRESH_RATE)?;
        Ok(match saved {
            Some(SavedRate::Millis {
                prices_ms,
                candles_ms,
            }) if prices_ms > 0 && candles_ms > 0 => Some((
                Duration::from_millis(prices_ms),
                Duration::from_millis(candles_ms),
            )),
            Some(SavedRate::Label(label)) => {
                RefreshRate::find(&label).map(|rate| (rate.prices, rate.candles))
            }
            _ => None,
        })
    }

    fn load_saved_rate(&self) {
        match self.saved_rate() {
            Ok(Some(rates)) => *self.rates.lock() = rates,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not load saved refresh rate, using current"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{BoxFuture, Candle};
    use pulse_gateway::GatewayError;
    use pulse_persistence::MemoryStore;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    #[derive(Default)]
    struct MockSource {
        fail_prices: AtomicBool,
        fail_candles: AtomicBool,
        price_delay: Mutex<Duration>,
        price_calls: AtomicUsize,
        candle_calls: AtomicUsize,
        last_candle_request: Mutex<Option<(String, Timeframe, u32)>>,
    }

    impl MockSource {
        fn price_calls(&self) -> usize {
            self.price_calls.load(Ordering::SeqCst)
        }

        fn candle_calls(&self) -> usize {
            self.candle_calls.load(Ordering::SeqCst)
        }
    }

    impl MarketDataSource for MockSource {
        fn fetch_prices(&self) -> BoxFuture<'_, FeedResult<PriceSnapshot>> {
            Box::pin(async move {
                self.price_calls.fetch_add(1, Ordering::SeqCst);
                let delay = *self.price_delay.lock();
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                if self.fail_prices.load(Ordering::SeqCst) {
                    return Err(GatewayError::Transport("connection refused".into()).into());
                }
                Ok([("BTC".to_string(), PriceTick::new(100.0))]
                    .into_iter()
                    .collect())
            })
        }

        fn fetch_candles<'a>(
            &'a self,
            symbol: &'a str,
            timeframe: Timeframe,
            limit: u32,
        ) -> BoxFuture<'a, FeedResult<Vec<Candle>>> {
            Box::pin(async move {
                self.candle_calls.fetch_add(1, Ordering::SeqCst);
                *self.last_candle_request.lock() = Some((symbol.to_string(), timeframe, limit));
                if self.fail_candles.load(Ordering::SeqCst) {
                    return Err(FeedError::InvalidPayload("garbage".into()));
                }
                Ok((0..30)
                    .map(|i| Candle::new(i, 100.0, 101.0, 99.0, 100.5, 10.0))
                    .collect())
            })
        }
    }

    fn synchronizer(source: &Arc<MockSource>, store: &Arc<MemoryStore>, config: SyncConfig) -> DataSynchronizer {
        DataSynchronizer::new(
            source.clone(),
            Arc::new(MarketState::new()),
            store.clone(),
            config,
            SyncContext::default(),
        )
    }

    fn default_sync(source: &Arc<MockSource>) -> DataSynchronizer {
        synchronizer(source, &Arc::new(MemoryStore::new()), SyncConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_fetches_immediately_then_on_cadence() {
        let source = Arc::new(MockSource::default());
        let sync = default_sync(&source);

        sync.start();
        sleep(Duration::from_millis(100)).await;
        assert!(sync.is_running());
        assert_eq!(source.price_calls(), 1);
        assert_eq!(source.candle_calls(), 1);
        assert_eq!(sync.state().price("BTC"), Some(100.0));
        assert_eq!(
            sync.state().candles("BTC", Timeframe::M15).map(|c| c.len()),
            Some(30)
        );

        sleep(Duration::from_millis(5_000)).await;
        assert_eq!(source.price_calls(), 2);
        assert_eq!(source.candle_calls(), 1);

        sleep(Duration::from_millis(5_000)).await;
        assert_eq!(source.price_calls(), 3);
        assert_eq!(source.candle_calls(), 2);
        sync.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlisted_active_symbol_quoted_from_candles() {
        let source = Arc::new(MockSource::default());
        let sync = default_sync(&source);
        sync.set_context(SyncContext {
            symbol: "ETH".to_string(),
            ..SyncContext::default()
        });

        sync.start();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(sync.state().price("BTC"), Some(100.0));
        assert_eq!(sync.state().price("ETH"), Some(100.5));

        // The ticker feed stays authoritative for symbols it lists.
        sync.set_context(SyncContext::default());
        sleep(Duration::from_secs(10)).await;
        assert_eq!(sync.state().price("BTC"), Some(100.0));
        sync.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_is_not_reissued() {
        let source = Arc::new(MockSource::default());
        *source.price_delay.lock() = Duration::from_secs(12);
        let sync = default_sync(&source);

        sync.start();
        sleep(Duration::from_secs(11)).await;
        assert_eq!(source.price_calls(), 1);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(source.price_calls(), 2);
        sync.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_escalate_and_self_heal() {
        let source = Arc::new(MockSource::default());
        source.fail_prices.store(true, Ordering::SeqCst);
        let config = SyncConfig {
            price_interval: Duration::from_secs(1),
            ..SyncConfig::default()
        };
        let sync = synchronizer(&source, &Arc::new(MemoryStore::new()), config);
        let mut notices = sync.subscribe();

        sync.start();
        sleep(Duration::from_millis(4_500)).await;
        assert_eq!(source.price_calls(), 5);
        assert!(!sync.is_running());
        assert!(!sync.state().is_connected());

        assert_eq!(notices.try_recv().unwrap().level, NoticeLevel::Warning);
        assert_eq!(notices.try_recv().unwrap().level, NoticeLevel::Error);
        assert!(notices.try_recv().is_err());

        // Still paused just before the recovery deadline.
        sleep(Duration::from_millis(14_000)).await;
        assert!(!sync.is_running());
        assert_eq!(source.price_calls(), 5);

        source.fail_prices.store(false, Ordering::SeqCst);
        sleep(Duration::from_millis(1_000)).await;
        assert!(sync.is_running());
        assert_eq!(source.price_calls(), 6);
        assert_eq!(sync.failure_count(), 0);
        assert!(sync.state().is_connected());
        sync.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_candle_failures_do_not_escalate() {
        let source = Arc::new(MockSource::default());
        source.fail_candles.store(true, Ordering::SeqCst);
        let sync = default_sync(&source);

        sync.start();
        sleep(Duration::from_secs(31)).await;
        assert!(sync.is_running());
        assert_eq!(sync.failure_count(), 0);
        assert_eq!(source.candle_calls(), 4);
        assert!(sync.state().candles("BTC", Timeframe::M15).is_none());
        assert_eq!(sync.state().price("BTC"), Some(100.0));
        sync.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_is_debounced() {
        let source = Arc::new(MockSource::default());
        let sync = default_sync(&source);

        sync.start();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(source.price_calls(), 1);

        sync.restart();
        sync.restart();
        sync.restart();
        assert!(!sync.is_running());

        sleep(Duration::from_millis(300)).await;
        assert!(!sync.is_running());

        sleep(Duration::from_millis(200)).await;
        assert!(sync.is_running());
        assert_eq!(source.price_calls(), 2);
        sync.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_change_redirects_candles() {
        let source = Arc::new(MockSource::default());
        let sync = default_sync(&source);

        sync.start();
        sleep(Duration::from_millis(100)).await;
        sync.set_context(SyncContext {
            symbol: "ETH".into(),
            timeframe: Timeframe::H1,
            candle_limit: 200,
        });
        sync.restart();
        sleep(Duration::from_millis(500)).await;

        assert_eq!(
            *source.last_candle_request.lock(),
            Some(("ETH".to_string(), Timeframe::H1, 200))
        );
        assert!(sync.state().candles("ETH", Timeframe::H1).is_some());
        sync.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_rate_persisted_and_reloaded() {
        let source = Arc::new(MockSource::default());
        let store = Arc::new(MemoryStore::new());

        let first = synchronizer(&source, &store, SyncConfig::default());
        tokio_test::assert_ok!(first.set_refresh_rate(Duration::from_secs(2), Duration::from_secs(4)));
        assert!(!first.is_running());

        let second = synchronizer(&source, &store, SyncConfig::default());
        assert_eq!(second.rates(), (Duration::from_secs(5), Duration::from_secs(10)));
        second.start();
        assert_eq!(second.rates(), (Duration::from_secs(2), Duration::from_secs(4)));
        second.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_legacy_preset_label_is_understood() {
        let source = Arc::new(MockSource::default());
        let store = Arc::new(MemoryStore::new());
        store.store(keys::REFRESH_RATE, "\"30s\"").unwrap();

        let sync = synchronizer(&source, &store, SyncConfig::default());
        sync.start();
        assert_eq!(sync.rates(), (Duration::from_secs(30), Duration::from_secs(30)));
        sync.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_change_while_running_restarts() {
        let source = Arc::new(MockSource::default());
        let sync = default_sync(&source);

        sync.start();
        sleep(Duration::from_millis(100)).await;
        tokio_test::assert_ok!(sync.set_refresh_preset("1s"));
        assert!(!sync.is_running());

        sleep(Duration::from_millis(500)).await;
        assert!(sync.is_running());
        assert_eq!(sync.rates(), (Duration::from_secs(1), Duration::from_secs(2)));
        sync.shutdown();
    }

    #[test]
    fn test_invalid_rates_rejected() {
        let source = Arc::new(MockSource::default());
        let sync = default_sync(&source);
        assert!(matches!(
            sync.set_refresh_rate(Duration::ZERO, Duration::from_secs(1)),
            Err(FeedError::InvalidRate(_))
        ));
        tokio_test::assert_err!(sync.set_refresh_preset("7s"));
        assert_eq!(REFRESH_OPTIONS.len(), 10);
        assert_eq!(RefreshRate::find("5s").unwrap().candles, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_restart() {
        let source = Arc::new(MockSource::default());
        let sync = default_sync(&source);

        sync.start();
        sync.restart();
        sync.shutdown();
        sleep(Duration::from_secs(1)).await;
        assert!(!sync.is_running());

        sync.start();
        assert!(!sync.is_running());
    }
}
