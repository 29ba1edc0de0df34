//! Main application logic.

use std::sync::Arc;
use std::time::Duration;

use pulse_arbiter::{
    AntiFlipFilter, Evaluator, FallbackEvaluator, LocalEvaluator, NoopStability, RemoteEvaluator,
    SignalArbiter, StabilityFilter,
};
use pulse_core::{Proposal, Timeframe};
use pulse_feed::{DataSynchronizer, MarketState, SyncContext};
use pulse_gateway::{MarketClient, RequestGateway};
use pulse_persistence::{keys, load_json, store_json, JsonFileStore, KvStore};
use pulse_position::{PositionBook, PositionWatchdog};
use pulse_scorer::DecisionScorer;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{AppConfig, StabilityMode};
use crate::error::AppResult;

/// Main application state.
pub struct Application {
    config: AppConfig,
    store: Arc<dyn KvStore>,
    market: Arc<MarketState>,
    gateway: Arc<RequestGateway>,
    synchronizer: DataSynchronizer,
    arbiter: Arc<SignalArbiter>,
    book: Arc<PositionBook>,
    watchdog: Arc<PositionWatchdog>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build every component from `config`, backed by the configured snapshot file.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let store = Arc::new(JsonFileStore::open(config.persistence.path.clone())?);
        Self::with_store(config, store)
    }

    /// Build every component on top of an existing store.
    pub fn with_store(config: AppConfig, store: Arc<dyn KvStore>) -> AppResult<Self> {
        config.validate()?;

        let market = Arc::new(MarketState::new());
        let gateway = Arc::new(RequestGateway::new(config.gateway.max_concurrent));
        let client = Arc::new(MarketClient::new(
            config.endpoints.endpoints(),
            gateway.clone(),
            config.gateway.fetch_policy(),
            config.gateway.analyze_policy(),
        )?);

        let mut context = config.session.sync_context(config.sync.candle_limit);
        if let Some(symbol) = load_json::<String>(store.as_ref(), keys::SYMBOL)? {
            context.symbol = symbol;
        }
        if let Some(timeframe) = load_json::<Timeframe>(store.as_ref(), keys::TIMEFRAME)? {
            context.timeframe = timeframe;
        }
        info!(symbol = %context.symbol, timeframe = %context.timeframe, "Session context");

        let synchronizer = DataSynchronizer::new(
            client.clone(),
            market.clone(),
            store.clone(),
            config.sync.sync_config(),
            context,
        );

        let local: Arc<dyn Evaluator> = Arc::new(LocalEvaluator::new(
            DecisionScorer::new(config.scorer.scorer_config()),
            market.clone(),
        ));
        let evaluator: Arc<dyn Evaluator> = if config.endpoints.remote_analysis {
            Arc::new(FallbackEvaluator::new(
                Arc::new(RemoteEvaluator::new(client)),
                local,
            ))
        } else {
            local
        };
        let stability: Arc<dyn StabilityFilter> = match config.arbiter.stability {
            StabilityMode::AntiFlip => Arc::new(AntiFlipFilter::new()),
            StabilityMode::None => Arc::new(NoopStability),
        };
        let arbiter = Arc::new(SignalArbiter::new(
            evaluator,
            stability,
            Duration::from_millis(config.arbiter.cache_ttl_ms),
        ));

        let book = Arc::new(PositionBook::new(
            config.book.book_config(),
            market.clone(),
            store.clone(),
        ));
        book.restore()?;

        let watchdog = Arc::new(
            PositionWatchdog::new(book.clone(), market.clone(), book.clone())
                .with_interval(Duration::from_millis(config.watchdog.interval_ms)),
        );

        Ok(Self {
            config,
            store,
            market,
            gateway,
            synchronizer,
            arbiter,
            book,
            watchdog,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn market(&self) -> &Arc<MarketState> {
        &self.market
    }

    pub fn gateway(&self) -> &Arc<RequestGateway> {
        &self.gateway
    }

    pub fn synchronizer(&self) -> &DataSynchronizer {
        &self.synchronizer
    }

    pub fn arbiter(&self) -> &Arc<SignalArbiter> {
        &self.arbiter
    }

    pub fn book(&self) -> &Arc<PositionBook> {
        &self.book
    }

    pub fn watchdog(&self) -> &Arc<PositionWatchdog> {
        &self.watchdog
    }

    /// Current symbol and timeframe.
    pub fn context(&self) -> SyncContext {
        self.synchronizer.context()
    }

    /// Arbitrate the current context at the session leverage.
    pub async fn analyze_current(&self) -> Option<Proposal> {
        let context = self.context();
        self.arbiter
            .analyze(&context.symbol, self.config.session.leverage, context.timeframe)
            .await
    }

    /// Move the session to another symbol/timeframe.
    ///
    /// Queued requests for the old context are abandoned and its cached proposals dropped.
    pub fn switch_context(&self, symbol: &str, timeframe: Timeframe) -> AppResult<()> {
        let old = self.context();
        if old.symbol == symbol && old.timeframe == timeframe {
            return Ok(());
        }

        let abandoned = self.gateway.drain();
        let invalidated = self.arbiter.cache().invalidate_symbol(&old.symbol);
        if old.symbol != symbol {
            self.market.invalidate_candles(&old.symbol);
        }
        info!(
            from = %old.symbol,
            to = symbol,
            timeframe = %timeframe,
            abandoned,
            invalidated,
            "Switching context"
        );

        self.synchronizer.set_context(SyncContext {
            symbol: symbol.to_string(),
            timeframe,
            candle_limit: old.candle_limit,
        });
        if self.synchronizer.is_running() {
            self.synchronizer.restart();
        }

        store_json(self.store.as_ref(), keys::SYMBOL, symbol)?;
        store_json(self.store.as_ref(), keys::TIMEFRAME, &timeframe)?;
        Ok(())
    }

    /// Stop `run` from another task.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Resolves on the shutdown token or Ctrl-C.
    async fn stop_requested(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => info!("Shutdown requested"),
            _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
        }
    }

    /// Run until Ctrl-C or the shutdown token fires.
    pub async fn run(&self) -> AppResult<()> {
        info!(
            symbol = %self.context().symbol,
            remote_analysis = self.config.endpoints.remote_analysis,
            "Starting application"
        );

        self.synchronizer.start();

        let watchdog_token = self.shutdown.child_token();
        let watchdog_handle = {
            let watchdog = self.watchdog.clone();
            let token = watchdog_token.clone();
            tokio::spawn(async move { watchdog.run(token).await })
        };

        let mut analysis_ticker = (self.config.session.analysis_interval_ms > 0).then(|| {
            tokio::time::interval(Duration::from_millis(self.config.session.analysis_interval_ms))
        });
        let mut proposal_count = 0u64;

        let stop = self.stop_requested();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = next_tick(&mut analysis_ticker) => {
                    // An in-flight analysis must not delay shutdown.
                    let outcome = tokio::select! {
                        outcome = self.analyze_current() => outcome,
                        _ = &mut stop => break,
                    };
                    match outcome {
                        Some(proposal) => {
                            proposal_count += 1;
                            info!(
                                symbol = %proposal.symbol,
                                direction = %proposal.direction,
                                decision = %proposal.decision,
                                confidence = proposal.confidence,
                                price = proposal.price,
                                tp = proposal.tp,
                                sl = proposal.sl,
                                filtered = proposal.filtered,
                                "Proposal (#{proposal_count})"
                            );
                        }
                        None => warn!(symbol = %self.context().symbol, "No signal"),
                    }
                }

                _ = &mut stop => break,
            }
        }

        info!(proposal_count, "Shutting down");
        watchdog_token.cancel();
        self.synchronizer.shutdown();
        self.gateway.drain();
        if let Err(e) = watchdog_handle.await {
            warn!(error = %e, "Watchdog task ended abnormally");
        }

        self.book.persist()?;
        info!(
            balance = self.book.balance(),
            open_positions = self.book.open_count(),
            "Position book saved"
        );
        Ok(())
    }
}

/// Next tick of an optional ticker. Never resolves when the ticker is disabled.
async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
