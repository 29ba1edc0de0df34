//! Directional evaluators.
//!
//! The arbiter asks an `Evaluator` for one side at a time. Which evaluator answers is
//! decided when the arbiter is built: the remote endpoint, the local scorer, or the
//! remote endpoint backed by the local scorer.

use std::sync::Arc;

use pulse_core::{BoxFuture, Direction, Proposal, ProposalOrigin, SubSignal, Timeframe};
use pulse_feed::MarketState;
use pulse_gateway::{AnalyzeRequest, MarketClient};
use pulse_scorer::{Bias, DecisionScorer};
use tracing::{debug, warn};

use crate::error::ArbiterResult;

/// One directional analysis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub symbol: String,
    pub direction: Direction,
    pub leverage: u32,
    pub timeframe: Timeframe,
}

impl AnalysisRequest {
    pub fn new(
        symbol: impl Into<String>,
        direction: Direction,
        leverage: u32,
        timeframe: Timeframe,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            leverage,
            timeframe,
        }
    }
}

/// Produces a proposal for one requested direction.
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate<'a>(&'a self, request: &'a AnalysisRequest) -> BoxFuture<'a, ArbiterResult<Proposal>>;
}

/// Remote analysis endpoint.
pub struct RemoteEvaluator {
    client: Arc<MarketClient>,
}

impl RemoteEvaluator {
    pub fn new(client: Arc<MarketClient>) -> Self {
        Self { client }
    }
}

impl Evaluator for RemoteEvaluator {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn evaluate<'a>(&'a self, request: &'a AnalysisRequest) -> BoxFuture<'a, ArbiterResult<Proposal>> {
        Box::pin(async move {
            let body = AnalyzeRequest {
                symbol: request.symbol.clone(),
                direction: request.direction,
                leverage: request.leverage,
                interval: request.timeframe,
            };
            let mut proposal = self.client.analyze(&body).await?;
            proposal.origin = ProposalOrigin::Remote;
            Ok(proposal)
        })
    }
}

/// Local decision scorer over the cached candle series.
pub struct LocalEvaluator {
    scorer: DecisionScorer,
    market: Arc<MarketState>,
}

impl LocalEvaluator {
    pub fn new(scorer: DecisionScorer, market: Arc<MarketState>) -> Self {
        Self { scorer, market }
    }

    /// Score synchronously. Missing candles yield the insufficient-data WAIT proposal.
    pub fn evaluate_now(&self, request: &AnalysisRequest) -> Proposal {
        let candles = self
            .market
            .candles(&request.symbol, request.timeframe)
            .unwrap_or_default();
        let mut proposal = self.scorer.evaluate(
            &request.symbol,
            &candles,
            Some(request.direction),
            request.leverage,
            request.timeframe,
        );

        // Expose the scoring reasons as sub-signals so alignment means something locally.
        if let Some(indicators) = &proposal.indicators {
            let setup = self.scorer.score_setup(indicators, Some(request.direction));
            proposal.source_bots = setup
                .reasons
                .iter()
                .map(|reason| {
                    let vocabulary = match reason.bias {
                        Bias::Bull => "bullish",
                        Bias::Bear => "bearish",
                        Bias::Neutral => "neutral",
                    };
                    let mut signal = SubSignal::new(reason.text.clone(), vocabulary);
                    signal.score = Some(f64::from(reason.weight));
                    signal
                })
                .collect();
        }
        proposal
    }
}

impl Evaluator for LocalEvaluator {
    fn name(&self) -> &'static str {
        "local"
    }

    fn evaluate<'a>(&'a self, request: &'a AnalysisRequest) -> BoxFuture<'a, ArbiterResult<Proposal>> {
        Box::pin(async move { Ok(self.evaluate_now(request)) })
    }
}

/// Tries `primary`, then `fallback` on any failure except abandonment.
pub struct FallbackEvaluator {
    primary: Arc<dyn Evaluator>,
    fallback: Arc<dyn Evaluator>,
}

impl FallbackEvaluator {
    pub fn new(primary: Arc<dyn Evaluator>, fallback: Arc<dyn Evaluator>) -> Self {
        Self { primary, fallback }
    }
}

impl Evaluator for FallbackEvaluator {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn evaluate<'a>(&'a self, request: &'a AnalysisRequest) -> BoxFuture<'a, ArbiterResult<Proposal>> {
        Box::pin(async move {
            match self.primary.evaluate(request).await {
                Ok(proposal) => Ok(proposal),
                Err(e) if e.is_abandoned() => {
                    debug!(symbol = %request.symbol, "Request abandoned, no fallback");
                    Err(e)
                }
                Err(e) => {
                    warn!(
                        symbol = %request.symbol,
                        direction = %request.direction,
                        primary = self.primary.name(),
                        fallback = self.fallback.name(),
                        error = %e,
                        "Primary evaluator failed, falling back"
                    );
                    self.fallback.evaluate(request).await
                }
            }
        })
    }
}
