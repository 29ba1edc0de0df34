//! The signal arbiter.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pulse_core::{Decision, Direction, DirectionVerdict, PipelineMeta, Proposal, Timeframe};
use pulse_telemetry::Metrics;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, ProposalCache};
use crate::error::ArbiterResult;
use crate::evaluator::{AnalysisRequest, Evaluator};
use crate::normalize::{is_aligned, normalize_sub_signals};
use crate::stability::StabilityFilter;

/// Pick the stronger of two directional proposals.
///
/// Score is `(ENTER ? 100 : 0) + confidence`; ties go to LONG.
pub fn pick_best(long: Option<Proposal>, short: Option<Proposal>) -> Option<Proposal> {
    match (long, short) {
        (None, None) => None,
        (Some(long), None) => Some(long),
        (None, Some(short)) => Some(short),
        (Some(long), Some(short)) => {
            if long.rank_score() >= short.rank_score() {
                Some(long)
            } else {
                Some(short)
            }
        }
    }
}

fn verdict(proposal: Option<&Proposal>) -> Option<DirectionVerdict> {
    proposal.map(|p| DirectionVerdict {
        decision: p.decision,
        confidence: p.confidence,
    })
}

/// Produces one authoritative proposal per (symbol, leverage, timeframe).
pub struct SignalArbiter {
    evaluator: Arc<dyn Evaluator>,
    stability: Arc<dyn StabilityFilter>,
    cache: ProposalCache,
}

impl SignalArbiter {
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        stability: Arc<dyn StabilityFilter>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            evaluator,
            stability,
            cache: ProposalCache::new(cache_ttl),
        }
    }

    pub fn cache(&self) -> &ProposalCache {
        &self.cache
    }

    /// Arbitrate LONG vs SHORT for `symbol`.
    ///
    /// Returns a cached copy when one is fresh. `None` means no signal: both directions
    /// (and the LONG-only retry) failed or were abandoned.
    pub async fn analyze(&self, symbol: &str, leverage: u32, timeframe: Timeframe) -> Option<Proposal> {
        let key = CacheKey::new(symbol, leverage, timeframe);
        if let Some(cached) = self.cache.get(&key) {
            Metrics::cache_hit();
            debug!(symbol, leverage, timeframe = %timeframe, "Using cached arbitration");
            return Some(cached);
        }
        Metrics::cache_miss();

        let started = Instant::now();
        let long_request = AnalysisRequest::new(symbol, Direction::Long, leverage, timeframe);
        let short_request = AnalysisRequest::new(symbol, Direction::Short, leverage, timeframe);
        let (long, short) = tokio::join!(
            self.evaluator.evaluate(&long_request),
            self.evaluator.evaluate(&short_request)
        );

        let abandoned = matches!((&long, &short), (Err(a), Err(b)) if a.is_abandoned() && b.is_abandoned());
        let long = Self::settle(symbol, Direction::Long, long);
        let short = Self::settle(symbol, Direction::Short, short);
        let long_verdict = verdict(long.as_ref());
        let short_verdict = verdict(short.as_ref());

        if let (Some(l), Some(s)) = (&long, &short) {
            debug!(
                symbol,
                long = %l.decision,
                long_confidence = l.confidence,
                short = %s.decision,
                short_confidence = s.confidence,
                "Both directions evaluated"
            );
        }

        let Some(mut result) = pick_best(long, short) else {
            if abandoned {
                debug!(symbol, "Arbitration abandoned");
                return None;
            }
            return self.degraded(symbol, leverage, timeframe, started).await;
        };

        normalize_sub_signals(&mut result.source_bots);

        let filtered = match self.stability.review(symbol, &result) {
            Some(mut replacement) => {
                replacement.filtered = true;
                Metrics::stability_override();
                result = replacement;
                true
            }
            None => false,
        };
        if result.decision == Decision::Enter && !result.levels_consistent() {
            warn!(
                symbol,
                direction = %result.direction,
                price = result.price,
                tp = result.tp,
                sl = result.sl,
                "ENTER without usable levels, downgrading to WAIT"
            );
            result.decision = Decision::Wait;
        }
        self.stability.record_analysis(symbol, &result);

        let green = result.source_bots.iter().filter(|s| is_aligned(s)).count();
        let total = result.source_bots.len();
        let alignment = (total > 0).then(|| green as f64 / total as f64);

        result.pipeline = Some(PipelineMeta {
            analyzed_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            long: long_verdict,
            short: short_verdict,
            chosen_direction: result.direction,
            stability_filtered: filtered,
            alignment,
            green_signals: green,
            total_signals: total,
            degraded: false,
        });

        Metrics::arbiter_decision(result.direction.as_str(), result.decision.as_str());
        info!(
            symbol,
            direction = %result.direction,
            decision = %result.decision,
            confidence = result.confidence,
            green,
            total,
            filtered,
            "Arbitration complete"
        );

        self.cache.insert(key, result.clone());
        Some(result)
    }

    fn settle(symbol: &str, direction: Direction, outcome: ArbiterResult<Proposal>) -> Option<Proposal> {
        match outcome {
            Ok(proposal) => Some(proposal),
            Err(e) if e.is_abandoned() => None,
            Err(e) => {
                warn!(symbol, direction = %direction, error = %e, "Directional evaluation failed");
                None
            }
        }
    }

    /// Last resort after both directions failed: a single LONG evaluation, uncached and
    /// not reviewed by the stability filter.
    async fn degraded(
        &self,
        symbol: &str,
        leverage: u32,
        timeframe: Timeframe,
        started: Instant,
    ) -> Option<Proposal> {
        let request = AnalysisRequest::new(symbol, Direction::Long, leverage, timeframe);
        match self.evaluator.evaluate(&request).await {
            Ok(mut proposal) => {
                warn!(symbol, "Both directions failed, using LONG-only evaluation");
                normalize_sub_signals(&mut proposal.source_bots);
                let green = proposal.source_bots.iter().filter(|s| is_aligned(s)).count();
                let total = proposal.source_bots.len();
                proposal.pipeline = Some(PipelineMeta {
                    analyzed_at: Utc::now(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    long: verdict(Some(&proposal)),
                    short: None,
                    chosen_direction: proposal.direction,
                    stability_filtered: false,
                    alignment: (total > 0).then(|| green as f64 / total as f64),
                    green_signals: green,
                    total_signals: total,
                    degraded: true,
                });
                Some(proposal)
            }
            Err(e) => {
                warn!(symbol, error = %e, "No signal in either direction");
                Metrics::no_signal();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArbiterError;
    use crate::stability::{AntiFlipFilter, MockStabilityFilter, NoopStability};
    use parking_lot::Mutex;
    use pulse_core::{BoxFuture, Decision, SignalColor, SubSignal};
    use pulse_gateway::GatewayError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted evaluator: answers per direction, counts calls.
    #[derive(Default)]
    struct ScriptedEvaluator {
        long: Mutex<VecDeque<ArbiterResult<Proposal>>>,
        short: Mutex<VecDeque<ArbiterResult<Proposal>>>,
        calls: AtomicUsize,
    }

    impl ScriptedEvaluator {
        fn with(long: ArbiterResult<Proposal>, short: ArbiterResult<Proposal>) -> Self {
            let evaluator = Self::default();
            evaluator.push(long, short);
            evaluator
        }

        fn push(&self, long: ArbiterResult<Proposal>, short: ArbiterResult<Proposal>) {
            self.long.lock().push_back(long);
            self.short.lock().push_back(short);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Evaluator for ScriptedEvaluator {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn evaluate<'a>(&'a self, request: &'a AnalysisRequest) -> BoxFuture<'a, ArbiterResult<Proposal>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let queue = match request.direction {
                Direction::Short => &self.short,
                _ => &self.long,
            };
            let next = queue
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ArbiterError::Evaluation("script exhausted".into())));
            Box::pin(async move { next })
        }
    }

    fn proposal(direction: Direction, decision: Decision, confidence: f64) -> Proposal {
        let mut p = Proposal::wait("BTC", direction, confidence, "scripted");
        p.decision = decision;
        p.price = 100.0;
        match direction {
            Direction::Long => (p.tp, p.sl) = (104.0, 98.0),
            Direction::Short => (p.tp, p.sl) = (96.0, 102.0),
            Direction::Neutral => {}
        }
        p
    }

    fn down() -> ArbiterResult<Proposal> {
        Err(GatewayError::Transport("down".into()).into())
    }

    fn arbiter(evaluator: Arc<ScriptedEvaluator>) -> SignalArbiter {
        SignalArbiter::new(evaluator, Arc::new(NoopStability), Duration::from_secs(25))
    }

    #[test]
    fn test_pick_best_rules() {
        let enter_low = proposal(Direction::Short, Decision::Enter, 55.0);
        let wait_high = proposal(Direction::Long, Decision::Wait, 90.0);
        let best = pick_best(Some(wait_high.clone()), Some(enter_low)).unwrap();
        assert_eq!(best.direction, Direction::Short);

        let tie_long = proposal(Direction::Long, Decision::Wait, 60.0);
        let tie_short = proposal(Direction::Short, Decision::Wait, 60.0);
        assert_eq!(
            pick_best(Some(tie_long), Some(tie_short)).unwrap().direction,
            Direction::Long
        );

        assert_eq!(pick_best(None, Some(wait_high.clone())), Some(wait_high));
        assert!(pick_best(None, None).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_reuse_within_ttl() {
        let evaluator = Arc::new(ScriptedEvaluator::with(
            Ok(proposal(Direction::Long, Decision::Enter, 80.0)),
            Ok(proposal(Direction::Short, Decision::Wait, 50.0)),
        ));
        evaluator.push(
            Ok(proposal(Direction::Long, Decision::Wait, 40.0)),
            Ok(proposal(Direction::Short, Decision::Enter, 75.0)),
        );
        let arbiter = arbiter(evaluator.clone());

        let first = arbiter.analyze("BTC", 35, Timeframe::M15).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        let second = arbiter.analyze("BTC", 35, Timeframe::M15).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(evaluator.calls(), 2);

        tokio::time::advance(Duration::from_secs(16)).await;
        let third = arbiter.analyze("BTC", 35, Timeframe::M15).await.unwrap();
        assert_eq!(evaluator.calls(), 4);
        assert_eq!(third.direction, Direction::Short);
    }

    #[tokio::test]
    async fn test_pipeline_metadata_and_alignment() {
        let mut winner = proposal(Direction::Long, Decision::Enter, 72.0);
        let mut voter = SubSignal::new("flow", "caution");
        voter.vote = Some("GO".into());
        winner.source_bots = vec![
            SubSignal::new("trend", "bullish"),
            SubSignal::new("momentum", "lean_bull"),
            SubSignal::new("rsi", "bearish"),
            voter,
        ];
        let evaluator = Arc::new(ScriptedEvaluator::with(
            Ok(winner),
            Ok(proposal(Direction::Short, Decision::Cancel, 30.0)),
        ));

        let result = arbiter(evaluator).analyze("BTC", 35, Timeframe::M15).await.unwrap();
        let meta = result.pipeline.clone().unwrap();
        assert_eq!(meta.green_signals, 3);
        assert_eq!(meta.total_signals, 4);
        assert_eq!(meta.alignment, Some(0.75));
        assert_eq!(meta.chosen_direction, Direction::Long);
        assert_eq!(meta.short.unwrap().decision, Decision::Cancel);
        assert!(!meta.degraded);
        assert_eq!(result.source_bots[2].color, Some(SignalColor::Red));
        assert_eq!(result.source_bots[2].signal, "bearish");
    }

    #[tokio::test]
    async fn test_one_side_failing_uses_the_other() {
        let evaluator = Arc::new(ScriptedEvaluator::with(
            down(),
            Ok(proposal(Direction::Short, Decision::Wait, 58.0)),
        ));
        let result = arbiter(evaluator).analyze("BTC", 35, Timeframe::M15).await.unwrap();
        assert_eq!(result.direction, Direction::Short);
        let meta = result.pipeline.unwrap();
        assert!(meta.long.is_none());
        assert_eq!(meta.alignment, None);
    }

    #[tokio::test]
    async fn test_both_failing_retries_long_once() {
        let evaluator = Arc::new(ScriptedEvaluator::with(down(), down()));
        evaluator.long.lock().push_back(Ok(proposal(Direction::Long, Decision::Wait, 50.0)));
        let arbiter = arbiter(evaluator.clone());

        let result = arbiter.analyze("BTC", 35, Timeframe::M15).await.unwrap();
        assert!(result.pipeline.unwrap().degraded);
        assert_eq!(evaluator.calls(), 3);
        assert!(arbiter.cache().is_empty());
    }

    #[tokio::test]
    async fn test_no_signal_when_everything_fails() {
        let evaluator = Arc::new(ScriptedEvaluator::with(down(), down()));
        let arbiter = arbiter(evaluator.clone());
        assert!(arbiter.analyze("BTC", 35, Timeframe::M15).await.is_none());
        assert_eq!(evaluator.calls(), 3);
    }

    #[tokio::test]
    async fn test_abandoned_requests_give_up_immediately() {
        let evaluator = Arc::new(ScriptedEvaluator::with(
            Err(GatewayError::QueueCleared.into()),
            Err(GatewayError::QueueCleared.into()),
        ));
        let arbiter = arbiter(evaluator.clone());
        assert!(arbiter.analyze("BTC", 35, Timeframe::M15).await.is_none());
        assert_eq!(evaluator.calls(), 2);
    }

    #[tokio::test]
    async fn test_blocked_flip_never_returns_misplaced_levels() {
        let evaluator = Arc::new(ScriptedEvaluator::default());
        for _ in 0..2 {
            evaluator.push(
                Ok(proposal(Direction::Long, Decision::Enter, 85.0)),
                Ok(proposal(Direction::Short, Decision::Wait, 40.0)),
            );
        }
        evaluator.push(
            Ok(proposal(Direction::Long, Decision::Wait, 50.0)),
            Ok(proposal(Direction::Short, Decision::Enter, 70.0)),
        );
        let arbiter = SignalArbiter::new(
            evaluator.clone(),
            Arc::new(AntiFlipFilter::new()),
            Duration::ZERO,
        );

        for _ in 0..2 {
            let long = arbiter.analyze("BTC", 35, Timeframe::M15).await.unwrap();
            assert_eq!(long.decision, Decision::Enter);
            assert!(long.levels_consistent());
        }

        let kept = arbiter.analyze("BTC", 35, Timeframe::M15).await.unwrap();
        assert_eq!(evaluator.calls(), 6);
        assert!(kept.filtered);
        assert_eq!(kept.direction, Direction::Long);
        assert_eq!(kept.decision, Decision::Wait);
        assert_eq!((kept.tp, kept.sl), (0.0, 0.0));
    }

    #[tokio::test]
    async fn test_enter_with_misplaced_levels_is_downgraded() {
        let mut broken = proposal(Direction::Long, Decision::Enter, 90.0);
        (broken.tp, broken.sl) = (96.0, 102.0);
        let evaluator = Arc::new(ScriptedEvaluator::with(
            Ok(broken),
            Ok(proposal(Direction::Short, Decision::Wait, 40.0)),
        ));

        let result = arbiter(evaluator).analyze("BTC", 35, Timeframe::M15).await.unwrap();
        assert_eq!(result.direction, Direction::Long);
        assert_eq!(result.decision, Decision::Wait);
    }

    #[tokio::test]
    async fn test_stability_override_is_flagged_and_recorded() {
        let evaluator = Arc::new(ScriptedEvaluator::with(
            Ok(proposal(Direction::Long, Decision::Wait, 40.0)),
            Ok(proposal(Direction::Short, Decision::Enter, 62.0)),
        ));

        let mut stability = MockStabilityFilter::new();
        stability
            .expect_review()
            .withf(|symbol, _| symbol == "BTC")
            .times(1)
            .returning(|_, p| {
                let mut replacement = p.clone();
                replacement.direction = Direction::Long;
                replacement.decision = Decision::Wait;
                Some(replacement)
            });
        stability
            .expect_record_analysis()
            .withf(|symbol, p| symbol == "BTC" && p.direction == Direction::Long && p.filtered)
            .times(1)
            .return_const(());

        let arbiter = SignalArbiter::new(evaluator, Arc::new(stability), Duration::from_secs(25));
        let result = arbiter.analyze("BTC", 35, Timeframe::M15).await.unwrap();

        assert!(result.filtered);
        assert_eq!(result.direction, Direction::Long);
        assert_eq!(result.decision, Decision::Wait);
        assert!(result.pipeline.unwrap().stability_filtered);
    }
}
