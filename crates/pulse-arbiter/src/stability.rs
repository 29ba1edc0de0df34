//! Anti-oscillation stability filters.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use pulse_core::{Decision, Direction, Proposal};
use tracing::info;

/// Reviews the winning proposal against recent history.
#[cfg_attr(test, mockall::automock)]
pub trait StabilityFilter: Send + Sync {
    /// A replacement proposal, or `None` to keep the original.
    fn review(&self, symbol: &str, proposal: &Proposal) -> Option<Proposal>;

    /// Record the final proposal for `symbol`.
    fn record_analysis(&self, symbol: &str, proposal: &Proposal);
}

/// Never overrides anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStability;

impl StabilityFilter for NoopStability {
    fn review(&self, _symbol: &str, _proposal: &Proposal) -> Option<Proposal> {
        None
    }

    fn record_analysis(&self, _symbol: &str, _proposal: &Proposal) {}
}

const HISTORY_SIZE: usize = 5;
const LOW_CONFIDENCE: f64 = 65.0;
const WEAKER_MARGIN: f64 = 10.0;
const KEEP_DECISION_ABOVE: f64 = 60.0;
const CHOPPY_FLIPS: usize = 3;
const CHOPPY_CONFIDENCE: f64 = 75.0;

#[derive(Debug, Clone, Copy)]
struct Recorded {
    direction: Direction,
    confidence: f64,
}

/// Blocks low-conviction direction flips.
///
/// Rules, checked in order once at least two analyses are recorded for a symbol:
/// 1. flip where both the new and the last confidence are below 65: keep the last
///    direction, WAIT
/// 2. flip with confidence more than 10 below the last: keep the last direction, keep
///    the decision only above 60 confidence
/// 3. three or more flips in the recorded history and confidence below 75: WAIT
#[derive(Debug, Default)]
pub struct AntiFlipFilter {
    history: Mutex<HashMap<String, VecDeque<Recorded>>>,
}

impl AntiFlipFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history_len(&self, symbol: &str) -> usize {
        self.history.lock().get(symbol).map_or(0, VecDeque::len)
    }

    /// Levels belong to the evaluated side, so a kept opposite direction carries none and
    /// cannot stay ENTER.
    fn overridden(proposal: &Proposal, direction: Direction, decision: Decision, note: String) -> Proposal {
        let mut replaced = proposal.clone();
        if direction != proposal.direction {
            replaced.tp = 0.0;
            replaced.sl = 0.0;
            replaced.liq = 0.0;
            replaced.rr_ratio = None;
        }
        replaced.direction = direction;
        replaced.decision = if decision == Decision::Enter && !replaced.levels_consistent() {
            Decision::Wait
        } else {
            decision
        };
        replaced.reason = format!("{note}. {}", proposal.reason);
        replaced.filtered = true;
        replaced
    }
}

impl StabilityFilter for AntiFlipFilter {
    fn review(&self, symbol: &str, proposal: &Proposal) -> Option<Proposal> {
        let history = self.history.lock();
        let recorded = history.get(symbol).filter(|h| h.len() >= 2)?;
        let last = recorded.back()?;

        if last.direction != proposal.direction {
            if proposal.confidence < LOW_CONFIDENCE && last.confidence < LOW_CONFIDENCE {
                info!(
                    symbol,
                    blocked = %proposal.direction,
                    kept = %last.direction,
                    "Low-confidence flip blocked"
                );
                return Some(Self::overridden(
                    proposal,
                    last.direction,
                    Decision::Wait,
                    format!("Mixed signal, keeping previous {}", last.direction),
                ));
            }

            if proposal.confidence < last.confidence - WEAKER_MARGIN {
                info!(
                    symbol,
                    new_confidence = proposal.confidence,
                    last_confidence = last.confidence,
                    "Weaker flip blocked"
                );
                let decision = if proposal.confidence > KEEP_DECISION_ABOVE {
                    proposal.decision
                } else {
                    Decision::Wait
                };
                return Some(Self::overridden(
                    proposal,
                    last.direction,
                    decision,
                    format!("Keeping {} (previous signal stronger)", last.direction),
                ));
            }
        }

        let flips = recorded
            .iter()
            .zip(recorded.iter().skip(1))
            .filter(|(a, b)| a.direction != b.direction)
            .count();
        if flips >= CHOPPY_FLIPS && proposal.confidence < CHOPPY_CONFIDENCE {
            info!(symbol, flips, "Choppy market, forcing WAIT");
            return Some(Self::overridden(
                proposal,
                proposal.direction,
                Decision::Wait,
                format!("Indecisive market ({flips} recent direction changes)"),
            ));
        }

        None
    }

    fn record_analysis(&self, symbol: &str, proposal: &Proposal) {
        let mut history = self.history.lock();
        let entries = history.entry(symbol.to_string()).or_default();
        entries.push_back(Recorded {
            direction: proposal.direction,
            confidence: proposal.confidence,
        });
        while entries.len() > HISTORY_SIZE {
            entries.pop_front();
        }
    }
}
