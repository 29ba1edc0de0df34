//! Signal arbitration.
//!
//! Produces one authoritative `Proposal` per (symbol, leverage, timeframe):
//! - evaluates LONG and SHORT concurrently (remote evaluator, local scorer fallback)
//! - picks the winner, normalizes sub-signal vocabulary and applies a stability filter
//! - caches the result for a short TTL

pub mod arbiter;
pub mod cache;
pub mod error;
pub mod evaluator;
pub mod normalize;
pub mod stability;

pub use arbiter::{pick_best, SignalArbiter};
pub use cache::{CacheKey, ProposalCache, DEFAULT_CACHE_TTL};
pub use error::{ArbiterError, ArbiterResult};
pub use evaluator::{AnalysisRequest, Evaluator, FallbackEvaluator, LocalEvaluator, RemoteEvaluator};
pub use normalize::{is_aligned, normalize_signal, normalize_sub_signals};
pub use stability::{AntiFlipFilter, NoopStability, StabilityFilter};
