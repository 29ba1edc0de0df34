//! Short-lived proposal cache keyed by (symbol, leverage, timeframe).

use std::time::Duration;

use dashmap::DashMap;
use pulse_core::{Proposal, Timeframe};
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(25_000);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub symbol: String,
    pub leverage: u32,
    pub timeframe: Timeframe,
}

impl CacheKey {
    pub fn new(symbol: impl Into<String>, leverage: u32, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            leverage,
            timeframe,
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    proposal: Proposal,
    cached_at: Instant,
}

/// Arbitration results reused while younger than the TTL.
///
/// Lookups return owned copies; a cached proposal is never handed out by reference.
#[derive(Debug)]
pub struct ProposalCache {
    ttl: Duration,
    entries: DashMap<CacheKey, CacheEntry>,
}

impl Default for ProposalCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl ProposalCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh entry for `key`, if any. Expired entries are evicted.
    pub fn get(&self, key: &CacheKey) -> Option<Proposal> {
        let fresh = {
            let entry = self.entries.get(key)?;
            (entry.cached_at.elapsed() < self.ttl).then(|| entry.proposal.clone())
        };
        if fresh.is_none() {
            self.entries
                .remove_if(key, |_, entry| entry.cached_at.elapsed() >= self.ttl);
            debug!(symbol = %key.symbol, "Cache entry expired");
        }
        fresh
    }

    pub fn insert(&self, key: CacheKey, proposal: Proposal) {
        self.entries.insert(
            key,
            CacheEntry {
                proposal,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &CacheKey) {
        self.entries.remove(key);
    }

    /// Drop every entry for `symbol`. Returns how many were removed.
    pub fn invalidate_symbol(&self, symbol: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.symbol != symbol);
        before - self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
