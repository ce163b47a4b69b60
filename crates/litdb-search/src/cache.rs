//! Fused-result cache and the index change hook that invalidates it.
//!
//! The cache is an explicit component handed to the ranker; nothing is
//! cached globally. Every key carries the corpus epoch current when the
//! search started. Each index change bumps the epoch and drops all entries,
//! so a result computed against an older corpus can never be served after a
//! change, even if it is inserted late.

use moka::sync::Cache;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::fusion::{FusionWeights, RankedResult, SearchRequest};

/// A change applied to the vector index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexChange {
    Upserted { id: String, generation: u64 },
    Removed { id: String },
}

/// Observer of index changes, registered with the index maintainer.
pub trait IndexListener: Send + Sync {
    fn on_index_change(&self, change: &IndexChange);
}

/// Cache key: the normalized request plus the corpus epoch.
///
/// Floats are keyed by their bit patterns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchKey {
    text: Option<String>,
    vector: Option<Vec<u32>>,
    k: usize,
    weights: (u32, u32),
    epoch: u64,
}

impl SearchKey {
    #[must_use]
    pub fn new(request: &SearchRequest, k: usize, weights: FusionWeights, epoch: u64) -> Self {
        Self {
            text: request.query_text().map(str::to_owned),
            vector: request
                .vector
                .as_ref()
                .map(|v| v.iter().map(|x| x.to_bits()).collect()),
            k,
            weights: (weights.lexical.to_bits(), weights.vector.to_bits()),
            epoch,
        }
    }
}

/// Bounded cache of complete fused rankings.
pub struct SearchCache {
    entries: Cache<SearchKey, Arc<RankedResult>>,
    epoch: AtomicU64,
}

impl SearchCache {
    #[must_use]
    pub fn new(max_entries: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(max_entries).build(),
            epoch: AtomicU64::new(0),
        }
    }

    /// Current corpus epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn get(&self, key: &SearchKey) -> Option<Arc<RankedResult>> {
        let hit = self.entries.get(key);
        if hit.is_some() {
            debug!("search cache hit at epoch {}", key.epoch);
        }
        hit
    }

    /// Store a result. Degraded results are never cached.
    pub fn insert(&self, key: SearchKey, result: &RankedResult) {
        if result.degraded.is_some() {
            return;
        }
        self.entries.insert(key, Arc::new(result.clone()));
    }

    /// Drop every entry and move to a new epoch.
    pub fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.entries.invalidate_all();
    }
}

impl IndexListener for SearchCache {
    fn on_index_change(&self, change: &IndexChange) {
        debug!("invalidating search cache after {:?}", change);
        self.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::Signal;

    fn result(degraded: Option<Signal>) -> RankedResult {
        RankedResult {
            hits: Vec::new(),
            degraded,
        }
    }

    #[test]
    fn insert_and_get_at_same_epoch() {
        let cache = SearchCache::new(16);
        let request = SearchRequest::text("catalysis", 5);
        let key = SearchKey::new(&request, 5, FusionWeights::default(), cache.epoch());
        cache.insert(key.clone(), &result(None));
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn degraded_results_are_not_cached() {
        let cache = SearchCache::new(16);
        let request = SearchRequest::text("catalysis", 5);
        let key = SearchKey::new(&request, 5, FusionWeights::default(), cache.epoch());
        cache.insert(key.clone(), &result(Some(Signal::Lexical)));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn index_change_bumps_epoch_and_drops_entries() {
        let cache = SearchCache::new(16);
        let request = SearchRequest::text("catalysis", 5);
        let key = SearchKey::new(&request, 5, FusionWeights::default(), cache.epoch());
        cache.insert(key.clone(), &result(None));

        cache.on_index_change(&IndexChange::Removed { id: "a".into() });
        assert_eq!(cache.epoch(), 1);
        assert!(cache.get(&key).is_none());

        let fresh = SearchKey::new(&request, 5, FusionWeights::default(), cache.epoch());
        assert_ne!(key, fresh);
    }

    #[test]
    fn keys_distinguish_weights_and_k() {
        let request = SearchRequest::text("catalysis", 5);
        let a = SearchKey::new(&request, 5, FusionWeights::new(0.5, 0.5), 0);
        let b = SearchKey::new(&request, 5, FusionWeights::new(0.7, 0.3), 0);
        let c = SearchKey::new(&request, 6, FusionWeights::new(0.5, 0.5), 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
