//! Time-bounded set of recently evicted transaction hashes.
//!
//! An entry suppresses re-admission of its hash until the entry expires.
//! There is no size bound: expiry is the only eviction, and expired entries
//! are pruned lazily when they are next touched.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use shared_types::Hash;

use crate::ports::outbound::TimeSource;

/// TTL-indexed set of hashes, keyed by expiry instant.
pub struct SeenHistory {
    entries: DashMap<Hash, u64>,
    clock: Arc<dyn TimeSource>,
}

impl SeenHistory {
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Remember `hash` until `ttl` from now, overwriting any earlier expiry.
    pub fn add(&self, hash: Hash, ttl: Duration) {
        let expiry = self.clock.now_ms().saturating_add(ttl.as_millis() as u64);
        self.entries.insert(hash, expiry);
    }

    /// True iff an un-expired entry exists for `hash`.
    pub fn exists(&self, hash: &Hash) -> bool {
        let expired = match self.entries.get(hash) {
            Some(expiry) => {
                if *expiry > self.clock.now_ms() {
                    return true;
                }
                true
            }
            None => false,
        };
        // The read guard is gone by now; removing here cannot deadlock on
        // the entry's shard.
        if expired {
            self.entries.remove(hash);
        }
        false
    }

    pub fn remove(&self, hash: &Hash) {
        self.entries.remove(hash);
    }

    /// Number of un-expired entries. Walks the map; intended for sweeps
    /// and tests, not hot paths.
    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.entries.iter().filter(|entry| *entry.value() > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
