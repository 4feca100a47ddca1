//! Lightweight counters for the admission caches.
//!
//! Counters are plain integers bumped under the shard lock; a snapshot is
//! a copy, and shard snapshots merge by addition. There is no export
//! pipeline here: embedders poll [`crate::ParamsCache::stats`] from
//! whatever telemetry loop they already run.
//!
//! The counters answer the questions that matter when sizing a rule's
//! parameter cache: is the hit rate high enough that counters survive
//! between checks (`hits` vs `misses`), is the cache churning
//! (`evictions`), and is the admission filter doing its job
//! (`rejected_candidates` high means one-shot traffic is being kept out
//! of the main space, which is healthy).
//!
//! # Examples
//!
//! ```
//! use paramflow::ParamsCache;
//!
//! let cache: ParamsCache<u64> = ParamsCache::with_capacity(100);
//! cache.add_if_absent(1, 0);
//! cache.get(&1);
//! cache.get(&2);
//!
//! let stats = cache.stats();
//! assert_eq!(stats.hits, 1);
//! assert_eq!(stats.misses, 2);
//! assert_eq!(stats.hit_rate(), 1.0 / 3.0);
//! ```

/// Counters for one admission cache, aggregated across its shards.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found a resident entry.
    pub hits: u64,
    /// Lookups that missed.
    pub misses: u64,
    /// Entries created (first inserts and overwrites of absent keys).
    pub insertions: u64,
    /// Entries dropped under insertion pressure, admitted or not.
    pub evictions: u64,
    /// Window candidates the admission filter turned away.
    pub rejected_candidates: u64,
    /// Aging cycles (sketch halved, doorkeeper cleared).
    pub resets: u64,
}

impl CacheStats {
    pub(crate) fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub(crate) fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub(crate) fn record_insertion(&mut self) {
        self.insertions += 1;
    }

    pub(crate) fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub(crate) fn record_rejected_candidate(&mut self) {
        self.rejected_candidates += 1;
    }

    pub(crate) fn record_reset(&mut self) {
        self.resets += 1;
    }

    /// Adds another shard's counters into this snapshot.
    pub fn merge(&mut self, other: &CacheStats) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.insertions += other.insertions;
        self.evictions += other.evictions;
        self.rejected_candidates += other.rejected_candidates;
        self.resets += other.resets;
    }

    /// Hit fraction in `[0, 1]`, or 0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let requests = self.hits + self.misses;
        if requests == 0 {
            return 0.0;
        }
        self.hits as f64 / requests as f64
    }
}
