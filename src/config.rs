//! Cache sizing configuration and documented defaults.
//!
//! Every rule owns one or two [`crate::ParamsCache`] instances; this
//! module decides how big they are. The capacity comes from the rule
//! itself when it carries a `params_max_capacity` hint, and otherwise
//! scales with the statistic window:
//!
//! ```text
//! QPS rule capacity:
//!   params_max_capacity             if > 0
//!   PARAMS_MAX_CAPACITY             if duration_in_sec == 0
//!   min(PARAMS_MAX_CAPACITY,
//!       PARAMS_CAPACITY_BASE × duration_in_sec)   otherwise
//!
//! Concurrency rule capacity:
//!   params_max_capacity             if > 0
//!   CONCURRENCY_MAX_COUNT           otherwise
//! ```
//!
//! The rationale: a longer window means slower token turnover per
//! parameter, so more distinct parameters are worth tracking before the
//! cache's frequency filter has to arbitrate.
//!
//! # Examples
//!
//! ```
//! use paramflow::{CacheConfig, ParamsCache};
//!
//! // The single-shard baseline: one lock, exact global admission.
//! let cache: ParamsCache<u64> = ParamsCache::new(CacheConfig::new(10_000));
//! assert_eq!(cache.capacity(), 10_000);
//!
//! // Spread a contended cache over 8 locks (rounded to a power of two).
//! let sharded: ParamsCache<u64> =
//!     ParamsCache::new(CacheConfig::new(10_000).with_shards(8));
//! assert_eq!(sharded.capacity(), 10_000);
//! ```

/// Cache capacity granted per second of statistic window when a rule does
/// not size its own parameter cache.
pub const PARAMS_CAPACITY_BASE: i64 = 4000;

/// Upper bound (and fallback) for a rule's parameter cache capacity.
pub const PARAMS_MAX_CAPACITY: i64 = 20000;

/// Default parameter cache capacity for concurrency rules.
pub const CONCURRENCY_MAX_COUNT: i64 = 4000;

/// Sizing for one [`crate::ParamsCache`].
///
/// The default is a single shard: one exclusive lock per cache, the
/// correctness baseline. Sharding splits capacity across independently
/// locked W-TinyLFU instances selected by `stable_hash & (shards - 1)`;
/// reach for it when the cache lock shows up in profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Total entry budget across all shards.
    pub capacity: usize,
    /// Shard count; rounded up to a power of two.
    pub shards: usize,
}

impl CacheConfig {
    pub fn new(capacity: usize) -> Self {
        CacheConfig {
            capacity,
            shards: 1,
        }
    }

    /// Splits the cache over `shards` locks.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Substitutes documented defaults for degenerate values.
    pub(crate) fn normalized(self) -> Self {
        let capacity = if self.capacity == 0 {
            log::warn!(
                "invalid params cache capacity 0, using default {}",
                PARAMS_MAX_CAPACITY
            );
            PARAMS_MAX_CAPACITY as usize
        } else {
            self.capacity
        };
        CacheConfig {
            capacity,
            shards: self.shards.max(1).next_power_of_two(),
        }
    }
}
