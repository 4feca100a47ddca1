//! Cache entry, counter cell, and shared index types.
//!
//! The unit of storage is one [`CacheEntry`] per parameter: the key, its
//! stable hash (computed once, reused by every sketch and doorkeeper
//! probe), a segment tag naming the list currently holding it, and the
//! [`CounterCell`] the shapers mutate.
//!
//! # Cell Aliasing Discipline
//!
//! Cells are the one piece of cache state that outlives the cache lock.
//! The cache owns each cell through an [`CounterRef`] and clones the
//! handle out to callers:
//!
//! ```text
//!   cache entry ──owns──▶ CounterCell(AtomicI64) ◀──handle── shaper loop
//!
//!   eviction drops the cache's reference;
//!   a retained handle still reads/writes safely,
//!   it just no longer represents the parameter.
//! ```
//!
//! A shaper that cached a handle and then loses a CAS must treat "the
//! entry may have been evicted" as one of the reasons and re-resolve
//! through the cache rather than retrying against the orphaned cell. This
//! is the safe encoding of the "stable address, logically dangling after
//! eviction" contract: no generation counters, no unsafe reads, just a
//! reference count keeping the memory alive until the last handle drops.

use crate::list::ListNode;
use core::fmt;
use core::sync::atomic::{AtomicI64, Ordering};
use triomphe::Arc;

#[cfg(feature = "hashbrown")]
pub(crate) use hashbrown::DefaultHashBuilder;
#[cfg(feature = "hashbrown")]
pub(crate) use hashbrown::HashMap;

#[cfg(not(feature = "hashbrown"))]
pub(crate) use std::collections::hash_map::RandomState as DefaultHashBuilder;
#[cfg(not(feature = "hashbrown"))]
pub(crate) use std::collections::HashMap;

/// A cache-owned `i64` mutated lock-free by shaper CAS loops.
///
/// Cells are handed out as [`CounterRef`] handles. The cell's address is
/// stable for the lifetime of its cache entry; after eviction a retained
/// handle still points at valid memory but no longer reflects the
/// parameter's state, and a failed CAS is the signal to re-resolve through
/// the cache. Atomic orderings are acquire/release throughout: enough to
/// observe monotone time advancement and non-negative token balances, with
/// no total order claimed across parameters.
#[derive(Debug, Default)]
pub struct CounterCell(AtomicI64);

impl CounterCell {
    pub(crate) fn new(v: i64) -> Self {
        CounterCell(AtomicI64::new(v))
    }

    /// Atomically reads the cell.
    #[inline]
    pub fn load(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    /// Atomically overwrites the cell.
    #[inline]
    pub fn store(&self, v: i64) {
        self.0.store(v, Ordering::Release);
    }

    /// Single CAS attempt; returns `true` when `current` was replaced by
    /// `new`. Callers loop, re-reading on failure.
    #[inline]
    pub fn compare_exchange(&self, current: i64, new: i64) -> bool {
        self.0
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Atomically adds `v`, returning the previous value.
    #[inline]
    pub fn fetch_add(&self, v: i64) -> i64 {
        self.0.fetch_add(v, Ordering::AcqRel)
    }

    /// Atomically subtracts `v`, returning the previous value.
    #[inline]
    pub fn fetch_sub(&self, v: i64) -> i64 {
        self.0.fetch_sub(v, Ordering::AcqRel)
    }
}

/// Shared handle to a [`CounterCell`].
///
/// Cloning is a reference-count bump; the arc has no weak references, so
/// the handle stays cheap on the hot path.
pub type CounterRef = Arc<CounterCell>;

/// Which list currently holds an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Segment {
    /// The small admission window in front of the main space.
    Window,
    /// SLRU probation list: recently admitted, first to be evicted.
    Probation,
    /// SLRU protected list: re-accessed entries.
    Protected,
}

/// One cached parameter: the key, its stable hash (computed once, reused by
/// every sketch and doorkeeper lookup), the owned counter cell, and the
/// segment tag kept in sync as the entry migrates between lists.
pub(crate) struct CacheEntry<K> {
    pub(crate) key: K,
    pub(crate) hash: u64,
    pub(crate) cell: CounterRef,
    pub(crate) segment: Segment,
}

impl<K> CacheEntry<K> {
    pub(crate) fn new(key: K, hash: u64, value: i64, segment: Segment) -> Self {
        CacheEntry {
            key,
            hash,
            cell: Arc::new(CounterCell::new(value)),
            segment,
        }
    }
}

impl<K: fmt::Debug> fmt::Debug for CacheEntry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("segment", &self.segment)
            .field("value", &self.cell.load())
            .finish()
    }
}

/// The index map shared by the window and both SLRU lists: every resident
/// key maps to its node, whichever list the node is linked in.
pub(crate) type Index<K> = HashMap<K, *mut ListNode<CacheEntry<K>>, DefaultHashBuilder>;
