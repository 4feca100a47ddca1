//! The W-TinyLFU cache map holding per-parameter counter cells.
//!
//! Hotspot parameter streams are dominated by one-shot values: most keys
//! are seen once and never again, while a small hot set carries most of
//! the traffic. A plain LRU of fixed capacity lets the one-shot flood wash
//! the hot set out. W-TinyLFU keeps the hot set resident by *admitting on
//! frequency*: a new key only displaces a cached one when a compact
//! frequency sketch says it is the more popular of the two.
//!
//! # How It Works
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        TinyLfuShard                                 │
//! │                                                                     │
//! │  insert ──▶ ┌────────────┐ candidate  ┌───────────────────────────┐ │
//! │             │ WINDOW LRU │ ─────────▶ │        MAIN SLRU          │ │
//! │             │ (1%, ≥ 1)  │  (evicted  │  ┌─────────────────────┐  │ │
//! │             └────────────┘   tail)    │  │ protected (80%)     │  │ │
//! │                                       │  ├─────────────────────┤  │ │
//! │                   │                   │  │ probation (20%)     │  │ │
//! │                   │                   │  └──────────┬──────────┘  │ │
//! │                   │                   └─────────────┼─────────────┘ │
//! │                   ▼                                 ▼ victim        │
//! │        ┌─────────────────────┐          (probation tail)            │
//! │        │ count-min sketch    │                                      │
//! │        │ + doorkeeper bloom  │ ◀── freq(candidate) vs freq(victim)  │
//! │        └─────────────────────┘                                      │
//! │                                                                     │
//! │  one index map covers all three lists: key → node pointer           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Admission on Insert
//!
//! 1. New entries land in the window LRU. While the window has room,
//!    nothing else happens.
//! 2. A full window evicts its tail, the *candidate*. While the main
//!    space is still filling, the candidate is admitted unconditionally.
//! 3. Once the main space is full, its probation tail is the *victim*.
//!    The candidate replaces the victim only when the sketch estimates it
//!    strictly more frequent; otherwise the candidate is dropped and the
//!    victim stays. One-shot keys therefore churn only the window and the
//!    probation tail, never the protected set.
//!
//! ## Frequency Bookkeeping and Aging
//!
//! Every lookup and insert notes the key: the first sighting since the
//! last reset only sets doorkeeper bits, repeat sightings increment the
//! sketch. Estimates read the sketch minimum plus one if the doorkeeper
//! has seen the key. After `10 × capacity` events the sketch is halved and
//! the doorkeeper cleared, so popularity decays and yesterday's hot keys
//! can be displaced.
//!
//! ## Values Are Atomic Cells
//!
//! The map stores [`CounterRef`] handles to cache-owned `AtomicI64` cells.
//! `get`/`add_if_absent` return a handle clone; shapers then CAS the cell
//! without re-entering the cache. Eviction drops the cache's reference,
//! never the cell itself, so a retained handle stays safe to read; it
//! merely stops reflecting the parameter (the next `add_if_absent`
//! re-resolves).
//!
//! # Sharding
//!
//! [`ParamsCache`] wraps one or more shards behind `parking_lot` mutexes.
//! The lock scope is a single map operation and is never held while a
//! caller waits. The default is one shard; see
//! [`CacheConfig::with_shards`] to split hot rule sets over more locks at
//! the cost of per-shard (rather than global) admission.
//!
//! # Performance Characteristics
//!
//! | Operation | Cost |
//! |-----------|------|
//! | `get` / `add_if_absent` / `set` / `remove` | O(1) + one shard lock |
//! | admission decision | 8 sketch reads + 2 bloom probes |
//! | aging reset | O(capacity), amortized over `10 × capacity` events |
//! | memory | O(capacity) entries + 4 bits × width sketch + width bloom |
//!
//! # Examples
//!
//! ```
//! use paramflow::ParamsCache;
//!
//! let cache: ParamsCache<u64> = ParamsCache::with_capacity(100);
//!
//! // First insert returns None and stores the initial value.
//! assert!(cache.add_if_absent(7, 42).is_none());
//!
//! // A later insert loses: the handle to the existing cell comes back.
//! let cell = cache.add_if_absent(7, 99).unwrap();
//! assert_eq!(cell.load(), 42);
//!
//! // The handle mutates lock-free and stays live across lookups.
//! cell.fetch_sub(2);
//! assert_eq!(cache.get(&7).unwrap().load(), 40);
//! ```

use crate::config::CacheConfig;
use crate::doorkeeper::Doorkeeper;
use crate::entry::{CacheEntry, CounterRef, HashMap, Index, Segment};
use crate::hash::StableHash;
use crate::lru::WindowLru;
use crate::metrics::CacheStats;
use crate::sketch::CountMinSketch;
use crate::slru::MainSlru;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::hash::Hash;
use core::num::NonZeroUsize;
use parking_lot::Mutex;

/// Admission window share of total capacity, in percent.
const WINDOW_PCT: usize = 1;

/// Sketch aging threshold, in events per unit of capacity.
const SAMPLE_FACTOR: usize = 10;

/// One unsharded W-TinyLFU instance. All methods take `&mut self`; the
/// sharded wrapper provides the locking.
pub(crate) struct TinyLfuShard<K> {
    cap: usize,
    window: WindowLru<K>,
    main: MainSlru<K>,
    index: Index<K>,
    sketch: CountMinSketch,
    doorkeeper: Doorkeeper,
    sample_size: usize,
    events: usize,
    stats: CacheStats,
}

// SAFETY: the shard owns every list node its index points to, and all
// mutation goes through &mut self (serialized by the wrapper's Mutex).
unsafe impl<K: Send> Send for TinyLfuShard<K> {}

impl<K: Hash + Eq + Clone + StableHash> TinyLfuShard<K> {
    pub(crate) fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        let window_cap = (cap * WINDOW_PCT / 100).max(1).min(cap);
        let main_cap = cap - window_cap;
        TinyLfuShard {
            cap,
            window: WindowLru::new(NonZeroUsize::new(window_cap).expect("window is at least 1")),
            main: MainSlru::new(main_cap),
            index: HashMap::default(),
            sketch: CountMinSketch::new(cap),
            doorkeeper: Doorkeeper::new(cap),
            sample_size: SAMPLE_FACTOR * cap,
            events: 0,
            stats: CacheStats::default(),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub(crate) fn cap(&self) -> usize {
        self.cap
    }

    pub(crate) fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Records one frequency event for `hash` and ages the sketch when the
    /// sample window fills. First sightings stop at the doorkeeper.
    fn note(&mut self, hash: u64) {
        if self.doorkeeper.allow(hash) {
            self.sketch.increment(hash);
        }
        self.events += 1;
        if self.events >= self.sample_size {
            self.sketch.reset();
            self.doorkeeper.clear();
            self.events = 0;
            self.stats.record_reset();
        }
    }

    /// TinyLFU estimate: the sketch minimum, plus one if the doorkeeper has
    /// seen the key since the last reset.
    fn estimate(&self, hash: u64) -> u64 {
        let mut freq = self.sketch.estimate(hash);
        if self.doorkeeper.contains(hash) {
            freq += 1;
        }
        freq
    }

    /// Looks up a resident entry: marks frequency, refreshes recency, and
    /// returns a handle to its counter cell.
    pub(crate) fn get(&mut self, key: &K) -> Option<CounterRef> {
        let Some(&node) = self.index.get(key) else {
            self.stats.record_miss();
            return None;
        };
        // SAFETY: index nodes are linked in the list their segment tag names.
        // An SLRU access can move the entry into a different node (the
        // protected-tail swap), so the returned pointer is the one read.
        let (hash, cell) = unsafe {
            let node = match (*node).value().segment {
                Segment::Window => {
                    self.window.access(node);
                    node
                }
                Segment::Probation | Segment::Protected => {
                    self.main.access(node, &mut self.index)
                }
            };
            let entry = (*node).value();
            (entry.hash, entry.cell.clone())
        };
        self.note(hash);
        self.stats.record_hit();
        Some(cell)
    }

    /// Inserts `value` under `key` if absent, returning `None` on the first
    /// insert. A resident key is treated exactly like [`TinyLfuShard::get`]:
    /// the stored value is untouched and the existing handle comes back.
    pub(crate) fn add_if_absent(&mut self, key: K, value: i64) -> Option<CounterRef> {
        if self.index.contains_key(&key) {
            return self.get(&key);
        }
        self.stats.record_miss();
        self.insert(key, value);
        None
    }

    /// Unconditional write: overwrites through the existing cell (retained
    /// handles observe the new value) or inserts a fresh entry.
    pub(crate) fn set(&mut self, key: K, value: i64) {
        if let Some(&node) = self.index.get(&key) {
            // SAFETY: index nodes are linked in the list their segment tag
            // names; the SLRU access returns the node holding the entry.
            let hash = unsafe {
                let node = match (*node).value().segment {
                    Segment::Window => {
                        self.window.access(node);
                        node
                    }
                    Segment::Probation | Segment::Protected => {
                        self.main.access(node, &mut self.index)
                    }
                };
                let entry = (*node).value();
                entry.cell.store(value);
                entry.hash
            };
            self.note(hash);
            return;
        }
        self.insert(key, value);
    }

    fn insert(&mut self, key: K, value: i64) {
        let hash = key.stable_hash();
        self.note(hash);
        self.stats.record_insertion();
        let entry = CacheEntry::new(key, hash, value, Segment::Window);
        if let Some(candidate) = self.window.add(entry, &mut self.index) {
            self.admit(candidate);
        }
    }

    /// W-TinyLFU admission: a window candidate enters the main space while
    /// it is filling, and otherwise only by beating the victim's estimated
    /// frequency.
    fn admit(&mut self, candidate: CacheEntry<K>) {
        if self.main.total_cap() == 0 {
            self.stats.record_rejected_candidate();
            self.stats.record_eviction();
            return;
        }
        match self.main.victim_hash() {
            None => {
                let none = self.main.add(candidate, &mut self.index);
                debug_assert!(none.is_none(), "filling main space cannot evict");
            }
            Some(victim_hash) => {
                if self.estimate(candidate.hash) > self.estimate(victim_hash) {
                    if self.main.add(candidate, &mut self.index).is_some() {
                        self.stats.record_eviction();
                    }
                } else {
                    self.stats.record_rejected_candidate();
                    self.stats.record_eviction();
                }
            }
        }
    }

    /// Drops a resident entry, returning its cell so callers can observe
    /// the final value.
    pub(crate) fn remove(&mut self, key: &K) -> Option<CounterRef> {
        let node = self.index.remove(key)?;
        // SAFETY: the node was owned by the index until this call
        let entry = unsafe {
            match (*node).value().segment {
                Segment::Window => self.window.remove(node),
                Segment::Probation | Segment::Protected => self.main.remove(node),
            }
        };
        Some(entry.cell)
    }

    pub(crate) fn clear(&mut self) {
        self.window.clear();
        self.main.clear();
        self.index.clear();
        self.sketch.clear();
        self.doorkeeper.clear();
        self.events = 0;
    }
}

impl<K> core::fmt::Debug for TinyLfuShard<K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TinyLfuShard")
            .field("len", &self.index.len())
            .field("events", &self.events)
            .finish()
    }
}

/// Bounded map from parameter values to counter cells, the storage behind
/// every shaper.
///
/// Mutations lock exactly one shard for the duration of the map operation;
/// the lock is never held while a caller waits. Shard selection is
/// `stable_hash & (shards - 1)`, with capacity split evenly. The default
/// configuration runs a single shard (the plain exclusive-lock baseline);
/// [`CacheConfig::with_shards`] spreads hot rule sets over more locks.
pub struct ParamsCache<K> {
    shards: Box<[Mutex<TinyLfuShard<K>>]>,
    mask: u64,
}

impl<K: Hash + Eq + Clone + StableHash> ParamsCache<K> {
    /// Builds a cache from `config`, normalizing degenerate sizes (zero
    /// capacity falls back to the documented default with a warning, shard
    /// counts round up to a power of two).
    pub fn new(config: CacheConfig) -> Self {
        let config = config.normalized();
        let shard_count = config.shards;
        let per_shard = (config.capacity / shard_count).max(1);
        let shards: Vec<_> = (0..shard_count)
            .map(|_| Mutex::new(TinyLfuShard::new(per_shard)))
            .collect();
        ParamsCache {
            shards: shards.into_boxed_slice(),
            mask: (shard_count - 1) as u64,
        }
    }

    /// Convenience constructor for a single-shard cache of `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        ParamsCache::new(CacheConfig::new(capacity))
    }

    #[inline]
    fn shard(&self, hash: u64) -> &Mutex<TinyLfuShard<K>> {
        &self.shards[(hash & self.mask) as usize]
    }

    /// Returns a handle to the key's counter cell if it is resident,
    /// marking frequency and recency.
    pub fn get(&self, key: &K) -> Option<CounterRef> {
        self.shard(key.stable_hash()).lock().get(key)
    }

    /// Inserts `value` if `key` is absent. Returns `None` on first insert,
    /// the signal that this caller initialized the cell, and the existing
    /// handle otherwise (the stored value is not updated).
    pub fn add_if_absent(&self, key: K, value: i64) -> Option<CounterRef> {
        self.shard(key.stable_hash()).lock().add_if_absent(key, value)
    }

    /// Unconditionally writes `value` under `key`.
    pub fn set(&self, key: K, value: i64) {
        self.shard(key.stable_hash()).lock().set(key, value);
    }

    /// Drops the key, returning its cell if it was resident.
    pub fn remove(&self, key: &K) -> Option<CounterRef> {
        self.shard(key.stable_hash()).lock().remove(key)
    }

    /// Total resident entries across shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.lock().len() == 0)
    }

    /// Total capacity across shards.
    pub fn capacity(&self) -> usize {
        self.shards.iter().map(|s| s.lock().cap()).sum()
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.lock().clear();
        }
    }

    /// Merged counters across shards.
    pub fn stats(&self) -> CacheStats {
        let mut total = CacheStats::default();
        for shard in self.shards.iter() {
            total.merge(&shard.lock().stats());
        }
        total
    }
}

impl<K> core::fmt::Debug for ParamsCache<K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ParamsCache")
            .field("shards", &self.shards.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ParamValue;

    #[test]
    fn add_if_absent_signals_first_insert() {
        let cache: ParamsCache<u64> = ParamsCache::with_capacity(16);
        assert!(cache.add_if_absent(1, 42).is_none());
        let existing = cache.add_if_absent(1, 99).expect("second insert sees the first");
        // The stored value is not updated by the losing insert.
        assert_eq!(existing.load(), 42);
    }

    #[test]
    fn get_round_trips_initial_value() {
        let cache: ParamsCache<u64> = ParamsCache::with_capacity(16);
        cache.add_if_absent(7, 123);
        assert_eq!(cache.get(&7).unwrap().load(), 123);
        assert!(cache.get(&8).is_none());
    }

    #[test]
    fn set_overwrites_through_existing_handle() {
        let cache: ParamsCache<u64> = ParamsCache::with_capacity(16);
        cache.add_if_absent(5, 1);
        let handle = cache.get(&5).unwrap();
        cache.set(5, 77);
        // The retained handle observes the overwrite: same cell.
        assert_eq!(handle.load(), 77);
        cache.set(6, 3);
        assert_eq!(cache.get(&6).unwrap().load(), 3);
    }

    #[test]
    fn remove_returns_the_cell() {
        let cache: ParamsCache<u64> = ParamsCache::with_capacity(16);
        cache.add_if_absent(9, 4);
        assert_eq!(cache.remove(&9).unwrap().load(), 4);
        assert!(cache.remove(&9).is_none());
        assert!(cache.get(&9).is_none());
    }

    #[test]
    fn len_never_exceeds_capacity() {
        let cache: ParamsCache<u64> = ParamsCache::with_capacity(64);
        for k in 0..10_000u64 {
            cache.add_if_absent(k, 0);
            assert!(cache.len() <= 64, "len {} at key {}", cache.len(), k);
        }
    }

    #[test]
    fn capacity_one_still_works() {
        let cache: ParamsCache<u64> = ParamsCache::with_capacity(1);
        for k in 0..100u64 {
            cache.add_if_absent(k, 0);
        }
        assert!(cache.len() <= 1);
    }

    #[test]
    fn hot_keys_survive_a_cold_scan() {
        let cache: ParamsCache<u64> = ParamsCache::with_capacity(100);
        // Establish a hot set with repeated accesses.
        for _ in 0..16 {
            for k in 0..10u64 {
                cache.add_if_absent(k, 0);
            }
        }
        // Pour a long one-shot stream through the cache.
        for k in 1_000..11_000u64 {
            cache.add_if_absent(k, 0);
        }
        let resident = (0..10u64).filter(|k| cache.get(k).is_some()).count();
        assert!(resident >= 9, "only {resident}/10 hot keys survived");
    }

    #[test]
    fn recent_keys_resident_after_cold_stream() {
        let cache: ParamsCache<u64> = ParamsCache::with_capacity(100);
        for k in 0..10_000u64 {
            cache.add_if_absent(k, 0);
        }
        let recent = (10_000 - 80..10_000u64)
            .filter(|k| cache.get(k).is_some())
            .count();
        assert!(recent * 100 >= 80 * 95, "only {recent}/80 recent keys resident");
    }

    #[test]
    fn sharded_cache_spreads_but_bounds_entries() {
        let cache: ParamsCache<u64> =
            ParamsCache::new(CacheConfig::new(128).with_shards(8));
        for k in 0..4_096u64 {
            cache.add_if_absent(k, 0);
        }
        assert!(cache.len() <= 128);
        assert_eq!(cache.capacity(), 128);
    }

    #[test]
    fn param_value_keys_work_end_to_end() {
        let cache: ParamsCache<ParamValue> = ParamsCache::with_capacity(16);
        let key = ParamValue::from("user-1");
        assert!(cache.add_if_absent(key.clone(), 5).is_none());
        assert_eq!(cache.get(&key).unwrap().load(), 5);
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache: ParamsCache<u64> = ParamsCache::with_capacity(16);
        cache.add_if_absent(1, 0);
        cache.get(&1);
        cache.get(&2);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.insertions, 1);
    }
}
