//! Main space of the admission cache: a segmented LRU.
//!
//! SLRU divides its capacity into a **probation** list for newly admitted
//! entries and a **protected** list for entries that proved themselves by
//! being accessed again. One-time entries drain out of probation without
//! ever touching the protected working set, which is what gives the
//! admission cache its scan resistance.
//!
//! # How It Works
//!
//! ## Segment Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          MainSlru                                   │
//! │                                                                     │
//! │  ┌───────────────────────────────────────────────────────────────┐  │
//! │  │                  PROTECTED (80% of cap)                       │  │
//! │  │          re-accessed entries, never the victim                │  │
//! │  │   MRU ◀──▶ [hot_1] ◀──▶ [hot_2] ◀──▶ ... ◀──▶ [tail]  LRU     │  │
//! │  └───────────────────────────────────────────────────────────────┘  │
//! │            ▲ promote / swap                    │ swap-demote        │
//! │            │                                   ▼                    │
//! │  ┌───────────────────────────────────────────────────────────────┐  │
//! │  │                  PROBATION (20% of cap)                       │  │
//! │  │           new admissions, evicted from the tail               │  │
//! │  │   MRU ◀──▶ [new_1] ◀──▶ [new_2] ◀──▶ ... ◀──▶ [victim] LRU    │  │
//! │  └───────────────────────────────────────────────────────────────┘  │
//! │            ▲ add()                             │ evict              │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Entry Lifecycle
//!
//! 1. **Admission**: entries enter at the probation front. While total
//!    occupancy is below capacity, probation may overflow its nominal
//!    budget; the split only binds once the space is full.
//! 2. **First re-access**: the entry is promoted, relinking its node into
//!    the protected front. The node pointer does not change, so the shared
//!    index needs no update.
//! 3. **Re-access with protected full**: the accessed probation entry and
//!    the protected *tail* trade payloads in place. Both nodes stay in
//!    their lists, both index slots are repointed, and each entry surfaces
//!    at the front of its new list. The demoted entry becomes the next
//!    victim.
//! 4. **Eviction**: always the probation tail, and only at full capacity
//!    ([`MainSlru::victim_hash`] answers `None` while filling). The tail
//!    node is reused in place so the evicted entry can be handed to the
//!    admission filter without reallocating.
//!
//! ## Why Swap Instead of Relink
//!
//! Moving the accessed entry into protected while demoting the tail would
//! relink two nodes across lists and leave the index pointing at stale
//! nodes mid-operation. Swapping just the payloads keeps every node in its
//! list and makes the index fix-up two plain inserts. The price is that
//! the accessed entry changes node, which is why `access` returns the node
//! now holding it.
//!
//! ## Operations
//!
//! | Operation | Action | Time |
//! |-----------|--------|------|
//! | `add(entry)` | insert at probation front, reuse tail when full | O(1) |
//! | `access(node)` | front-move / promote / swap with protected tail | O(1) |
//! | `victim_hash()` | probation tail's hash, `None` while filling | O(1) |
//! | `remove(node)` | unlink from whichever list holds it | O(1) |
//!
//! ## Scan Resistance Example
//!
//! ```ignore
//! // capacity 5: protected 4, probation 1
//! // hot entries A, B promoted into protected; scan X, Y, Z flows through
//! slru.add(A); slru.access(a_node);      // A protected
//! slru.add(B); slru.access(b_node);      // B protected
//! slru.add(X); slru.add(Y); slru.add(Z); // each displaces only the
//!                                        // previous probation tail
//! // A and B are untouched by the scan
//! ```

use crate::entry::{CacheEntry, Index, Segment};
use crate::list::{swap_values, List, ListNode};
use core::hash::Hash;
use core::num::NonZeroUsize;

/// Fraction of the main space reserved for re-accessed entries.
const PROTECTED_RATIO_PCT: usize = 80;

pub(crate) struct MainSlru<K> {
    probation_cap: usize,
    protected_cap: usize,
    probation: List<CacheEntry<K>>,
    protected: List<CacheEntry<K>>,
}

impl<K: Hash + Eq + Clone> MainSlru<K> {
    /// A zero `cap` is a valid degenerate main space (a capacity-1 cache is
    /// all window); `add` must not be called on it.
    pub(crate) fn new(cap: usize) -> Self {
        let protected_cap = cap * PROTECTED_RATIO_PCT / 100;
        let probation_cap = cap - protected_cap;
        let list_cap = NonZeroUsize::new(cap.max(1)).expect("clamped to at least 1");
        // Both lists are allocated at full capacity; the segment budgets are
        // enforced here, not by the lists, because promotions may transiently
        // rebalance the split.
        MainSlru {
            probation_cap,
            protected_cap,
            probation: List::new(list_cap),
            protected: List::new(list_cap),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.probation.len() + self.protected.len()
    }

    #[inline]
    pub(crate) fn total_cap(&self) -> usize {
        self.probation_cap + self.protected_cap
    }

    /// Admits an entry into probation. At full capacity the probation tail
    /// is reused in place and returned as the evicted entry.
    pub(crate) fn add(
        &mut self,
        mut entry: CacheEntry<K>,
        index: &mut Index<K>,
    ) -> Option<CacheEntry<K>> {
        debug_assert!(self.total_cap() > 0, "add on a zero-capacity main space");
        entry.segment = Segment::Probation;
        let key = entry.key.clone();

        if self.probation.len() < self.probation_cap || self.len() < self.total_cap() {
            let node = self
                .probation
                .push_front(entry)
                .expect("main space below total capacity");
            index.insert(key, node);
            return None;
        }

        let node = self.probation.back();
        // SAFETY: at full capacity the probation list is non-empty (the
        // protected budget is strictly below the total), so back() is valid
        let evicted = unsafe {
            let old = self.probation.replace(node, entry);
            self.probation.move_to_front(node);
            old
        };
        index.remove(&evicted.key);
        index.insert(key, node);
        Some(evicted)
    }

    /// Touches an entry on re-access, returning the node that holds the
    /// accessed entry afterwards.
    ///
    /// Protected entries just move to the front. Probation entries are
    /// promoted while the protected list has room; otherwise they swap
    /// payloads with the protected tail, so the pair trades segments and
    /// the accessed entry moves into the tail's node.
    ///
    /// # Safety
    ///
    /// `node` must come from the shared index and be linked in this SLRU.
    pub(crate) unsafe fn access(
        &mut self,
        node: *mut ListNode<CacheEntry<K>>,
        index: &mut Index<K>,
    ) -> *mut ListNode<CacheEntry<K>> {
        // SAFETY: per caller contract the node is linked here
        let segment = unsafe { (*node).value().segment };
        match segment {
            Segment::Protected => {
                // SAFETY: node is linked in the protected list
                unsafe { self.protected.move_to_front(node) };
                node
            }
            Segment::Probation if self.protected.len() < self.protected_cap => {
                // SAFETY: node is linked in probation and unlinked before adopt
                unsafe {
                    self.probation.take(node);
                    (*node).value_mut().segment = Segment::Protected;
                    self.protected.adopt(node);
                }
                node
            }
            Segment::Probation if self.protected_cap == 0 => {
                // Degenerate split: no protected budget to promote into.
                // SAFETY: node is linked in the probation list
                unsafe { self.probation.move_to_front(node) };
                node
            }
            Segment::Probation => {
                let tail = self.protected.back();
                // SAFETY: protected is full and thus non-empty; node and tail
                // are distinct (they sit in different lists)
                unsafe {
                    swap_values(node, tail);
                    (*node).value_mut().segment = Segment::Probation;
                    (*tail).value_mut().segment = Segment::Protected;
                    index.insert((*node).value().key.clone(), node);
                    index.insert((*tail).value().key.clone(), tail);
                    self.probation.move_to_front(node);
                    self.protected.move_to_front(tail);
                }
                tail
            }
            Segment::Window => unreachable!("window entries are not linked in the SLRU"),
        }
    }

    /// The stable hash of the entry that would be evicted next, or `None`
    /// while the main space is still filling.
    pub(crate) fn victim_hash(&self) -> Option<u64> {
        if self.len() < self.total_cap() {
            return None;
        }
        let node = self.probation.back();
        // SAFETY: at full capacity the probation list is non-empty
        Some(unsafe { (*node).value().hash })
    }

    /// Unlinks and returns an entry from whichever list holds it.
    ///
    /// # Safety
    ///
    /// `node` must come from the shared index and be linked in this SLRU.
    pub(crate) unsafe fn remove(&mut self, node: *mut ListNode<CacheEntry<K>>) -> CacheEntry<K> {
        // SAFETY: per caller contract
        unsafe {
            match (*node).value().segment {
                Segment::Probation => self.probation.remove(node).into_value(),
                Segment::Protected => self.protected.remove(node).into_value(),
                Segment::Window => unreachable!("window entries are not linked in the SLRU"),
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.probation.clear();
        self.protected.clear();
    }
}

impl<K> core::fmt::Debug for MainSlru<K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MainSlru")
            .field("probation", &self.probation.len())
            .field("probation_cap", &self.probation_cap)
            .field("protected", &self.protected.len())
            .field("protected_cap", &self.protected_cap)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::HashMap;

    fn entry(key: u64) -> CacheEntry<u64> {
        CacheEntry::new(key, key, 0, Segment::Probation)
    }

    fn slru(cap: usize) -> (MainSlru<u64>, Index<u64>) {
        (MainSlru::new(cap), HashMap::default())
    }

    unsafe fn touch(slru: &mut MainSlru<u64>, index: &mut Index<u64>, key: u64) {
        let node = *index.get(&key).unwrap();
        // SAFETY: node comes straight from the index
        let now_at = unsafe { slru.access(node, index) };
        // The returned node always holds the touched entry.
        // SAFETY: access returns a linked non-sigil node
        unsafe { assert_eq!((*now_at).value().key, key) };
    }

    #[test]
    fn split_is_eighty_twenty() {
        let (slru, _) = slru(10);
        assert_eq!(slru.protected_cap, 8);
        assert_eq!(slru.probation_cap, 2);
    }

    #[test]
    fn no_victim_while_filling() {
        let (mut slru, mut index) = slru(5);
        for k in 0..4 {
            assert!(slru.add(entry(k), &mut index).is_none());
        }
        assert!(slru.victim_hash().is_none());

        slru.add(entry(4), &mut index);
        assert_eq!(slru.victim_hash(), Some(0));
    }

    #[test]
    fn full_add_reuses_probation_tail() {
        let (mut slru, mut index) = slru(5);
        for k in 0..5 {
            slru.add(entry(k), &mut index);
        }

        let evicted = slru.add(entry(9), &mut index).unwrap();
        assert_eq!(evicted.key, 0);
        assert_eq!(slru.len(), 5);
        assert!(!index.contains_key(&0));
        assert!(index.contains_key(&9));
    }

    #[test]
    fn access_promotes_into_protected() {
        let (mut slru, mut index) = slru(10);
        slru.add(entry(1), &mut index);
        slru.add(entry(2), &mut index);

        // SAFETY: key 1 is resident
        unsafe { touch(&mut slru, &mut index, 1) };

        assert_eq!(slru.protected.len(), 1);
        assert_eq!(slru.probation.len(), 1);
        // SAFETY: the index still points at the promoted node
        let segment = unsafe { (**index.get(&1).unwrap()).value().segment };
        assert_eq!(segment, Segment::Protected);
    }

    #[test]
    fn access_with_full_protected_swaps_with_tail() {
        let (mut slru, mut index) = slru(5);
        // protected_cap = 4, probation_cap = 1
        for k in 0..5 {
            slru.add(entry(k), &mut index);
        }
        // Promote 0..4 to fill protected; 4 stays in probation.
        for k in 0..4 {
            // SAFETY: keys are resident
            unsafe { touch(&mut slru, &mut index, k) };
        }
        assert_eq!(slru.protected.len(), 4);

        // Accessing the probation entry swaps it with the protected tail (0).
        // SAFETY: key 4 is resident
        unsafe { touch(&mut slru, &mut index, 4) };

        // SAFETY: index pointers are maintained across the swap
        unsafe {
            assert_eq!((**index.get(&4).unwrap()).value().segment, Segment::Protected);
            assert_eq!((**index.get(&0).unwrap()).value().segment, Segment::Probation);
        }
        assert_eq!(slru.len(), 5);
        // The demoted entry is now the next victim.
        assert_eq!(slru.victim_hash(), Some(0));
    }

    #[test]
    fn remove_from_either_segment() {
        let (mut slru, mut index) = slru(10);
        slru.add(entry(1), &mut index);
        slru.add(entry(2), &mut index);
        // SAFETY: key 1 is resident
        unsafe { touch(&mut slru, &mut index, 1) };

        let protected_node = index.remove(&1).unwrap();
        let probation_node = index.remove(&2).unwrap();
        // SAFETY: nodes were just taken out of the index
        unsafe {
            assert_eq!(slru.remove(protected_node).key, 1);
            assert_eq!(slru.remove(probation_node).key, 2);
        }
        assert_eq!(slru.len(), 0);
    }

    #[test]
    fn tiny_capacity_has_no_protected_budget() {
        let (mut slru, mut index) = slru(1);
        assert_eq!(slru.protected_cap, 0);
        slru.add(entry(1), &mut index);
        // Access must not promote anywhere; it just refreshes recency.
        // SAFETY: key 1 is resident
        unsafe { touch(&mut slru, &mut index, 1) };
        assert_eq!(slru.probation.len(), 1);
        assert_eq!(slru.victim_hash(), Some(1));
    }
}
