//! Admission window: a plain LRU in front of the main SLRU space.
//!
//! The window is the 1 % ante-room of the W-TinyLFU cache. Every new
//! entry starts here, which serves two purposes: bursts of brand-new keys
//! are absorbed without consulting the admission filter, and a key gets a
//! short grace period to build up sketch frequency before it must compete
//! for a place in the main space.
//!
//! # How It Works
//!
//! ```text
//!              insert(new)
//!                  │
//!                  ▼
//!   MRU ◀──▶ [e_1] ◀──▶ [e_2] ◀──▶ ... ◀──▶ [tail] LRU
//!                  window (fixed cap)          │
//!                                              │ overflow: reuse node
//!                                              ▼ in place
//!                                      candidate (old tail entry)
//!                                              │
//!                                              ▼
//!                                   admission filter vs SLRU victim
//! ```
//!
//! When the window overflows, the evicted entry is not dropped: it becomes
//! the *candidate* the admission policy weighs against the main space's
//! victim. Overflow reuses the tail node in place (old payload moved out,
//! new one moved in, node relinked to the front), so node addresses stay
//! stable for the shared index map and the hot path allocates nothing.
//!
//! ## Operations
//!
//! | Operation | Action | Time |
//! |-----------|--------|------|
//! | `add(entry)` | push front; at capacity reuse tail, report candidate | O(1) |
//! | `access(node)` | move to front | O(1) |
//! | `remove(node)` | unlink and return the entry | O(1) |
//!
//! ```ignore
//! // capacity 2
//! window.add(A, &mut index);           // [A]
//! window.add(B, &mut index);           // [B, A]
//! let c = window.add(C, &mut index);   // [C, B], candidate = Some(A)
//! ```

use crate::entry::{CacheEntry, Index, Segment};
use crate::list::{List, ListNode};
use core::hash::Hash;
use core::num::NonZeroUsize;

pub(crate) struct WindowLru<K> {
    list: List<CacheEntry<K>>,
}

impl<K: Hash + Eq + Clone> WindowLru<K> {
    pub(crate) fn new(cap: NonZeroUsize) -> Self {
        WindowLru {
            list: List::new(cap),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.list.len()
    }

    /// Inserts an entry at the front, registering it in the shared index.
    ///
    /// At capacity the tail node is reused in place: its previous entry is
    /// unindexed and returned as the admission candidate.
    pub(crate) fn add(
        &mut self,
        mut entry: CacheEntry<K>,
        index: &mut Index<K>,
    ) -> Option<CacheEntry<K>> {
        entry.segment = Segment::Window;
        let key = entry.key.clone();

        if !self.list.is_full() {
            let node = self
                .list
                .push_front(entry)
                .expect("window has spare capacity");
            index.insert(key, node);
            return None;
        }

        let node = self.list.back();
        // SAFETY: the list is full, so back() is a linked non-sigil node
        let evicted = unsafe {
            let old = self.list.replace(node, entry);
            self.list.move_to_front(node);
            old
        };
        index.remove(&evicted.key);
        index.insert(key, node);
        Some(evicted)
    }

    /// Marks a window entry as most recently used.
    ///
    /// # Safety
    ///
    /// `node` must come from the shared index and be tagged [`Segment::Window`].
    pub(crate) unsafe fn access(&mut self, node: *mut ListNode<CacheEntry<K>>) {
        // SAFETY: per caller contract
        unsafe { self.list.move_to_front(node) };
    }

    /// Unlinks and returns a window entry.
    ///
    /// # Safety
    ///
    /// `node` must come from the shared index and be tagged [`Segment::Window`].
    pub(crate) unsafe fn remove(&mut self, node: *mut ListNode<CacheEntry<K>>) -> CacheEntry<K> {
        // SAFETY: per caller contract
        unsafe { self.list.remove(node) }.into_value()
    }

    pub(crate) fn clear(&mut self) {
        self.list.clear();
    }
}

impl<K> core::fmt::Debug for WindowLru<K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WindowLru")
            .field("len", &self.list.len())
            .field("cap", &self.list.cap())
            .finish()
    }
}
