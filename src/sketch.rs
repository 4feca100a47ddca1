//! 4-bit count-min sketch used for TinyLFU admission decisions.
//!
//! The admission filter needs an approximate answer to "which of these two
//! keys is accessed more often?" for an unbounded key universe in O(1)
//! memory. A count-min sketch provides it: `d` hashed counter rows where
//! increments bump one counter per row and an estimate reads the minimum,
//! so collisions only ever inflate, never deflate, and the minimum bounds
//! the error.
//!
//! # How It Works
//!
//! Four rows of saturating 4-bit counters, sixteen counters packed per
//! `u64` word. Width is the smallest power of two holding at least one
//! counter per cacheable entry, so row indexing is a single mask:
//!
//! ```text
//!              column = (hash ^ seed[row]) & (width - 1)
//!
//!         ┌────┬────┬────┬────┬────┬────┬────┬────┬─ ─ ─┬────┐
//! row 0   │ 3  │ 0  │ 15 │ 1  │ 0  │ 7  │ 0  │ 2  │     │ 0  │
//! row 1   │ 0  │ 4  │ 0  │ 3  │ 12 │ 0  │ 1  │ 0  │     │ 5  │
//! row 2   │ 1  │ 0  │ 2  │ 0  │ 3  │ 0  │ 0  │ 9  │     │ 0  │
//! row 3   │ 0  │ 6  │ 0  │ 0  │ 3  │ 2  │ 0  │ 0  │     │ 1  │
//!         └────┴────┴────┴────┴────┴────┴────┴────┴─ ─ ─┴────┘
//!            each cell: 4 bits, saturating at 15
//!            estimate(hash) = min over the 4 probed cells
//! ```
//!
//! ## Aging
//!
//! Popularity must decay or the sketch would remember every key that was
//! ever hot. The owner counts insertion and access events; when the
//! sample window fills it calls [`CountMinSketch::reset`], halving every
//! counter with one shift-and-mask per word (`(w >> 1) & 0x7777...`).
//! Relative order among hot keys survives the halving while cold keys
//! drop back toward zero.
//!
//! ## Sizing
//!
//! | Parameter | Value |
//! |-----------|-------|
//! | depth | 4 rows |
//! | width | `next_power_of_two(max(cap, 16))` counters per row |
//! | memory | `4 × width / 2` bytes |
//! | counter ceiling | 15 |

use alloc::vec;
use alloc::vec::Vec;

const DEPTH: usize = 4;
const COUNTERS_PER_WORD: usize = 16;
const COUNTER_MAX: u64 = 0xF;

/// Per-row seeds decorrelate the four counter placements of a key.
const ROW_SEEDS: [u64; DEPTH] = [
    0x9e37_79b9_7f4a_7c15,
    0xc2b2_ae3d_27d4_eb4f,
    0x1656_67b1_9e37_79f9,
    0x27d4_eb2f_1656_67c5,
];

pub(crate) struct CountMinSketch {
    /// Row width minus one; width is a power of two.
    mask: u64,
    words_per_row: usize,
    /// `DEPTH` rows laid out contiguously.
    table: Vec<u64>,
}

impl CountMinSketch {
    /// Creates a sketch wide enough to track `cap` distinct entries.
    pub(crate) fn new(cap: usize) -> Self {
        let width = cap.max(COUNTERS_PER_WORD).next_power_of_two();
        let words_per_row = width / COUNTERS_PER_WORD;
        CountMinSketch {
            mask: (width - 1) as u64,
            words_per_row,
            table: vec![0u64; DEPTH * words_per_row],
        }
    }

    /// Number of counters per row.
    #[cfg(test)]
    pub(crate) fn width(&self) -> usize {
        (self.mask + 1) as usize
    }

    #[inline]
    fn slot(&self, row: usize, hash: u64) -> (usize, u32) {
        let idx = ((hash ^ ROW_SEEDS[row]) & self.mask) as usize;
        let word = row * self.words_per_row + idx / COUNTERS_PER_WORD;
        let shift = ((idx % COUNTERS_PER_WORD) * 4) as u32;
        (word, shift)
    }

    /// Increments the four counters of `hash`, saturating at 15.
    pub(crate) fn increment(&mut self, hash: u64) {
        for row in 0..DEPTH {
            let (word, shift) = self.slot(row, hash);
            if (self.table[word] >> shift) & COUNTER_MAX < COUNTER_MAX {
                self.table[word] += 1 << shift;
            }
        }
    }

    /// Returns the estimated frequency: the minimum of the four counters.
    pub(crate) fn estimate(&self, hash: u64) -> u64 {
        let mut min = COUNTER_MAX;
        for row in 0..DEPTH {
            let (word, shift) = self.slot(row, hash);
            let count = (self.table[word] >> shift) & COUNTER_MAX;
            if count < min {
                min = count;
            }
        }
        min
    }

    /// Halves every counter, preserving the skew toward recent activity.
    pub(crate) fn reset(&mut self) {
        for word in self.table.iter_mut() {
            *word = (*word >> 1) & 0x7777_7777_7777_7777;
        }
    }

    /// Zeroes every counter.
    pub(crate) fn clear(&mut self) {
        for word in self.table.iter_mut() {
            *word = 0;
        }
    }
}

impl core::fmt::Debug for CountMinSketch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CountMinSketch")
            .field("width", &(self.mask + 1))
            .field("depth", &DEPTH)
            .finish()
    }
}
