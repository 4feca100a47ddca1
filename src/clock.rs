//! Injectable millisecond clock.
//!
//! The shapers never read time themselves; every timestamp flows through a
//! [`Clock`] handed to the [`crate::Router`] at construction. That keeps
//! the whole pipeline deterministic under test and lets embedders with
//! their own time base (a frame counter, a cached coarse clock) plug it
//! in without touching the shaping code.
//!
//! # Implementations
//!
//! | Type | Source | Availability |
//! |------|--------|--------------|
//! | [`SystemClock`] | wall clock, ms since the Unix epoch | `std` feature |
//! | [`ManualClock`] | an atomic advanced by hand | always |
//!
//! The contract is *monotonic wall-clock milliseconds*: the shapers
//! tolerate a clock that stalls (verdicts stay in the current statistic
//! window) but a clock that jumps backward will stretch windows until real
//! time catches up.
//!
//! # Examples
//!
//! Driving a router through a scripted timeline:
//!
//! ```
//! use std::sync::Arc;
//! use paramflow::{Clock, ManualClock, Router};
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let router = Router::with_clock(clock.clone());
//!
//! clock.advance(500);          // half a statistic window later
//! assert_eq!(clock.now_ms(), 500);
//! clock.set(10_000);           // jump to an absolute time
//! ```

use core::sync::atomic::{AtomicU64, Ordering};

/// Monotonic wall-clock milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock in milliseconds since the Unix epoch.
#[cfg(feature = "std")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[cfg(feature = "std")]
impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock advanced by hand.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        ManualClock(AtomicU64::new(start_ms))
    }

    /// Moves the clock forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::Release);
    }

    /// Jumps the clock to an absolute time.
    pub fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}
