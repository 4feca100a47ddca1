//! Concurrency strategy: a per-parameter in-flight counter.
//!
//! Where the QPS strategies budget a *rate*, this one budgets how many
//! calls carrying the same parameter value may be in flight at once. It is
//! the right tool when the cost being protected is held for the duration
//! of the call (a connection, a worker, a downstream session) rather than
//! consumed at admission.
//!
//! # How the Algorithm Works
//!
//! One counter cell per parameter tracks the in-flight count. `check`
//! increments it and admits while the count stays at or below the
//! effective limit, rolling the increment back on rejection; the caller
//! pairs every admitted call with a [`TrafficShaper::release`] that
//! decrements on completion.
//!
//! ```text
//!                 check(arg)                      release(arg)
//!                     │                                │
//!                     ▼                                ▼
//!           ┌──── fetch_add(1) ────┐          ┌── CAS n → n-1 ──┐
//!           │                      │          │   (never below  │
//!     n ≤ limit              n > limit        │    zero)        │
//!           │                      │          └─────────────────┘
//!           ▼                      ▼
//!         Pass            fetch_sub(1), Blocked
//! ```
//!
//! ## Worked Example
//!
//! Rule: `threshold = 3`.
//!
//! ```text
//! call                 cell after   verdict
//! ─────────────────    ──────────   ─────────────────────
//! check(c)   (first)       1        Pass
//! check(c)                 2        Pass
//! check(c)                 3        Pass
//! check(c)                 3        Blocked (observed 4)
//! release(c)               2        -
//! check(c)                 3        Pass
//! ```
//!
//! # Eviction
//!
//! Cells belong to the cache: an eviction forgets the in-flight count and
//! a later release finds nothing to decrement. That is the documented
//! trade of bounding the cache; `release` clamps at zero so a recreated
//! cell can never go negative from stale completions.

use super::{yield_now, ShaperCore, TrafficShaper};
use crate::hash::ParamValue;
use crate::rule::Rule;
use crate::shaper::ParamsMetric;
use crate::verdict::{BlockReason, Verdict};
use alloc::sync::Arc;

#[derive(Debug)]
pub(crate) struct ConcurrencyShaper {
    core: ShaperCore,
}

impl ConcurrencyShaper {
    pub(crate) fn new(core: ShaperCore) -> Self {
        ConcurrencyShaper { core }
    }
}

impl TrafficShaper for ConcurrencyShaper {
    fn check(&self, arg: &ParamValue, _batch_count: i64) -> Verdict {
        let Some(counter) = self.core.metric.concurrency_counter() else {
            return Verdict::Pass;
        };

        // First sighting: the cell starts at 1, counting this call.
        let Some(cell) = counter.add_if_absent(arg.clone(), 1) else {
            return Verdict::Pass;
        };

        let concurrency = cell.fetch_add(1) + 1;
        let limit = self.core.rule.effective_threshold(arg);
        if concurrency <= limit {
            return Verdict::Pass;
        }
        cell.fetch_sub(1);
        self.core
            .blocked(BlockReason::ConcurrencyOverLimit, arg, Some(concurrency))
    }

    fn release(&self, arg: &ParamValue) {
        let Some(counter) = self.core.metric.concurrency_counter() else {
            return;
        };
        let Some(cell) = counter.get(arg) else {
            return;
        };
        // Decrement without going negative: the entry may have been evicted
        // and recreated since this call was admitted.
        loop {
            let current = cell.load();
            if current <= 0 {
                return;
            }
            if cell.compare_exchange(current, current - 1) {
                return;
            }
            yield_now();
        }
    }

    fn rule(&self) -> &Rule {
        &self.core.rule
    }

    fn metric(&self) -> &Arc<ParamsMetric> {
        &self.core.metric
    }
}
