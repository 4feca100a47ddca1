//! Shaping verdicts and their combination law.
//!
//! Every check resolves to one of three outcomes:
//!
//! | Verdict | Meaning | Caller's move |
//! |---------|---------|---------------|
//! | `Pass` | admitted | proceed |
//! | `Wait { ms }` | admitted into the queue | sleep `ms`, then proceed |
//! | `Blocked { .. }` | rejected | shed the call |
//!
//! A `Blocked` verdict carries the reason, the id of the blocking rule,
//! and, where the shaper read one, the counter value it saw, so telemetry
//! can say *which* limit fired and how far over the call was.
//!
//! # Combination
//!
//! When several rules shape the same resource, their verdicts fold with
//! [`Verdict::combine`]: `Blocked` dominates `Wait` dominates `Pass`, and
//! of two waits the longer one stands (sleeping the longer wait satisfies
//! both schedules).
//!
//! ```
//! use paramflow::Verdict;
//!
//! let combined = Verdict::Wait { ms: 250 }.combine(Verdict::Wait { ms: 400 });
//! assert_eq!(combined, Verdict::Wait { ms: 400 });
//! assert_eq!(Verdict::Pass.combine(Verdict::Pass), Verdict::Pass);
//! ```
//!
//! Note that a caller honoring a `Wait` is not re-checked when the wait
//! elapses; the throttling shaper already accounted for the queued slot
//! when it returned the verdict.

use alloc::string::String;
use core::fmt;

/// Why a call was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// The effective threshold for the parameter is not positive.
    ThresholdNonPositive,
    /// The batch exceeds the bucket's maximum (threshold plus burst).
    BatchOverMax,
    /// The token bucket has fewer tokens than the batch needs.
    TokenExhausted,
    /// Queueing would exceed the rule's maximum queueing time.
    QueueTimeExceeded,
    /// The parameter's in-flight count is at its limit.
    ConcurrencyOverLimit,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            BlockReason::ThresholdNonPositive => "threshold is not positive",
            BlockReason::BatchOverMax => "batch count exceeds max token count",
            BlockReason::TokenExhausted => "not enough tokens",
            BlockReason::QueueTimeExceeded => "wait time exceeds max queueing time",
            BlockReason::ConcurrencyOverLimit => "concurrency over limit",
        };
        f.write_str(msg)
    }
}

/// Outcome of a shaping check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Admit the call.
    Pass,
    /// Admit the call after the caller sleeps this many milliseconds.
    Wait {
        ms: u64,
    },
    /// Reject the call.
    Blocked {
        reason: BlockReason,
        /// Id of the rule that blocked.
        rule_id: String,
        /// Counter snapshot at decision time, when one was read.
        observed: Option<i64>,
    },
}

impl Verdict {
    #[inline]
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    #[inline]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Blocked { .. })
    }

    /// Combines verdicts from multiple rules: `Blocked` dominates `Wait`
    /// dominates `Pass`, and of two waits the longer one stands.
    pub fn combine(self, other: Verdict) -> Verdict {
        match (self, other) {
            (v @ Verdict::Blocked { .. }, _) => v,
            (_, v @ Verdict::Blocked { .. }) => v,
            (Verdict::Wait { ms: a }, Verdict::Wait { ms: b }) => Verdict::Wait { ms: a.max(b) },
            (v @ Verdict::Wait { .. }, Verdict::Pass) => v,
            (Verdict::Pass, v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    fn blocked() -> Verdict {
        Verdict::Blocked {
            reason: BlockReason::TokenExhausted,
            rule_id: "r1".to_string(),
            observed: None,
        }
    }

    #[test]
    fn blocked_dominates_everything() {
        assert!(blocked().combine(Verdict::Pass).is_blocked());
        assert!(Verdict::Pass.combine(blocked()).is_blocked());
        assert!(Verdict::Wait { ms: 10 }.combine(blocked()).is_blocked());
    }

    #[test]
    fn wait_dominates_pass_and_takes_max() {
        assert_eq!(
            Verdict::Wait { ms: 10 }.combine(Verdict::Pass),
            Verdict::Wait { ms: 10 }
        );
        assert_eq!(
            Verdict::Pass.combine(Verdict::Wait { ms: 7 }),
            Verdict::Wait { ms: 7 }
        );
        assert_eq!(
            Verdict::Wait { ms: 10 }.combine(Verdict::Wait { ms: 25 }),
            Verdict::Wait { ms: 25 }
        );
    }

    #[test]
    fn pass_is_the_identity() {
        assert!(Verdict::Pass.combine(Verdict::Pass).is_pass());
    }
}
