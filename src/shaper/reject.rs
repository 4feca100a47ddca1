//! Reject strategy: a per-parameter token bucket.
//!
//! Every parameter value gets its own bucket of `threshold + burst_count`
//! tokens per statistic window. A check withdraws `batch_count` tokens or
//! blocks; time refills the bucket in proportion to how much of the window
//! has passed.
//!
//! # How the Algorithm Works
//!
//! Two counter cells per parameter live in the metric caches:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                     per-parameter bucket state                       │
//! │                                                                      │
//! │  time_counter[arg]  ──▶  last refill timestamp (ms)                  │
//! │  token_counter[arg] ──▶  current balance                             │
//! │                                                                      │
//! │                 refill (window passed)                               │
//! │        ┌────────────────────────────────────────┐                    │
//! │        │   credit = pass_time · threshold / W   │                    │
//! │        ▼                                        │                    │
//! │  ┌───────────────────────────────┐              │                    │
//! │  │ balance (≤ threshold + burst) │ ──────────── ┘                    │
//! │  └──────────────┬────────────────┘                                   │
//! │                 │ CAS: balance → balance - batch                     │
//! │                 ▼                                                    │
//! │          Pass / Blocked                                              │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each check runs a lock-free loop:
//!
//! 1. Stamp `now` and resolve the time cell with `add_if_absent`. A first
//!    sighting creates both cells in one step: the balance starts at
//!    `max - batch` (the bucket filled and this batch consumed) and the
//!    call passes.
//! 2. If `now - last_refill` exceeds the window, the check refills:
//!    `new = min(max, credit + rest) - batch`. A negative result blocks;
//!    otherwise a CAS installs the new balance and restamps the time cell.
//! 3. Inside an active window the check just draws down:
//!    CAS `rest → rest - batch` while `rest - batch ≥ 0`, else block.
//! 4. Any lost CAS yields the thread and retries; the state advanced, so
//!    the retry observes fresh values.
//!
//! ## Worked Example
//!
//! Rule: `threshold = 10`, `duration_in_sec = 1`, `burst_count = 0`.
//!
//! ```text
//! t (ms)   call              balance before → after   verdict
//! ──────   ───────────────   ──────────────────────   ───────
//!      0   check(a, 1)       (first touch)  - → 9     Pass
//!      0   check(a, 1) ×9    9 → 0                    Pass ×9
//!      0   check(a, 1)       0 (0 - 1 < 0)            Blocked
//!   1500   check(a, 4)       refill 15, clamp 10;     Pass
//!                            10 - 4 = 6
//! ```
//!
//! # Eviction and Termination
//!
//! The cache may evict either cell at any time. A missing time cell is
//! indistinguishable from a first sighting and recreates the pair. A
//! missing balance cell (with the time cell still resident) is recreated
//! charged, so the retry loop always terminates; losing that creation race
//! just means the next round finds the cell another check made.
//!
//! # Edge Cases
//!
//! - `threshold ≤ 0` for the effective parameter (including a
//!   `specific_items` override): **Blocked** outright.
//! - `batch_count > threshold + burst_count`: **Blocked** outright, the
//!   batch can never fit the bucket.
//! - `duration_in_sec == 0` divides as one second.
//! - Concurrent refills at a window boundary can each clamp at the bucket
//!   cap; the admitted overshoot is bounded by one batch per racing thread.

use super::{yield_now, ShaperCore, TrafficShaper};
use crate::hash::ParamValue;
use crate::rule::Rule;
use crate::shaper::ParamsMetric;
use crate::verdict::{BlockReason, Verdict};
use alloc::sync::Arc;

#[derive(Debug)]
pub(crate) struct RejectShaper {
    core: ShaperCore,
}

impl RejectShaper {
    pub(crate) fn new(core: ShaperCore) -> Self {
        RejectShaper { core }
    }
}

impl TrafficShaper for RejectShaper {
    fn check(&self, arg: &ParamValue, batch_count: i64) -> Verdict {
        let Some((time_counter, token_counter)) = self.core.metric.qps_counters() else {
            return Verdict::Pass;
        };
        let rule = &self.core.rule;

        let threshold = rule.effective_threshold(arg);
        if threshold <= 0 {
            return self
                .core
                .blocked(BlockReason::ThresholdNonPositive, arg, None);
        }
        let max_count = threshold + rule.burst_count;
        if batch_count > max_count {
            return self.core.blocked(BlockReason::BatchOverMax, arg, None);
        }
        let window_ms = rule.duration_ms();

        loop {
            let now = self.core.now_ms();
            let Some(last_refill) = time_counter.add_if_absent(arg.clone(), now) else {
                // First sighting of this parameter: fill the bucket and
                // consume the batch in one step. When a racing check has
                // already recreated the balance cell, consume from it on
                // the next round instead of double-charging the window.
                if token_counter
                    .add_if_absent(arg.clone(), max_count - batch_count)
                    .is_none()
                {
                    return Verdict::Pass;
                }
                continue;
            };

            let pass_time = now - last_refill.load();
            if pass_time > window_ms {
                // The statistic window has passed; refill.
                let left = max_count - batch_count;
                match token_counter.add_if_absent(arg.clone(), left) {
                    None => {
                        // The balance cell had been evicted; this call
                        // recreated it already charged.
                        last_refill.store(now);
                        return Verdict::Pass;
                    }
                    Some(tokens) => {
                        let rest = tokens.load();
                        let refill = pass_time.saturating_mul(threshold) / window_ms;
                        let new_balance = max_count.min(refill.saturating_add(rest)) - batch_count;
                        if new_balance < 0 {
                            return self
                                .core
                                .blocked(BlockReason::TokenExhausted, arg, Some(rest));
                        }
                        if tokens.compare_exchange(rest, new_balance) {
                            last_refill.store(now);
                            return Verdict::Pass;
                        }
                        yield_now();
                    }
                }
            } else {
                match token_counter.get(arg) {
                    Some(tokens) => {
                        let rest = tokens.load();
                        if rest - batch_count >= 0 {
                            if tokens.compare_exchange(rest, rest - batch_count) {
                                return Verdict::Pass;
                            }
                            yield_now();
                        } else {
                            return self
                                .core
                                .blocked(BlockReason::TokenExhausted, arg, Some(rest));
                        }
                    }
                    None => {
                        // Balance evicted between the time lookup and here.
                        // Recreate it charged so the loop terminates; losing
                        // the race means the next round finds the cell.
                        if token_counter
                            .add_if_absent(arg.clone(), max_count - batch_count)
                            .is_none()
                        {
                            return Verdict::Pass;
                        }
                        yield_now();
                    }
                }
            }
        }
    }

    fn rule(&self) -> &Rule {
        &self.core.rule
    }

    fn metric(&self) -> &Arc<ParamsMetric> {
        &self.core.metric
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::shaper_at;
    use crate::hash::ParamValue;
    use crate::rule::{ControlStrategy, MetricType, Rule};
    use crate::verdict::{BlockReason, Verdict};

    fn reject_rule(threshold: i64, burst: i64) -> Rule {
        Rule {
            id: "reject-1".into(),
            resource: "res".into(),
            metric_type: MetricType::Qps,
            control_strategy: ControlStrategy::Reject,
            threshold,
            duration_in_sec: 1,
            burst_count: burst,
            ..Rule::default()
        }
    }

    #[test]
    fn first_touch_passes_and_charges_the_bucket() {
        let (shaper, _clock) = shaper_at(reject_rule(10, 0), 0);
        let arg = ParamValue::from("a");

        assert_eq!(shaper.check(&arg, 1), Verdict::Pass);

        let (_, tokens) = shaper.metric().qps_counters().unwrap();
        assert_eq!(tokens.get(&arg).unwrap().load(), 9);
    }

    #[test]
    fn bucket_exhaustion_blocks() {
        let (shaper, _clock) = shaper_at(reject_rule(10, 0), 0);
        let arg = ParamValue::from("a");

        for _ in 0..10 {
            assert_eq!(shaper.check(&arg, 1), Verdict::Pass);
        }
        let verdict = shaper.check(&arg, 1);
        assert!(matches!(
            verdict,
            Verdict::Blocked {
                reason: BlockReason::TokenExhausted,
                ..
            }
        ));
    }

    #[test]
    fn window_expiry_refills() {
        let (shaper, clock) = shaper_at(reject_rule(10, 0), 0);
        let arg = ParamValue::from("a");

        for _ in 0..10 {
            assert_eq!(shaper.check(&arg, 1), Verdict::Pass);
        }
        assert!(shaper.check(&arg, 1).is_blocked());

        clock.advance(1001);
        assert_eq!(shaper.check(&arg, 1), Verdict::Pass);

        let (_, tokens) = shaper.metric().qps_counters().unwrap();
        assert_eq!(tokens.get(&arg).unwrap().load(), 9);
    }

    #[test]
    fn batch_over_bucket_size_blocks_up_front() {
        let (shaper, _clock) = shaper_at(reject_rule(10, 2), 0);
        let arg = ParamValue::from("a");

        let verdict = shaper.check(&arg, 13);
        assert!(matches!(
            verdict,
            Verdict::Blocked {
                reason: BlockReason::BatchOverMax,
                ..
            }
        ));
        // Equal to threshold + burst is still admissible.
        assert_eq!(shaper.check(&arg, 12), Verdict::Pass);
    }

    #[test]
    fn burst_extends_the_bucket() {
        let (shaper, _clock) = shaper_at(reject_rule(10, 5), 0);
        let arg = ParamValue::from("a");

        for _ in 0..15 {
            assert_eq!(shaper.check(&arg, 1), Verdict::Pass);
        }
        assert!(shaper.check(&arg, 1).is_blocked());
    }

    #[test]
    fn non_positive_specific_threshold_blocks() {
        let mut rule = reject_rule(10, 0);
        rule.specific_items.insert(ParamValue::from("banned"), 0);
        let (shaper, _clock) = shaper_at(rule, 0);

        let verdict = shaper.check(&ParamValue::from("banned"), 1);
        assert!(matches!(
            verdict,
            Verdict::Blocked {
                reason: BlockReason::ThresholdNonPositive,
                ..
            }
        ));
        assert_eq!(shaper.check(&ParamValue::from("ok"), 1), Verdict::Pass);
    }

    #[test]
    fn specific_item_gets_its_own_bucket_size() {
        let mut rule = reject_rule(2, 0);
        rule.specific_items.insert(ParamValue::from("vip"), 5);
        let (shaper, _clock) = shaper_at(rule, 0);

        let vip = ParamValue::from("vip");
        for _ in 0..5 {
            assert_eq!(shaper.check(&vip, 1), Verdict::Pass);
        }
        assert!(shaper.check(&vip, 1).is_blocked());

        let plain = ParamValue::from("plain");
        assert_eq!(shaper.check(&plain, 1), Verdict::Pass);
        assert_eq!(shaper.check(&plain, 1), Verdict::Pass);
        assert!(shaper.check(&plain, 1).is_blocked());
    }

    #[test]
    fn partial_window_refill_is_proportional() {
        let (shaper, clock) = shaper_at(reject_rule(10, 0), 0);
        let arg = ParamValue::from("a");

        for _ in 0..10 {
            shaper.check(&arg, 1);
        }
        // 1.5 windows later the bucket refills, clamped to capacity.
        clock.advance(1500);
        assert_eq!(shaper.check(&arg, 4), Verdict::Pass);
        let (_, tokens) = shaper.metric().qps_counters().unwrap();
        assert_eq!(tokens.get(&arg).unwrap().load(), 6);
    }

    #[test]
    fn distinct_args_have_independent_buckets() {
        let (shaper, _clock) = shaper_at(reject_rule(1, 0), 0);

        assert_eq!(shaper.check(&ParamValue::from("a"), 1), Verdict::Pass);
        assert!(shaper.check(&ParamValue::from("a"), 1).is_blocked());
        assert_eq!(shaper.check(&ParamValue::from("b"), 1), Verdict::Pass);
    }
}
