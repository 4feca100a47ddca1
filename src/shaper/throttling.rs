//! Throttling strategy: a virtual-time leaky bucket.
//!
//! Instead of rejecting the overflow, throttling *paces* it: each admitted
//! batch is assigned an ideal slot `batch · window / threshold` ms after
//! the previous one, and an early arrival is told how long to wait for its
//! slot. Only when the backlog would exceed the rule's queueing budget
//! does the shaper block.
//!
//! # How the Algorithm Works
//!
//! A single cell per parameter holds the virtual "last pass time":
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │            arrivals            ideal slots (interval = W/r)         │
//! │                                                                     │
//! │   now ──▶ ┌──────────┐        ─┬─ last_pass                         │
//! │           │ expected  │         │                                   │
//! │           │ = last +  │        ─┼─ last_pass + interval   ◀─ next   │
//! │           │ interval  │         │                            slot   │
//! │           └────┬─────┘         ─┼─ last_pass + 2·interval           │
//! │                │                                                    │
//! │   expected ≤ now          ──▶  Pass  (store now)                    │
//! │   expected - now < budget ──▶  Wait(expected - now), store expected │
//! │   expected - now ≥ budget ──▶  Blocked                              │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The pacing decision is a CAS on the time cell; a lost race yields and
//! retries against the advanced schedule. After winning with a positive
//! wait, the shaper stores the *expected* time (not the arrival time) back
//! into the cell, so later arrivals queue behind the one already waiting.
//! Under contention this trades strict wall-clock fairness for correct
//! spacing.
//!
//! ## Worked Example
//!
//! Rule: `threshold = 2` per second (`interval = 500` ms for batch 1),
//! `max_queueing_time_ms = 2000`.
//!
//! ```text
//! t (ms)   last_pass before   expected   verdict       stored
//! ──────   ────────────────   ────────   ───────────   ──────
//!      0   (first touch)         -       Pass             0
//!    100         0              500      Wait(400)      500
//!    200       500             1000      Wait(800)     1000
//!    700      1000             1500      Wait(800)     1500
//! ```
//!
//! Each wait extends the virtual schedule, so a burst of early arrivals is
//! spread out one interval apart. Once `expected - now` reaches the
//! queueing budget the shaper stops promising slots and blocks instead.
//!
//! # Edge Cases
//!
//! - `threshold ≤ 0` for the effective parameter: **Blocked** outright.
//! - `duration_in_sec == 0` divides as one second.
//! - The interval is rounded to the nearest millisecond; a sub-millisecond
//!   ideal spacing degenerates to no pacing at all.
//! - Eviction of the time cell forgets the schedule; the next arrival is
//!   treated as a first touch and passes.

use super::{yield_now, ShaperCore, TrafficShaper};
use crate::hash::ParamValue;
use crate::rule::Rule;
use crate::shaper::ParamsMetric;
use crate::verdict::{BlockReason, Verdict};
use alloc::sync::Arc;

#[derive(Debug)]
pub(crate) struct ThrottlingShaper {
    core: ShaperCore,
}

impl ThrottlingShaper {
    pub(crate) fn new(core: ShaperCore) -> Self {
        ThrottlingShaper { core }
    }
}

impl TrafficShaper for ThrottlingShaper {
    fn check(&self, arg: &ParamValue, batch_count: i64) -> Verdict {
        let Some((time_counter, _)) = self.core.metric.qps_counters() else {
            return Verdict::Pass;
        };
        let rule = &self.core.rule;

        let threshold = rule.effective_threshold(arg);
        if threshold <= 0 {
            return self
                .core
                .blocked(BlockReason::ThresholdNonPositive, arg, None);
        }
        // Ideal spacing between admitted batches, rounded to the nearest ms.
        let cost = batch_count.saturating_mul(rule.duration_ms());
        let interval = (cost + threshold / 2) / threshold;

        loop {
            let now = self.core.now_ms();
            let Some(last_pass) = time_counter.add_if_absent(arg.clone(), now) else {
                return Verdict::Pass;
            };

            let last = last_pass.load();
            let expected = last.saturating_add(interval);
            if expected <= now || expected - now < rule.max_queueing_time_ms {
                if last_pass.compare_exchange(last, now) {
                    let wait = expected - now;
                    if wait > 0 {
                        last_pass.store(expected);
                        return Verdict::Wait { ms: wait as u64 };
                    }
                    return Verdict::Pass;
                }
                yield_now();
            } else {
                return self.core.blocked(
                    BlockReason::QueueTimeExceeded,
                    arg,
                    Some(expected - now),
                );
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

    fn throttling_rule(threshold: i64, max_queueing_ms: i64) -> Rule {
        Rule {
            id: "throttle-1".into(),
            resource: "res".into(),
            metric_type: MetricType::Qps,
            control_strategy: ControlStrategy::Throttling,
            threshold,
            duration_in_sec: 1,
            max_queueing_time_ms: max_queueing_ms,
            ..Rule::default()
        }
    }

    #[test]
    fn first_touch_passes() {
        let (shaper, _clock) = shaper_at(throttling_rule(2, 2000), 0);
        assert_eq!(shaper.check(&ParamValue::from("b"), 1), Verdict::Pass);
    }

    #[test]
    fn early_arrivals_queue_with_growing_waits() {
        let (shaper, clock) = shaper_at(throttling_rule(2, 2000), 0);
        let arg = ParamValue::from("b");

        // interval = 500ms at threshold 2/s
        assert_eq!(shaper.check(&arg, 1), Verdict::Pass);

        clock.set(100);
        assert_eq!(shaper.check(&arg, 1), Verdict::Wait { ms: 400 });

        // The previous call stored its expected time (500), so the next
        // arrival queues behind it.
        clock.set(200);
        assert_eq!(shaper.check(&arg, 1), Verdict::Wait { ms: 800 });
    }

    #[test]
    fn queueing_budget_blocks_the_backlog() {
        let (shaper, clock) = shaper_at(throttling_rule(1, 2000), 0);
        let arg = ParamValue::from("b");

        // interval = 1000ms at threshold 1/s
        assert_eq!(shaper.check(&arg, 1), Verdict::Pass);
        clock.set(1);
        assert_eq!(shaper.check(&arg, 1), Verdict::Wait { ms: 999 });
        clock.set(2);
        assert_eq!(shaper.check(&arg, 1), Verdict::Wait { ms: 1998 });
        clock.set(3);
        let verdict = shaper.check(&arg, 1);
        assert!(matches!(
            verdict,
            Verdict::Blocked {
                reason: BlockReason::QueueTimeExceeded,
                ..
            }
        ));
    }

    #[test]
    fn late_arrival_passes_without_wait() {
        let (shaper, clock) = shaper_at(throttling_rule(2, 2000), 0);
        let arg = ParamValue::from("b");

        assert_eq!(shaper.check(&arg, 1), Verdict::Pass);
        clock.set(700);
        assert_eq!(shaper.check(&arg, 1), Verdict::Pass);
    }

    #[test]
    fn pass_time_is_monotone_across_checks() {
        let (shaper, clock) = shaper_at(throttling_rule(2, 5000), 0);
        let arg = ParamValue::from("b");
        let (time_counter, _) = shaper.metric().qps_counters().unwrap();

        let mut previous = i64::MIN;
        for t in [0u64, 100, 150, 700, 705, 2000] {
            clock.set(t);
            let _ = shaper.check(&arg, 1);
            let stored = time_counter.get(&arg).unwrap().load();
            assert!(stored >= previous, "pass time went backward at t={t}");
            previous = stored;
        }
    }

    #[test]
    fn batch_size_stretches_the_interval() {
        let (shaper, clock) = shaper_at(throttling_rule(2, 10_000), 0);
        let arg = ParamValue::from("b");

        assert_eq!(shaper.check(&arg, 1), Verdict::Pass);
        clock.set(10);
        // batch 4 at 2/s occupies 2000ms of budget from the last pass at 0
        assert_eq!(shaper.check(&arg, 4), Verdict::Wait { ms: 1990 });
    }

    #[test]
    fn non_positive_threshold_blocks() {
        let mut rule = throttling_rule(2, 1000);
        rule.specific_items.insert(ParamValue::from("off"), -1);
        let (shaper, _clock) = shaper_at(rule, 0);
        assert!(matches!(
            shaper.check(&ParamValue::from("off"), 1),
            Verdict::Blocked {
                reason: BlockReason::ThresholdNonPositive,
                ..
            }
        ));
    }
}
