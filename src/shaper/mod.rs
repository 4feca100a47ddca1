//! Per-rule traffic shapers.
//!
//! A shaper owns the per-parameter metric caches for one rule and answers
//! `check` calls with a [`Verdict`] in bounded time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  caller                                                              │
//! │    │  check(resource, args, batch)                                   │
//! │    ▼                                                                 │
//! │  Router ──── rule table ───▶ shaper per rule                         │
//! │                                │                                     │
//! │              ┌─────────────────┼──────────────────┐                  │
//! │              ▼                 ▼                  ▼                  │
//! │        RejectShaper     ThrottlingShaper   ConcurrencyShaper         │
//! │        (token bucket)   (leaky bucket)     (in-flight count)         │
//! │              │                 │                  │                  │
//! │              └────────┬────────┴──────────────────┘                  │
//! │                       ▼                                              │
//! │                 ParamsMetric                                         │
//! │          time / token / concurrency caches                           │
//! │          (W-TinyLFU maps of atomic cells)                            │
//! │                       │                                              │
//! │                       ▼                                              │
//! │                    Verdict                                           │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Strategy Selection
//!
//! | Metric type | Control strategy | Shaper | Over the limit |
//! |-------------|------------------|--------|----------------|
//! | QPS | Reject | token bucket | `Blocked` |
//! | QPS | Throttling | leaky bucket | `Wait(ms)`, then `Blocked` |
//! | Concurrency | either | in-flight counter | `Blocked` until `release` |
//!
//! The concurrency metric ignores the control strategy: there is nothing
//! to queue for, a slot either exists or it does not.
//!
//! # Concurrency Model
//!
//! Shapers never sleep: a `Wait` verdict tells the caller how long to
//! queue, and CAS contention is resolved by yielding and retrying.
//! Progress is guaranteed because a failed CAS means either another thread
//! advanced the state or the entry was evicted, and re-resolving through
//! the cache terminates the loop. The cache lock is never held across a
//! CAS iteration; cells are mutated through handles that stay valid after
//! the lock is dropped.
//!
//! # Example
//!
//! Shapers are built and dispatched by the [`crate::Router`]:
//!
//! ```
//! use paramflow::{ControlStrategy, MetricType, ParamValue, Router, Rule, Verdict};
//!
//! let router = Router::new();
//! router.install(Rule {
//!     id: "per-user".into(),
//!     resource: "api".into(),
//!     metric_type: MetricType::Qps,
//!     control_strategy: ControlStrategy::Reject,
//!     threshold: 1,
//!     duration_in_sec: 1,
//!     ..Rule::default()
//! }).unwrap();
//!
//! let args = [ParamValue::from("u1")];
//! assert_eq!(router.check("api", &args, 1), Verdict::Pass);
//! assert!(router.check("api", &args, 1).is_blocked());
//! ```

mod concurrency;
mod reject;
mod throttling;

pub(crate) use concurrency::ConcurrencyShaper;
pub(crate) use reject::RejectShaper;
pub(crate) use throttling::ThrottlingShaper;

use crate::cache::ParamsCache;
use crate::clock::Clock;
use crate::config::{
    CacheConfig, CONCURRENCY_MAX_COUNT, PARAMS_CAPACITY_BASE, PARAMS_MAX_CAPACITY,
};
use crate::hash::ParamValue;
use crate::rule::{ControlStrategy, MetricType, Rule};
use crate::verdict::{BlockReason, Verdict};
use alloc::sync::Arc;
use core::fmt;

/// Reschedules the current thread after a lost CAS race.
#[inline]
pub(crate) fn yield_now() {
    #[cfg(feature = "std")]
    std::thread::yield_now();
    #[cfg(not(feature = "std"))]
    core::hint::spin_loop();
}

/// The per-parameter counter caches backing one rule.
///
/// QPS rules track two cells per parameter, the last refill (or last pass)
/// time and the token balance, in separate caches so either can be evicted
/// independently. Concurrency rules track a single in-flight count.
#[derive(Debug)]
pub enum ParamsMetric {
    Qps {
        /// Parameter → last refill time (reject) or last pass time
        /// (throttling), in clock milliseconds.
        time_counter: ParamsCache<ParamValue>,
        /// Parameter → current token balance.
        token_counter: ParamsCache<ParamValue>,
    },
    Concurrency {
        /// Parameter → in-flight call count.
        concurrency_counter: ParamsCache<ParamValue>,
    },
}

impl ParamsMetric {
    pub(crate) fn qps_counters(
        &self,
    ) -> Option<(&ParamsCache<ParamValue>, &ParamsCache<ParamValue>)> {
        match self {
            ParamsMetric::Qps {
                time_counter,
                token_counter,
            } => Some((time_counter, token_counter)),
            ParamsMetric::Concurrency { .. } => None,
        }
    }

    pub(crate) fn concurrency_counter(&self) -> Option<&ParamsCache<ParamValue>> {
        match self {
            ParamsMetric::Concurrency {
                concurrency_counter,
            } => Some(concurrency_counter),
            ParamsMetric::Qps { .. } => None,
        }
    }
}

/// A per-rule traffic-control policy.
pub trait TrafficShaper: Send + Sync {
    /// Decides whether a call carrying `arg` with the given batch size is
    /// admitted, queued, or rejected. Never blocks.
    fn check(&self, arg: &ParamValue, batch_count: i64) -> Verdict;

    /// Completion hook; only the concurrency strategy does anything here.
    fn release(&self, _arg: &ParamValue) {}

    /// The rule this shaper enforces.
    fn rule(&self) -> &Rule;

    /// The metric caches, shared so rule updates can keep counter state.
    fn metric(&self) -> &Arc<ParamsMetric>;
}

/// State common to all shaper kinds.
pub(crate) struct ShaperCore {
    pub(crate) rule: Rule,
    pub(crate) metric: Arc<ParamsMetric>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl ShaperCore {
    /// Builds a blocked verdict and emits the fire-and-forget telemetry
    /// line for it.
    pub(crate) fn blocked(
        &self,
        reason: BlockReason,
        arg: &ParamValue,
        observed: Option<i64>,
    ) -> Verdict {
        log::debug!(
            "hotspot rule {} blocked arg {}: {}",
            self.rule.id,
            arg,
            reason
        );
        Verdict::Blocked {
            reason,
            rule_id: self.rule.id.clone(),
            observed,
        }
    }

    #[inline]
    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now_ms() as i64
    }
}

impl fmt::Debug for ShaperCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaperCore")
            .field("rule", &self.rule.id)
            .field("resource", &self.rule.resource)
            .finish()
    }
}

/// Parameter cache capacity for a QPS rule: the explicit hint when given,
/// otherwise scaled with the window length and capped.
fn qps_capacity(rule: &Rule) -> usize {
    let capacity = if rule.params_max_capacity > 0 {
        rule.params_max_capacity
    } else if rule.duration_in_sec == 0 {
        PARAMS_MAX_CAPACITY
    } else {
        PARAMS_MAX_CAPACITY.min(PARAMS_CAPACITY_BASE.saturating_mul(rule.duration_in_sec))
    };
    capacity.max(0) as usize
}

fn concurrency_capacity(rule: &Rule) -> usize {
    let capacity = if rule.params_max_capacity > 0 {
        rule.params_max_capacity
    } else {
        CONCURRENCY_MAX_COUNT
    };
    capacity as usize
}

fn new_metric(rule: &Rule) -> ParamsMetric {
    match rule.metric_type {
        MetricType::Qps => {
            let config = CacheConfig::new(qps_capacity(rule));
            ParamsMetric::Qps {
                time_counter: ParamsCache::new(config),
                token_counter: ParamsCache::new(config),
            }
        }
        MetricType::Concurrency => ParamsMetric::Concurrency {
            concurrency_counter: ParamsCache::new(CacheConfig::new(concurrency_capacity(rule))),
        },
    }
}

/// Builds the shaper for a validated rule, reusing `metric` when the
/// previous rule had the same counter shape.
pub(crate) fn build(
    rule: Rule,
    metric: Option<Arc<ParamsMetric>>,
    clock: Arc<dyn Clock>,
) -> Arc<dyn TrafficShaper> {
    let metric = metric.unwrap_or_else(|| Arc::new(new_metric(&rule)));
    let core = ShaperCore {
        rule,
        metric,
        clock,
    };
    match (core.rule.metric_type, core.rule.control_strategy) {
        (MetricType::Concurrency, _) => Arc::new(ConcurrencyShaper::new(core)),
        (MetricType::Qps, ControlStrategy::Reject) => Arc::new(RejectShaper::new(core)),
        (MetricType::Qps, ControlStrategy::Throttling) => Arc::new(ThrottlingShaper::new(core)),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qps_capacity_scales_with_duration() {
        let rule = Rule {
            duration_in_sec: 2,
            ..Rule::default()
        };
        assert_eq!(qps_capacity(&rule), 8000);
    }

    #[test]
    fn qps_capacity_is_capped() {
        let rule = Rule {
            duration_in_sec: 3600,
            ..Rule::default()
        };
        assert_eq!(qps_capacity(&rule), PARAMS_MAX_CAPACITY as usize);
    }

    #[test]
    fn explicit_capacity_hint_wins() {
        let rule = Rule {
            params_max_capacity: 128,
            duration_in_sec: 3600,
            ..Rule::default()
        };
        assert_eq!(qps_capacity(&rule), 128);
        assert_eq!(concurrency_capacity(&rule), 128);
    }

    #[test]
    fn zero_duration_uses_the_default_capacity() {
        let rule = Rule {
            duration_in_sec: 0,
            ..Rule::default()
        };
        assert_eq!(qps_capacity(&rule), PARAMS_MAX_CAPACITY as usize);
    }

    #[test]
    fn metric_variant_follows_metric_type() {
        let qps = new_metric(&Rule::default());
        assert!(qps.qps_counters().is_some());
        assert!(qps.concurrency_counter().is_none());

        let conc = new_metric(&Rule {
            metric_type: MetricType::Concurrency,
            ..Rule::default()
        });
        assert!(conc.concurrency_counter().is_some());
        assert!(conc.qps_counters().is_none());
    }
}
