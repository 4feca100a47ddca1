//! Shaping rules.
//!
//! A rule binds one shaping strategy to one argument position of one
//! resource: "shape calls to `create_order` by their first argument, 100
//! per second each". Rules are immutable once installed; updates install a
//! new rule that replaces the old one by id.
//!
//! # Anatomy of a Rule
//!
//! | Field | Applies to | Meaning |
//! |-------|-----------|---------|
//! | `resource`, `param_index` | all | what is shaped: which call, which argument |
//! | `metric_type` | all | QPS (rate) or Concurrency (in-flight count) |
//! | `control_strategy` | QPS | Reject (token bucket) or Throttling (pacing) |
//! | `threshold`, `duration_in_sec` | all | the budget and its window |
//! | `burst_count` | Reject | extra bucket headroom above the threshold |
//! | `max_queueing_time_ms` | Throttling | how long a call may be told to wait |
//! | `specific_items` | all | per-value threshold overrides |
//! | `params_max_capacity` | all | parameter cache sizing hint |
//!
//! # Validation
//!
//! [`Rule::validate`] runs at install time: an empty resource, a
//! non-positive threshold, or any negative numeric field rejects the rule
//! and leaves the previously installed set untouched. `duration_in_sec`
//! of zero is accepted (it only shrinks the default cache sizing) and
//! divides as one second everywhere else.
//!
//! # Examples
//!
//! A throttling rule with a VIP override:
//!
//! ```
//! use paramflow::{ControlStrategy, MetricType, ParamValue, Rule};
//!
//! let mut rule = Rule {
//!     id: "search-per-tenant".into(),
//!     resource: "search".into(),
//!     metric_type: MetricType::Qps,
//!     control_strategy: ControlStrategy::Throttling,
//!     param_index: 0,
//!     threshold: 20,
//!     duration_in_sec: 1,
//!     max_queueing_time_ms: 500,
//!     ..Rule::default()
//! };
//! rule.specific_items.insert(ParamValue::from("tenant-vip"), 200);
//! assert!(rule.validate().is_ok());
//! ```

use crate::error::ConfigError;
use crate::hash::ParamValue;
use alloc::string::String;

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;
#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

/// What the shaper counts per parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    /// In-flight call count.
    Concurrency,
    /// Admitted batch count per statistic window.
    Qps,
}

/// What happens when the metric exceeds the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlStrategy {
    /// Reject outright (token bucket for QPS).
    Reject,
    /// Queue up to a bound and pace admissions (leaky bucket; QPS only).
    Throttling,
}

/// Immutable configuration for one shaper.
///
/// Build with struct-update syntax over [`Rule::default`]:
///
/// ```
/// use paramflow::{ControlStrategy, MetricType, Rule};
///
/// let rule = Rule {
///     id: "orders-by-user".into(),
///     resource: "create_order".into(),
///     metric_type: MetricType::Qps,
///     control_strategy: ControlStrategy::Reject,
///     param_index: 0,
///     threshold: 100,
///     duration_in_sec: 1,
///     ..Rule::default()
/// };
/// assert!(rule.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Unique id; blocked verdicts carry it.
    pub id: String,
    /// The protected resource name.
    pub resource: String,
    pub metric_type: MetricType,
    pub control_strategy: ControlStrategy,
    /// Which argument position to shape.
    pub param_index: usize,
    /// Tokens per window, or the concurrent-call limit.
    pub threshold: i64,
    /// Statistic window length in seconds. Zero is accepted (it only
    /// shrinks the cache sizing) and treated as one second in divisions.
    pub duration_in_sec: i64,
    /// Extra tokens above the threshold (reject strategy only).
    pub burst_count: i64,
    /// Queueing budget (throttling strategy only).
    pub max_queueing_time_ms: i64,
    /// Per-value threshold overrides.
    pub specific_items: HashMap<ParamValue, i64>,
    /// Parameter cache capacity hint; non-positive picks the default
    /// sizing from the window length.
    pub params_max_capacity: i64,
}

impl Default for Rule {
    fn default() -> Self {
        Rule {
            id: String::new(),
            resource: String::new(),
            metric_type: MetricType::Qps,
            control_strategy: ControlStrategy::Reject,
            param_index: 0,
            threshold: 0,
            duration_in_sec: 1,
            burst_count: 0,
            max_queueing_time_ms: 0,
            specific_items: HashMap::default(),
            params_max_capacity: 0,
        }
    }
}

impl Rule {
    /// Checks the rule for installation. Failing rules leave the previously
    /// installed set untouched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resource.is_empty() {
            return Err(ConfigError::EmptyResource);
        }
        if self.threshold <= 0 {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if self.duration_in_sec < 0 {
            return Err(ConfigError::InvalidDuration(self.duration_in_sec));
        }
        if self.burst_count < 0 {
            return Err(ConfigError::InvalidBurstCount(self.burst_count));
        }
        if self.max_queueing_time_ms < 0 {
            return Err(ConfigError::InvalidQueueingTime(self.max_queueing_time_ms));
        }
        Ok(())
    }

    /// The threshold in force for `arg`: its specific override, or the
    /// rule-wide value.
    pub(crate) fn effective_threshold(&self, arg: &ParamValue) -> i64 {
        self.specific_items
            .get(arg)
            .copied()
            .unwrap_or(self.threshold)
    }

    /// Statistic window in milliseconds, never zero.
    pub(crate) fn duration_ms(&self) -> i64 {
        self.duration_in_sec.max(1) * 1000
    }

    /// Whether a metric built for `self` can back a shaper for `other`.
    /// Threshold-only changes (including `specific_items`) keep their
    /// counter state across installs.
    pub(crate) fn shares_metric_with(&self, other: &Rule) -> bool {
        self.resource == other.resource
            && self.metric_type == other.metric_type
            && self.control_strategy == other.control_strategy
            && self.param_index == other.param_index
            && self.duration_in_sec == other.duration_in_sec
            && self.params_max_capacity == other.params_max_capacity
    }
}
