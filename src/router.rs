//! Rule table and per-call dispatch.
//!
//! The router is the embedding surface: install rules, check calls,
//! release concurrency slots. It maps each resource to the shapers of its
//! installed rules.
//!
//! # Check Flow
//!
//! ```text
//!   check("res", args, batch)
//!       │  read lock on the rule table
//!       ▼
//!   for each rule of "res":
//!       arg = args[rule.param_index]     (absent ⇒ that rule passes)
//!       verdict = shaper.check(arg, batch)   (panic ⇒ Pass, logged)
//!       fold: Blocked > Wait(max) > Pass
//! ```
//!
//! # Rule Lifecycle
//!
//! Installation validates first and swaps the table under a write lock, so
//! a rejected rule leaves the running set untouched. Replacing a rule (by
//! id) with one that differs only in thresholds keeps the old rule's
//! counter caches, so tuning a limit does not grant every parameter a
//! fresh budget. Metric reuse is strictly per-id: two independent rules
//! never share counters, however similar their shape.
//!
//! # Fail-Open
//!
//! A panic inside a shaper is caught (under the `std` feature) and
//! converted to `Pass` with a warning. The shaper protects the service;
//! it must never become the thing that takes it down.
//!
//! # Examples
//!
//! ```
//! use paramflow::{ControlStrategy, MetricType, ParamValue, Router, Rule, Verdict};
//!
//! let router = Router::new();
//! router.install(Rule {
//!     id: "orders".into(),
//!     resource: "create_order".into(),
//!     metric_type: MetricType::Qps,
//!     control_strategy: ControlStrategy::Reject,
//!     param_index: 0,
//!     threshold: 2,
//!     duration_in_sec: 1,
//!     ..Rule::default()
//! }).unwrap();
//!
//! let args = [ParamValue::from("user-1")];
//! assert_eq!(router.check("create_order", &args, 1), Verdict::Pass);
//! assert_eq!(router.check("create_order", &args, 1), Verdict::Pass);
//! assert!(router.check("create_order", &args, 1).is_blocked());
//!
//! // Unknown resources and absent argument positions pass through.
//! assert!(router.check("unknown", &args, 1).is_pass());
//! ```

use crate::clock::Clock;
#[cfg(feature = "std")]
use crate::clock::SystemClock;
use crate::error::ConfigError;
use crate::hash::ParamValue;
use crate::rule::Rule;
use crate::shaper::{self, TrafficShaper};
use crate::verdict::Verdict;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use parking_lot::RwLock;

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;
#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

/// Entry point for embedders: install rules, check calls, release
/// concurrency slots.
pub struct Router {
    table: RwLock<HashMap<String, Vec<Arc<dyn TrafficShaper>>>>,
    clock: Arc<dyn Clock>,
}

impl Router {
    /// A router on the system clock.
    #[cfg(feature = "std")]
    pub fn new() -> Self {
        Router::with_clock(Arc::new(SystemClock))
    }

    /// A router on an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Router {
            table: RwLock::new(HashMap::default()),
            clock,
        }
    }

    /// Installs `rule`, replacing any rule with the same id on the same
    /// resource. A rule that differs only in thresholds keeps the previous
    /// rule's counter caches, so in-flight state survives tuning.
    ///
    /// # Examples
    ///
    /// ```
    /// use paramflow::{ConfigError, Router, Rule};
    ///
    /// let router = Router::new();
    /// let mut rule = Rule {
    ///     id: "r1".into(),
    ///     resource: "api".into(),
    ///     threshold: 10,
    ///     ..Rule::default()
    /// };
    /// router.install(rule.clone()).unwrap();
    ///
    /// // Tuning the threshold replaces the rule, keeping its counters.
    /// rule.threshold = 50;
    /// router.install(rule).unwrap();
    /// assert_eq!(router.rules("api").len(), 1);
    /// assert_eq!(router.rules("api")[0].threshold, 50);
    ///
    /// // Invalid rules are rejected and change nothing.
    /// let err = router.install(Rule { resource: "api".into(), ..Rule::default() });
    /// assert_eq!(err, Err(ConfigError::InvalidThreshold(0)));
    /// ```
    pub fn install(&self, rule: Rule) -> Result<(), ConfigError> {
        rule.validate()?;

        let mut table = self.table.write();
        let shapers = table.entry(rule.resource.clone()).or_default();

        if shapers.iter().any(|s| *s.rule() == rule) {
            return Ok(());
        }

        // Reuse is scoped to the shaper being replaced: two independent
        // rules that merely share a counter shape must never alias one
        // metric, or they would drain each other's buckets.
        let reused = shapers
            .iter()
            .find(|s| s.rule().id == rule.id)
            .filter(|s| s.rule().shares_metric_with(&rule))
            .map(|s| s.metric().clone());
        shapers.retain(|s| s.rule().id != rule.id);
        shapers.push(shaper::build(rule, reused, self.clock.clone()));
        Ok(())
    }

    /// Removes one rule. Returns whether anything was removed.
    pub fn uninstall(&self, resource: &str, rule_id: &str) -> bool {
        let mut table = self.table.write();
        let Some(shapers) = table.get_mut(resource) else {
            return false;
        };
        let before = shapers.len();
        shapers.retain(|s| s.rule().id != rule_id);
        let removed = shapers.len() != before;
        if shapers.is_empty() {
            table.remove(resource);
        }
        removed
    }

    /// The rules currently installed for `resource`.
    pub fn rules(&self, resource: &str) -> Vec<Rule> {
        self.table
            .read()
            .get(resource)
            .map(|shapers| shapers.iter().map(|s| s.rule().clone()).collect())
            .unwrap_or_default()
    }

    /// Checks a call against every rule of `resource`. Rules whose argument
    /// position is absent pass through; verdicts combine with `Blocked`
    /// dominating `Wait` dominating `Pass`, longest wait winning.
    pub fn check(&self, resource: &str, args: &[ParamValue], batch_count: i64) -> Verdict {
        let table = self.table.read();
        let Some(shapers) = table.get(resource) else {
            return Verdict::Pass;
        };

        let mut verdict = Verdict::Pass;
        for shaper in shapers {
            let Some(arg) = args.get(shaper.rule().param_index) else {
                continue;
            };
            verdict = verdict.combine(self.guarded_check(shaper, arg, batch_count));
        }
        verdict
    }

    /// Completion hook for concurrency rules: decrements the in-flight
    /// count of every matching rule's parameter.
    ///
    /// Pair one `release` with every *admitted* check of a concurrency
    /// rule; QPS rules ignore it. Releasing an unknown parameter (or one
    /// whose counter was evicted in between) is a no-op.
    ///
    /// # Examples
    ///
    /// ```
    /// use paramflow::{ControlStrategy, MetricType, ParamValue, Router, Rule};
    ///
    /// let router = Router::new();
    /// router.install(Rule {
    ///     id: "jobs".into(),
    ///     resource: "render".into(),
    ///     metric_type: MetricType::Concurrency,
    ///     threshold: 1,
    ///     ..Rule::default()
    /// }).unwrap();
    ///
    /// let args = [ParamValue::from("tenant-1")];
    /// assert!(router.check("render", &args, 1).is_pass());
    /// assert!(router.check("render", &args, 1).is_blocked());
    ///
    /// router.release("render", &args);     // the slot frees up
    /// assert!(router.check("render", &args, 1).is_pass());
    /// ```
    pub fn release(&self, resource: &str, args: &[ParamValue]) {
        let table = self.table.read();
        let Some(shapers) = table.get(resource) else {
            return;
        };
        for shaper in shapers {
            if let Some(arg) = args.get(shaper.rule().param_index) {
                shaper.release(arg);
            }
        }
    }

    /// Runs one shaper, failing open on panic: the shaper must never take
    /// down the caller.
    fn guarded_check(
        &self,
        shaper: &Arc<dyn TrafficShaper>,
        arg: &ParamValue,
        batch_count: i64,
    ) -> Verdict {
        #[cfg(feature = "std")]
        {
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                shaper.check(arg, batch_count)
            })) {
                Ok(verdict) => verdict,
                Err(_) => {
                    log::warn!(
                        "shaper for rule {} panicked, failing open",
                        shaper.rule().id
                    );
                    Verdict::Pass
                }
            }
        }
        #[cfg(not(feature = "std"))]
        {
            shaper.check(arg, batch_count)
        }
    }
}

#[cfg(feature = "std")]
impl Default for Router {
    fn default() -> Self {
        Router::new()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.read();
        f.debug_struct("Router")
            .field("resources", &table.len())
            .finish()
    }
}
