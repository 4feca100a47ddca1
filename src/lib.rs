#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## Checking calls
//!
//! ```
//! use paramflow::{ControlStrategy, MetricType, ParamValue, Router, Rule, Verdict};
//!
//! let router = Router::new();
//! router.install(Rule {
//!     id: "orders-per-user".into(),
//!     resource: "create_order".into(),
//!     metric_type: MetricType::Qps,
//!     control_strategy: ControlStrategy::Reject,
//!     param_index: 0,
//!     threshold: 2,
//!     duration_in_sec: 1,
//!     ..Rule::default()
//! }).unwrap();
//!
//! let args = [ParamValue::from("user-42")];
//! assert_eq!(router.check("create_order", &args, 1), Verdict::Pass);
//! assert_eq!(router.check("create_order", &args, 1), Verdict::Pass);
//! assert!(router.check("create_order", &args, 1).is_blocked());
//!
//! // A different parameter value has its own budget.
//! let other = [ParamValue::from("user-7")];
//! assert_eq!(router.check("create_order", &other, 1), Verdict::Pass);
//! ```
//!
//! ## Strategy selection
//!
//! | Strategy | Metric | Behavior over the limit |
//! |----------|--------|-------------------------|
//! | `Reject` | QPS | `Blocked` until the token bucket refills |
//! | `Throttling` | QPS | `Wait(ms)` up to the queueing budget, then `Blocked` |
//! | any | `Concurrency` | `Blocked` until a paired `release` |
//!
//! ## Waiting and releasing
//!
//! A `Wait { ms }` verdict never sleeps inside the shaper: the caller
//! decides whether to honor it. Concurrency rules expect a
//! [`Router::release`] for every admitted call:
//!
//! ```
//! use paramflow::{ControlStrategy, MetricType, ParamValue, Router, Rule};
//!
//! let router = Router::new();
//! router.install(Rule {
//!     id: "render-jobs".into(),
//!     resource: "render".into(),
//!     metric_type: MetricType::Concurrency,
//!     control_strategy: ControlStrategy::Reject,
//!     threshold: 8,
//!     ..Rule::default()
//! }).unwrap();
//!
//! let args = [ParamValue::from("tenant-1")];
//! if router.check("render", &args, 1).is_pass() {
//!     // ... do the work ...
//!     router.release("render", &args);
//! }
//! ```
//!
//! ## Testing with a manual clock
//!
//! ```
//! use std::sync::Arc;
//! use paramflow::{ManualClock, Router};
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let router = Router::with_clock(clock.clone());
//! clock.advance(1_000); // one statistic window later
//! ```

#![no_std]

extern crate alloc;

#[cfg(any(feature = "std", not(feature = "hashbrown"), test))]
extern crate std;

/// Stable 64-bit hashing of parameter values and the [`ParamValue`] type.
pub mod hash;

/// Doubly linked list with in-place editing, the storage substrate for the
/// admission window and the segmented LRU.
///
/// Internal infrastructure: raw-pointer operations with invariants upheld
/// by the cache layer.
pub(crate) mod list;

/// Cache entry, counter cell, and shared index types.
pub(crate) mod entry;

/// Admission window LRU.
pub(crate) mod lru;

/// Segmented LRU main space.
pub(crate) mod slru;

/// 4-bit count-min sketch for frequency estimation.
pub(crate) mod sketch;

/// Doorkeeper bloom filter in front of the sketch.
pub(crate) mod doorkeeper;

/// The W-TinyLFU cache map holding per-parameter counter cells.
pub mod cache;

/// Cache sizing configuration and defaults.
pub mod config;

/// Injectable millisecond clock.
pub mod clock;

/// Install-time configuration errors.
pub mod error;

/// Cache statistics counters.
pub mod metrics;

/// Shaping rules and their validation.
pub mod rule;

/// Per-rule traffic shapers: reject, throttling, concurrency.
pub mod shaper;

/// Shaping verdicts and their combination law.
pub mod verdict;

/// Rule table and per-call dispatch.
pub mod router;

// Re-export the embedding surface
pub use cache::ParamsCache;
pub use clock::Clock;
#[cfg(feature = "std")]
pub use clock::SystemClock;
pub use clock::ManualClock;
pub use config::CacheConfig;
pub use entry::{CounterCell, CounterRef};
pub use error::ConfigError;
pub use hash::{ParamValue, StableHash};
pub use metrics::CacheStats;
pub use router::Router;
pub use rule::{ControlStrategy, MetricType, Rule};
pub use shaper::{ParamsMetric, TrafficShaper};
pub use verdict::{BlockReason, Verdict};
