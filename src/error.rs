//! Install-time configuration errors.
//!
//! Only rule installation can fail; the checking hot path never surfaces
//! errors to callers (it fails open instead). The split is deliberate: a
//! bad rule is an operator mistake worth rejecting loudly at the control
//! plane, while a request in flight must always get a verdict.
//!
//! # Examples
//!
//! A rejected rule reports what was wrong and leaves the previously
//! installed set running:
//!
//! ```
//! use paramflow::{ConfigError, Router, Rule};
//!
//! let router = Router::new();
//! let err = router
//!     .install(Rule {
//!         id: "bad".into(),
//!         resource: "api".into(),
//!         threshold: -5,
//!         ..Rule::default()
//!     })
//!     .unwrap_err();
//! assert_eq!(err, ConfigError::InvalidThreshold(-5));
//! assert_eq!(err.to_string(), "rule threshold must be positive, got -5");
//! ```

use core::fmt;

/// Why a rule was rejected at install time. The previously installed rule
/// set stays active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The rule names no resource.
    EmptyResource,
    /// `threshold` must be positive.
    InvalidThreshold(i64),
    /// `duration_in_sec` must not be negative.
    InvalidDuration(i64),
    /// `burst_count` must not be negative.
    InvalidBurstCount(i64),
    /// `max_queueing_time_ms` must not be negative.
    InvalidQueueingTime(i64),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyResource => write!(f, "rule resource must not be empty"),
            ConfigError::InvalidThreshold(v) => {
                write!(f, "rule threshold must be positive, got {v}")
            }
            ConfigError::InvalidDuration(v) => {
                write!(f, "rule duration must not be negative, got {v}s")
            }
            ConfigError::InvalidBurstCount(v) => {
                write!(f, "rule burst count must not be negative, got {v}")
            }
            ConfigError::InvalidQueueingTime(v) => {
                write!(f, "rule max queueing time must not be negative, got {v}ms")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}
