//! # Pulse Resilience
//!
//! Failure isolation for downstream dependencies:
//!
//! - [`CircuitBreaker`]: lazy CLOSED/OPEN/HALF_OPEN state machine with a
//!   cumulative failure threshold
//! - [`CircuitBreakerRegistry`]: one breaker per dependency name, created on
//!   first use from per-dependency defaults
//! - [`ExponentialBackoff`]: capped `base * 2^attempts` delays
//! - [`call_guarded`]: run a future under a breaker with a deadline;
//!   [`call_guarded_with`] also lets the caller fail a degraded success
//!
//! # Example
//!
//! ```
//! use pulse_resilience::{BreakerRegistryConfig, CircuitBreakerRegistry};
//!
//! let registry = CircuitBreakerRegistry::new(BreakerRegistryConfig::default());
//! let webhook = registry.get("webhook");
//! assert!(webhook.allow_request());
//! webhook.record_success();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod backoff;
pub mod circuit_breaker;
pub mod guard;
pub mod registry;

pub use backoff::ExponentialBackoff;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use guard::{CallVerdict, GuardError, call_guarded, call_guarded_with};
pub use registry::{
    BreakerRegistryConfig, CircuitBreakerRegistry, RegistryStats, STORAGE_DEPENDENCY,
    known_dependency_defaults,
};
