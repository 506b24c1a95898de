//! Circuit breaker implementation for delivery dependencies.
//!
//! The breaker stops calling a failing dependency until it has had time to
//! recover.
//!
//! # States
//!
//! - **Closed**: Normal operation. Failures accumulate until
//!   `failure_threshold` is reached. Successes do not reset the count.
//! - **Open**: Calls are rejected until `recovery_timeout` has elapsed since
//!   the last failure.
//! - **`HalfOpen`**: A limited number of probes are let through.
//!   `success_threshold` successes close the circuit, one failure reopens it.
//!
//! The Open to `HalfOpen` transition is lazy: it happens on the next status
//! check after the timeout, there is no timer.
//!
//! # Example
//!
//! ```
//! use pulse_resilience::{CircuitBreaker, CircuitBreakerConfig};
//!
//! let breaker = CircuitBreaker::new("webhook", CircuitBreakerConfig::default().with_failure_threshold(3));
//!
//! for _ in 0..3 {
//!     breaker.record_failure();
//! }
//!
//! assert!(breaker.is_open());
//! assert!(!breaker.allow_request());
//! ```

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pulse_telemetry::metrics::PulseMetrics;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - requests pass through.
    #[default]
    Closed,
    /// Blocking requests - dependency is considered down.
    Open,
    /// Testing recovery - limited requests allowed.
    HalfOpen,
}

impl CircuitState {
    /// Returns the state as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Cumulative failures in the closed state before opening.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Successes in the half-open state required to close.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Time since the last failure before probing again.
    #[serde(default = "default_recovery_timeout", with = "humantime_serde", alias = "timeout")]
    pub recovery_timeout: Duration,
    /// Maximum probes let through while half-open.
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    1
}

fn default_recovery_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_half_open_max_calls() -> u32 {
    3
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            recovery_timeout: default_recovery_timeout(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the success threshold for recovery.
    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Sets the recovery timeout.
    #[must_use]
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Sets the half-open probe limit.
    #[must_use]
    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }
}

#[derive(Debug, Default)]
struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    half_open_calls: u32,
    last_failure_reason: Option<String>,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
}

/// Point-in-time view of a breaker, for the administrative surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    /// Dependency name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Failures counted towards opening.
    pub failure_count: u32,
    /// Successes counted towards closing.
    pub success_count: u32,
    /// Configured failure threshold.
    pub failure_threshold: u32,
    /// Configured success threshold.
    pub success_threshold: u32,
    /// Configured recovery timeout in milliseconds.
    pub recovery_timeout_ms: u64,
    /// Wall-clock time of the last recorded failure.
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Reason given with the last failure.
    pub last_failure_reason: Option<String>,
    /// Calls that were let through.
    pub total_calls: u64,
    /// Successes recorded over the breaker's lifetime.
    pub total_successes: u64,
    /// Failures recorded over the breaker's lifetime.
    pub total_failures: u64,
    /// Calls rejected while open.
    pub total_rejections: u64,
}

/// Circuit breaker guarding one downstream dependency.
///
/// All transitions happen under a single lock, so concurrent reports are
/// linearizable.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitBreakerState>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker with the given name and configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(CircuitBreakerState::default()),
        }
    }

    /// Creates a new circuit breaker with default configuration.
    #[must_use]
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Returns the dependency name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current state, applying the lazy Open to `HalfOpen`
    /// transition first.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.maybe_transition_to_half_open();
        self.state.read().state
    }

    /// Returns true while the breaker rejects calls.
    ///
    /// After `recovery_timeout` this flips the breaker to `HalfOpen` and
    /// returns false.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Returns true if a call should be let through, reserving a probe slot
    /// when half-open. Rejections are counted.
    #[must_use]
    pub fn allow_request(&self) -> bool {
        self.maybe_transition_to_half_open();

        let mut state = self.state.write();
        let allowed = match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if state.half_open_calls < self.config.half_open_max_calls {
                    state.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        };

        if allowed {
            state.total_calls += 1;
        } else {
            state.total_rejections += 1;
            drop(state);
            PulseMetrics::breaker_rejected(&self.name);
        }
        allowed
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.write();
        state.total_successes += 1;

        match state.state {
            CircuitState::Closed | CircuitState::Open => {
                // Closed keeps its failure count: the threshold is cumulative
                // until an explicit reset.
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                debug!(
                    service = %self.name,
                    success_count = state.success_count,
                    threshold = self.config.success_threshold,
                    "Circuit breaker success in half-open state"
                );

                if state.success_count >= self.config.success_threshold {
                    info!(service = %self.name, "Circuit breaker closed - dependency recovered");
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.half_open_calls = 0;
                    state.last_failure_reason = None;
                    drop(state);
                    PulseMetrics::breaker_transition(&self.name, CircuitState::Closed.as_str());
                }
            }
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        self.record_failure_with_reason(None);
    }

    /// Records a failed call with a reason.
    pub fn record_failure_with_reason(&self, reason: Option<String>) {
        let mut state = self.state.write();
        state.total_failures += 1;
        let mut opened = false;

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                state.last_failure = Some(Instant::now());
                state.last_failure_at = Some(Utc::now());
                state.last_failure_reason.clone_from(&reason);
                debug!(
                    service = %self.name,
                    failure_count = state.failure_count,
                    threshold = self.config.failure_threshold,
                    reason = ?reason,
                    "Circuit breaker failure recorded"
                );

                if state.failure_count >= self.config.failure_threshold {
                    warn!(
                        service = %self.name,
                        failures = state.failure_count,
                        reason = ?state.last_failure_reason,
                        "Circuit breaker opened"
                    );
                    state.state = CircuitState::Open;
                    opened = true;
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    service = %self.name,
                    reason = ?reason,
                    "Circuit breaker reopened from half-open state"
                );
                state.state = CircuitState::Open;
                state.last_failure = Some(Instant::now());
                state.last_failure_at = Some(Utc::now());
                state.success_count = 0;
                state.half_open_calls = 0;
                state.last_failure_reason = reason;
                opened = true;
            }
            CircuitState::Open => {
                state.last_failure_reason = reason;
            }
        }

        drop(state);
        if opened {
            PulseMetrics::breaker_transition(&self.name, CircuitState::Open.as_str());
        }
    }

    /// Manually resets the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut state = self.state.write();
        info!(service = %self.name, "Circuit breaker manually reset");
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        state.half_open_calls = 0;
        state.last_failure = None;
        state.last_failure_at = None;
        state.last_failure_reason = None;
    }

    /// Returns the current failure count.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.state.read().failure_count
    }

    /// Returns the current half-open success count.
    #[must_use]
    pub fn success_count(&self) -> u32 {
        self.state.read().success_count
    }

    /// Returns the last failure reason, if any.
    #[must_use]
    pub fn last_failure_reason(&self) -> Option<String> {
        self.state.read().last_failure_reason.clone()
    }

    /// Returns the time remaining until the circuit transitions to half-open.
    #[must_use]
    pub fn time_until_half_open(&self) -> Option<Duration> {
        let state = self.state.read();
        if state.state != CircuitState::Open {
            return None;
        }
        state
            .last_failure
            .map(|at| self.config.recovery_timeout.saturating_sub(at.elapsed()))
    }

    /// Returns a serializable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        self.maybe_transition_to_half_open();
        let state = self.state.read();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            recovery_timeout_ms: u64::try_from(self.config.recovery_timeout.as_millis())
                .unwrap_or(u64::MAX),
            last_failure_time: state.last_failure_at,
            last_failure_reason: state.last_failure_reason.clone(),
            total_calls: state.total_calls,
            total_successes: state.total_successes,
            total_failures: state.total_failures,
            total_rejections: state.total_rejections,
        }
    }

    fn maybe_transition_to_half_open(&self) {
        let mut state = self.state.write();
        if state.state != CircuitState::Open {
            return;
        }

        if let Some(last_failure) = state.last_failure
            && last_failure.elapsed() >= self.config.recovery_timeout
        {
            info!(
                service = %self.name,
                "Circuit breaker transitioning to half-open"
            );
            state.state = CircuitState::HalfOpen;
            state.success_count = 0;
            state.half_open_calls = 0;
            drop(state);
            PulseMetrics::breaker_transition(&self.name, CircuitState::HalfOpen.as_str());
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread::sleep;

    fn breaker(failures: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_threshold(failures)
                .with_recovery_timeout(recovery),
        )
    }

    #[test]
    fn test_circuit_breaker_starts_closed() {
        let breaker = CircuitBreaker::with_defaults("test");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(!breaker.is_open());
        assert!(breaker.allow_request());
    }

    #[test]
    fn test_three_failures_open_then_probe_closes() {
        let breaker = breaker(3, Duration::from_millis(30));

        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(!breaker.allow_request());

        sleep(Duration::from_millis(40));

        assert!(!breaker.is_open());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.allow_request());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_success_in_closed_does_not_reset_failures() {
        let breaker = breaker(3, Duration::from_secs(60));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 2);

        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn test_reset_clears_failures() {
        let breaker = breaker(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.reset();
        assert_eq!(breaker.failure_count(), 0);
        breaker.record_failure();
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_half_open_reopens_on_failure_and_restamps() {
        let breaker = breaker(2, Duration::from_millis(20));
        breaker.record_failure();
        breaker.record_failure();

        sleep(Duration::from_millis(30));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_failure_with_reason(Some("still down".to_string()));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.last_failure_reason().as_deref(), Some("still down"));
        let remaining = breaker.time_until_half_open().unwrap();
        assert!(remaining > Duration::from_millis(5));
    }

    #[test]
    fn test_half_open_requires_success_threshold() {
        let breaker = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_success_threshold(2)
                .with_recovery_timeout(Duration::from_millis(10)),
        );
        breaker.record_failure();
        sleep(Duration::from_millis(15));

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_limits_probes() {
        let breaker = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_recovery_timeout(Duration::from_millis(10))
                .with_half_open_max_calls(2),
        );
        breaker.record_failure();
        sleep(Duration::from_millis(15));

        assert!(breaker.allow_request());
        assert!(breaker.allow_request());
        assert!(!breaker.allow_request());
        assert_eq!(breaker.snapshot().total_rejections, 1);
    }

    #[test]
    fn test_snapshot_reports_counters() {
        let breaker = breaker(5, Duration::from_secs(60));
        assert!(breaker.allow_request());
        breaker.record_success();
        breaker.record_failure_with_reason(Some("timeout".to_string()));

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.total_calls, 1);
        assert_eq!(snapshot.total_successes, 1);
        assert_eq!(snapshot.total_failures, 1);
        assert!(snapshot.last_failure_time.is_some());
        assert_eq!(snapshot.recovery_timeout_ms, 60_000);
    }

    #[test]
    fn test_config_accepts_humantime() {
        let config: CircuitBreakerConfig =
            serde_yaml::from_str("failure_threshold: 3\nrecovery_timeout: 2m\n").unwrap();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.recovery_timeout, Duration::from_secs(120));
        assert_eq!(config.success_threshold, 1);
    }

    proptest! {
        #[test]
        fn prop_threshold_failures_open(threshold in 1u32..50) {
            let breaker = breaker(threshold, Duration::from_secs(60));
            for _ in 0..threshold {
                breaker.record_failure();
            }
            prop_assert!(breaker.is_open());
        }

        #[test]
        fn prop_fewer_failures_stay_closed(threshold in 2u32..50, successes in 0u32..10) {
            let breaker = breaker(threshold, Duration::from_secs(60));
            for _ in 0..threshold - 1 {
                breaker.record_failure();
            }
            for _ in 0..successes {
                breaker.record_success();
            }
            prop_assert!(!breaker.is_open());
        }
    }
}
