//! Running a future under a circuit breaker with a deadline.

use crate::circuit_breaker::CircuitBreaker;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Outcome of a guarded call that did not succeed.
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// The breaker rejected the call; the future was never polled.
    #[error("circuit open for '{dependency}'")]
    Rejected {
        /// Dependency name.
        dependency: String,
    },

    /// The call exceeded its deadline.
    #[error("call to '{dependency}' timed out after {timeout:?}")]
    TimedOut {
        /// Dependency name.
        dependency: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// The call itself failed.
    #[error(transparent)]
    Inner(E),
}

/// How a finished call is recorded against its breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallVerdict {
    /// Record a success.
    Success,
    /// Record a failure with the given reason.
    Failure(String),
    /// Record nothing.
    Ignore,
}

/// Runs `call` if `breaker` allows it, bounded by `timeout`.
///
/// Successes and timeouts are always recorded. Inner errors are recorded as
/// failures only when `counts_as_failure` returns true, so callers can keep
/// caller-side mistakes from tripping the breaker.
///
/// # Errors
///
/// Returns [`GuardError`] when the call was rejected, timed out or failed.
pub async fn call_guarded<T, E, F>(
    breaker: &CircuitBreaker,
    timeout: Duration,
    call: F,
    counts_as_failure: impl FnOnce(&E) -> bool,
) -> Result<T, GuardError<E>>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    call_guarded_with(breaker, timeout, call, |result| match result {
        Ok(_) => CallVerdict::Success,
        Err(e) if counts_as_failure(e) => CallVerdict::Failure(e.to_string()),
        Err(_) => CallVerdict::Ignore,
    })
    .await
}

/// Like [`call_guarded`], but `judge` decides how every completed call is
/// recorded, including successful ones that still degraded.
///
/// A call that exceeds `timeout` is always recorded as a failure.
///
/// # Errors
///
/// Returns [`GuardError`] when the call was rejected, timed out or failed.
pub async fn call_guarded_with<T, E, F>(
    breaker: &CircuitBreaker,
    timeout: Duration,
    call: F,
    judge: impl FnOnce(&Result<T, E>) -> CallVerdict,
) -> Result<T, GuardError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    if !breaker.allow_request() {
        return Err(GuardError::Rejected {
            dependency: breaker.name().to_string(),
        });
    }

    match tokio::time::timeout(timeout, call).await {
        Ok(result) => {
            match judge(&result) {
                CallVerdict::Success => breaker.record_success(),
                CallVerdict::Failure(reason) => breaker.record_failure_with_reason(Some(reason)),
                CallVerdict::Ignore => {}
            }
            result.map_err(GuardError::Inner)
        }
        Err(_) => {
            breaker.record_failure_with_reason(Some(format!("timed out after {timeout:?}")));
            Err(GuardError::TimedOut {
                dependency: breaker.name().to_string(),
                timeout,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "dep",
            CircuitBreakerConfig::default().with_failure_threshold(2),
        )
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let breaker = breaker();
        let result: Result<u32, GuardError<String>> =
            call_guarded(&breaker, Duration::from_secs(1), async { Ok(7) }, |_| true).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(breaker.snapshot().total_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_open_breaker() {
        let breaker = breaker();
        for _ in 0..2 {
            let result: Result<(), GuardError<String>> = call_guarded(
                &breaker,
                Duration::from_millis(50),
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                },
                |_| true,
            )
            .await;
            assert!(matches!(result, Err(GuardError::TimedOut { .. })));
        }
        assert!(breaker.is_open());

        let rejected: Result<(), GuardError<String>> =
            call_guarded(&breaker, Duration::from_secs(1), async { Ok(()) }, |_| true).await;
        assert!(matches!(rejected, Err(GuardError::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_ignored_errors_do_not_count() {
        let breaker = breaker();
        for _ in 0..5 {
            let result: Result<(), GuardError<String>> = call_guarded(
                &breaker,
                Duration::from_secs(1),
                async { Err("bad input".to_string()) },
                |_| false,
            )
            .await;
            assert!(matches!(result, Err(GuardError::Inner(_))));
        }
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_degraded_success_counts_as_failure() {
        let breaker = breaker();
        for _ in 0..2 {
            let result: Result<u32, GuardError<String>> = call_guarded_with(
                &breaker,
                Duration::from_secs(1),
                async { Ok(3) },
                |r| match r {
                    Ok(n) if *n > 0 => CallVerdict::Failure(format!("{n} sends timed out")),
                    _ => CallVerdict::Success,
                },
            )
            .await;
            assert_eq!(result.unwrap(), 3);
        }
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.total_successes, 0);
        assert_eq!(snapshot.total_failures, 2);
        assert_eq!(snapshot.last_failure_reason.as_deref(), Some("3 sends timed out"));
        assert!(breaker.is_open());
    }
}
