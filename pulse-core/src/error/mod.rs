//! Error types and handling framework.
//!
//! The hierarchy mirrors the failure taxonomy of the delivery layer:
//! - `PulseError` - Top-level error type
//!   - `ValidationError` - malformed input rejected at the API boundary
//!   - `CapacityError` - bounded resources that were full
//!   - `DeliveryError` - failures of a single delivery method
//!   - `ConfigError` - configuration loading and validation
//!   - `StorageError` - the optional persistence collaborator
//!
//! Nothing in this hierarchy is meant to terminate the hosting process; every
//! variant degrades a single operation.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod capacity;
mod config;
mod delivery;
mod storage;
mod validation;

pub use capacity::CapacityError;
pub use config::ConfigError;
pub use delivery::DeliveryError;
pub use storage::StorageError;
pub use validation::ValidationError;

/// Error severity levels for categorizing errors.
///
/// # Examples
///
/// ```
/// use pulse_core::error::ErrorSeverity;
///
/// let severity = ErrorSeverity::Recoverable;
/// assert!(severity.is_recoverable());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// The operation cannot proceed and retrying will not help.
    Fatal,
    /// The operation failed but may succeed if retried.
    #[default]
    Recoverable,
    /// Degraded but handled condition.
    Warning,
}

impl ErrorSeverity {
    /// Returns true if this error is recoverable (not fatal).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Fatal)
    }

    /// Returns the severity as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fatal => "FATAL",
            Self::Recoverable => "RECOVERABLE",
            Self::Warning => "WARNING",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for Pulse.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PulseError {
    /// Rejected input.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Bounded resource exhausted.
    #[error("{0}")]
    Capacity(#[from] CapacityError),

    /// Delivery failure.
    #[error("{0}")]
    Delivery(#[from] DeliveryError),

    /// Configuration error.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Persistence error.
    #[error("{0}")]
    Storage(#[from] StorageError),
}

impl PulseError {
    /// Returns the severity level of this error.
    #[must_use]
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Validation(_) | Self::Config(_) => ErrorSeverity::Fatal,
            Self::Capacity(e) if e.is_retryable() => ErrorSeverity::Recoverable,
            Self::Capacity(_) => ErrorSeverity::Fatal,
            Self::Delivery(_) | Self::Storage(_) => ErrorSeverity::Warning,
        }
    }

    /// Returns true if the caller should surface a "temporarily unavailable"
    /// signal and retry later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Capacity(e) => e.is_retryable(),
            Self::Delivery(DeliveryError::CircuitOpen { .. } | DeliveryError::Timeout { .. }) => {
                true
            }
            Self::Storage(StorageError::Unavailable { .. } | StorageError::CircuitOpen) => true,
            _ => false,
        }
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Capacity(_) => "capacity",
            Self::Delivery(_) => "delivery",
            Self::Config(_) => "config",
            Self::Storage(_) => "storage",
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a capacity error.
    #[must_use]
    pub const fn is_capacity_error(&self) -> bool {
        matches!(self, Self::Capacity(_))
    }

    /// Returns the inner validation error, if any.
    #[must_use]
    pub const fn as_validation_error(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias using [`PulseError`].
pub type Result<T> = std::result::Result<T, PulseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhausted_is_retryable() {
        let err = PulseError::from(CapacityError::PoolExhausted {
            max_size: 1,
            waited_ms: 5000,
        });
        assert!(err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Recoverable);
        assert_eq!(err.category(), "capacity");
        assert!(err.to_string().contains("exhausted"));
    }

    #[test]
    fn test_validation_is_not_retryable() {
        let err = PulseError::from(ValidationError::EmptyField {
            field: "name".to_string(),
        });
        assert!(!err.is_retryable());
        assert!(err.is_validation_error());
        assert!(!err.severity().is_recoverable());
    }

    #[test]
    fn test_room_full_is_not_retryable() {
        let err = PulseError::from(CapacityError::RoomFull {
            room_id: "r".to_string(),
            max_members: 2,
        });
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_dependency_failure_classification() {
        let timeout = DeliveryError::Timeout {
            method: "websocket".to_string(),
            timeout_ms: 100,
        };
        let unreachable = DeliveryError::Unreachable {
            method: "websocket".to_string(),
            recipient: "alice".to_string(),
        };
        assert!(timeout.is_dependency_failure());
        assert!(!unreachable.is_dependency_failure());
        assert_eq!(unreachable.kind(), "unreachable");
    }

    #[test]
    fn test_error_serialization() {
        let err = PulseError::from(StorageError::CircuitOpen);
        let json = serde_json::to_string(&err).unwrap();
        let back: PulseError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
