//! Delivery error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of one delivery method for one alert.
///
/// Delivery errors never abort a dispatch fan-out; they are counted per
/// method and, when they indicate an unhealthy dependency, recorded against
/// that dependency's circuit breaker.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryError {
    /// The breaker guarding the dependency rejected the call.
    #[error("[Delivery] Circuit open for '{dependency}'")]
    CircuitOpen {
        /// Dependency name.
        dependency: String,
    },

    /// The handler did not finish in time.
    #[error("[Delivery] {method} delivery timed out after {timeout_ms}ms")]
    Timeout {
        /// Delivery method.
        method: String,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// Transport-level failure reported by the handler.
    #[error("[Delivery] {method} transport error: {reason}")]
    Transport {
        /// Delivery method.
        method: String,
        /// Transport message.
        reason: String,
    },

    /// The recipient has no reachable endpoint for this method.
    #[error("[Delivery] Recipient '{recipient}' unreachable via {method}")]
    Unreachable {
        /// Delivery method.
        method: String,
        /// Recipient user id.
        recipient: String,
    },

    /// No handler is registered for the method.
    #[error("[Delivery] No handler registered for {method}")]
    NoHandler {
        /// Delivery method.
        method: String,
    },
}

impl DeliveryError {
    /// Returns true if the failure should count against the dependency's
    /// circuit breaker.
    #[must_use]
    pub const fn is_dependency_failure(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
    }

    /// Short label used as a metrics dimension.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::Unreachable { .. } => "unreachable",
            Self::NoHandler { .. } => "no_handler",
        }
    }

    /// Creates a [`DeliveryError::Transport`].
    #[must_use]
    pub fn transport(method: impl ToString, reason: impl Into<String>) -> Self {
        Self::Transport {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}
