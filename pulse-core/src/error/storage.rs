//! Storage error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of the optional persistence collaborator.
///
/// Persistence is best-effort, so these errors are logged by callers rather
/// than propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageError {
    /// The store could not be reached.
    #[error("[Storage] Store unavailable: {reason}")]
    Unavailable {
        /// Underlying reason.
        reason: String,
    },

    /// A record could not be encoded or decoded.
    #[error("[Storage] Serialization failed: {reason}")]
    Serialization {
        /// Underlying reason.
        reason: String,
    },

    /// The storage breaker is open.
    #[error("[Storage] Circuit open, write skipped")]
    CircuitOpen,
}
