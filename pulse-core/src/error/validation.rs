//! Validation error types.
//!
//! Raised synchronously at the public API boundary. A validation failure
//! never leaves partial state behind.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejection of a malformed filter, subscription or room request.
///
/// # Examples
///
/// ```
/// use pulse_core::error::ValidationError;
///
/// let error = ValidationError::EmptyField { field: "condition.field".to_string() };
/// assert!(error.to_string().contains("condition.field"));
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationError {
    /// A required field was empty.
    #[error("[Validation] Field '{field}' must not be empty")]
    EmptyField {
        /// Offending field.
        field: String,
    },

    /// Operator cannot be applied to the configured value.
    #[error("[Validation] Operator '{operator}' on field '{field}': {reason}")]
    OperatorMismatch {
        /// Field the condition targets.
        field: String,
        /// Operator name.
        operator: String,
        /// Violated constraint.
        reason: String,
    },

    /// Regular expression failed to compile.
    #[error("[Validation] Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern as written.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// A value is outside its allowed range.
    #[error("[Validation] Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Offending field.
        field: String,
        /// Violated constraint.
        reason: String,
    },

    /// Referenced entity does not exist.
    #[error("[Validation] {kind} '{id}' not found")]
    NotFound {
        /// Entity kind, e.g. `subscription`.
        kind: String,
        /// Requested id.
        id: String,
    },

    /// Caller may not act on the referenced entity.
    #[error("[Validation] Permission denied: {reason}")]
    PermissionDenied {
        /// Why access was refused.
        reason: String,
    },

    /// Entity already exists.
    #[error("[Validation] {kind} '{id}' already exists")]
    Duplicate {
        /// Entity kind.
        kind: String,
        /// Conflicting id.
        id: String,
    },
}

impl ValidationError {
    /// Creates an [`ValidationError::InvalidValue`].
    #[must_use]
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a [`ValidationError::NotFound`].
    #[must_use]
    pub fn not_found(kind: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    /// Creates a [`ValidationError::PermissionDenied`].
    #[must_use]
    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }
}
