//! Configuration-related error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error type covering missing fields, invalid values,
/// and file access errors.
///
/// # Examples
///
/// ```
/// use pulse_core::error::ConfigError;
///
/// let error = ConfigError::invalid_value("pool.max_size", "must be greater than 0");
/// assert!(error.to_string().contains("pool.max_size"));
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigError {
    /// Required configuration field is missing.
    #[error("[Config] Missing field '{field}'")]
    MissingField {
        /// Name of the missing field.
        field: String,
    },

    /// Configuration value is invalid.
    #[error("[Config] Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Field with the invalid value.
        field: String,
        /// Reason why the value is invalid.
        reason: String,
    },

    /// Configuration file could not be read.
    #[error("[Config] Failed to read file '{path}': {reason}")]
    FileReadError {
        /// Path to the configuration file.
        path: String,
        /// Reason for the read failure.
        reason: String,
    },

    /// Configuration content could not be parsed.
    #[error("[Config] Invalid format in '{path}': {reason}")]
    InvalidFormat {
        /// Source of the content.
        path: String,
        /// Parser message.
        reason: String,
    },

    /// Environment variable held an unusable value.
    #[error("[Config] Environment variable '{name}': {reason}")]
    EnvVar {
        /// Variable name.
        name: String,
        /// Reason it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates a [`ConfigError::MissingField`].
    #[must_use]
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates a [`ConfigError::InvalidValue`].
    #[must_use]
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
