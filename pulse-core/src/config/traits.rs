//! Configuration traits for validation and environment overrides.

use crate::error::ConfigError;

/// Trait for configuration types that can be validated.
///
/// # Example
///
/// ```rust
/// use pulse_core::config::Validatable;
/// use pulse_core::error::ConfigError;
///
/// struct BufferConfig {
///     max_size: usize,
/// }
///
/// impl Validatable for BufferConfig {
///     fn validate(&self) -> Result<(), ConfigError> {
///         if self.max_size == 0 {
///             return Err(ConfigError::invalid_value("max_size", "must be greater than 0"));
///         }
///         Ok(())
///     }
/// }
///
/// assert!(BufferConfig { max_size: 0 }.validate().is_err());
/// ```
pub trait Validatable {
    /// Validates the configuration.
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Trait for types that support environment variable overrides.
pub trait Configurable {
    /// Applies overrides from variables named `{prefix}_...`.
    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError>;

    /// Lists the variable names this type reads.
    fn env_var_names(prefix: &str) -> Vec<String>;
}
