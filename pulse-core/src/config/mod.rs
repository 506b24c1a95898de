//! Configuration management.
//!
//! Configuration files are YAML, TOML or JSON, detected from the file
//! extension. Each config section implements [`Validatable`]; sections that
//! accept environment overrides implement [`Configurable`].

mod loader;
mod traits;

pub use loader::{ConfigFormat, ConfigLoader, env_override};
pub use traits::{Configurable, Validatable};
