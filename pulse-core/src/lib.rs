//! # Pulse Core
//!
//! Shared building blocks for the Pulse alert distribution workspace.
//!
//! This crate provides:
//! - Identifier newtypes (`SubscriptionId`, `AlertId`, `ConnectionId`, ...)
//! - The flat record model consumed by filter evaluation (`FieldValue`, `Record`)
//! - Alert priorities, delivery methods and the resolved caller `Identity`
//! - The error hierarchy shared by every Pulse crate
//! - Configuration loading with YAML/TOML/JSON support

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

/// Core type definitions and newtype wrappers
pub mod types;

/// Error types and handling
pub mod error;

/// Configuration management
pub mod config;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::types::*;
}
