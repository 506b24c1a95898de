//! # Pulse Server
//!
//! Hosts the alert pipeline and gateway as a process:
//! - configuration loading (YAML/TOML/JSON) with `PULSE_*` overrides
//! - telemetry (logging and metrics) initialization
//! - a newline-delimited JSON record feed from stdin or a file
//! - periodic stats logging
//! - signal-driven graceful shutdown

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod feed;
pub mod server;
pub mod shutdown;

pub use config::ServerConfig;
pub use feed::{FeedError, FeedStats};
pub use server::{FeedSource, PulseServer, ServerError, ServerState};
pub use shutdown::ShutdownController;
