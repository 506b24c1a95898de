//! # Pulse Telemetry
//!
//! Logging and metrics for the Pulse alert distribution layer.
//!
//! - **Structured Logging**: `tracing` subscriber with JSON or pretty output,
//!   stdout or rolling files
//! - **Metrics**: Prometheus-compatible counters, gauges and histograms for
//!   record processing, dispatch outcomes, breakers, pools and buffers
//!
//! Metric recording is a no-op until [`metrics::init_metrics`] installs a
//! recorder, so library crates record unconditionally.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

/// Logging configuration and initialization
pub mod logging;

/// Metrics collection and export
pub mod metrics;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::logging::{LogConfig, LogFormat, LogOutput, init_logging};
    pub use crate::metrics::{MetricsConfig, PulseMetrics, init_metrics};
}
