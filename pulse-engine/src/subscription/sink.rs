//! Destinations for isolated evaluation errors.

use crate::filter::FilterError;
use parking_lot::Mutex;
use pulse_core::types::SubscriptionId;
use pulse_telemetry::metrics::PulseMetrics;
use tracing::warn;

/// Receives evaluation errors that were isolated to one subscription.
///
/// Called after the manager has released its locks, so implementations may
/// call back into the manager.
pub trait ErrorSink: Send + Sync {
    /// Reports one error.
    fn report(&self, subscription_id: &SubscriptionId, error: &FilterError);
}

/// Logs errors at `warn` and counts them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorSink;

impl ErrorSink for LoggingErrorSink {
    fn report(&self, subscription_id: &SubscriptionId, error: &FilterError) {
        PulseMetrics::subscription_error();
        warn!(subscription = %subscription_id, error = %error, "Subscription evaluation failed, skipped");
    }
}

/// Keeps reported errors in memory.
#[derive(Debug, Default)]
pub struct CollectingErrorSink {
    errors: Mutex<Vec<(SubscriptionId, FilterError)>>,
}

impl CollectingErrorSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains collected errors.
    pub fn take(&self) -> Vec<(SubscriptionId, FilterError)> {
        std::mem::take(&mut *self.errors.lock())
    }

    /// Number of errors collected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }
}

impl ErrorSink for CollectingErrorSink {
    fn report(&self, subscription_id: &SubscriptionId, error: &FilterError) {
        self.errors.lock().push((subscription_id.clone(), error.clone()));
    }
}
