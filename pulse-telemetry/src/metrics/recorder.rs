//! Pulse metrics recorder with pre-defined metrics.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Pre-defined metrics for the alert distribution layer.
///
/// All metrics follow the naming convention `pulse_<category>_<metric>_<unit>`.
pub struct PulseMetrics;

impl PulseMetrics {
    /// Register all metric descriptions.
    pub fn register() {
        // Subscription metrics
        describe_counter!("pulse_records_processed_total", "Records evaluated against subscriptions");
        describe_counter!("pulse_subscription_matches_total", "Subscription matches");
        describe_counter!(
            "pulse_subscription_errors_total",
            "Filter evaluation errors isolated per subscription"
        );
        describe_histogram!(
            "pulse_record_processing_seconds",
            "Time to evaluate one record against all subscriptions"
        );

        // Dispatch metrics
        describe_counter!("pulse_alerts_dispatched_total", "Alerts dispatched");
        describe_counter!("pulse_alerts_undelivered_total", "Alerts no method delivered");
        describe_counter!("pulse_delivery_total", "Delivery attempts by method and outcome");

        // Breaker metrics
        describe_counter!("pulse_breaker_rejections_total", "Calls rejected by an open breaker");
        describe_counter!("pulse_breaker_transitions_total", "Circuit breaker state transitions");

        // Pool and buffer metrics
        describe_gauge!("pulse_pool_connections", "Pooled connections by state");
        describe_counter!("pulse_pool_exhausted_total", "Acquire calls that timed out");
        describe_counter!("pulse_buffered_messages_total", "Messages buffered for offline connections");
        describe_counter!("pulse_buffer_evictions_total", "Buffered messages evicted on overflow");
        describe_counter!("pulse_replayed_messages_total", "Buffered messages replayed on reconnect");

        // Room metrics
        describe_counter!("pulse_room_broadcasts_total", "Room broadcasts");
    }

    // ==================== Subscription Metrics ====================

    /// Record one processed record and its match count.
    pub fn record_processed(matches: usize, latency_seconds: f64) {
        counter!("pulse_records_processed_total").increment(1);
        counter!("pulse_subscription_matches_total").increment(matches as u64);
        histogram!("pulse_record_processing_seconds").record(latency_seconds);
    }

    /// Record an isolated evaluation error.
    pub fn subscription_error() {
        counter!("pulse_subscription_errors_total").increment(1);
    }

    // ==================== Dispatch Metrics ====================

    /// Record a dispatched alert.
    pub fn alert_dispatched(priority: &str, delivered: bool) {
        counter!("pulse_alerts_dispatched_total", "priority" => priority.to_string()).increment(1);
        if !delivered {
            counter!("pulse_alerts_undelivered_total", "priority" => priority.to_string())
                .increment(1);
        }
    }

    /// Record the outcome of one delivery method.
    pub fn delivery(method: &str, outcome: &str) {
        counter!(
            "pulse_delivery_total",
            "method" => method.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }

    // ==================== Breaker Metrics ====================

    /// Record a call rejected by an open breaker.
    pub fn breaker_rejected(dependency: &str) {
        counter!("pulse_breaker_rejections_total", "dependency" => dependency.to_string())
            .increment(1);
    }

    /// Record a breaker state transition.
    pub fn breaker_transition(dependency: &str, to: &str) {
        counter!(
            "pulse_breaker_transitions_total",
            "dependency" => dependency.to_string(),
            "to" => to.to_string()
        )
        .increment(1);
    }

    // ==================== Pool and Buffer Metrics ====================

    /// Update pool gauges.
    #[allow(clippy::cast_precision_loss)]
    pub fn pool_connections(idle: usize, active: usize, broken: usize) {
        gauge!("pulse_pool_connections", "state" => "idle").set(idle as f64);
        gauge!("pulse_pool_connections", "state" => "active").set(active as f64);
        gauge!("pulse_pool_connections", "state" => "broken").set(broken as f64);
    }

    /// Record an acquire that timed out.
    pub fn pool_exhausted() {
        counter!("pulse_pool_exhausted_total").increment(1);
    }

    /// Record a buffered message, and whether it evicted an older one.
    pub fn message_buffered(evicted: bool) {
        counter!("pulse_buffered_messages_total").increment(1);
        if evicted {
            counter!("pulse_buffer_evictions_total").increment(1);
        }
    }

    /// Record replayed messages.
    pub fn messages_replayed(count: usize) {
        counter!("pulse_replayed_messages_total").increment(count as u64);
    }

    // ==================== Room Metrics ====================

    /// Record a room broadcast.
    pub fn room_broadcast() {
        counter!("pulse_room_broadcasts_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        PulseMetrics::register();
        PulseMetrics::record_processed(3, 0.001);
        PulseMetrics::delivery("websocket", "delivered");
        PulseMetrics::pool_connections(1, 2, 0);
    }
}
