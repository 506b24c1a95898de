//! Alert creation and multi-method dispatch.

use super::handler::{DeliveryHandler, DeliveryReceipt};
use super::types::{Alert, AlertSource};
use crate::subscription::SubscriptionMatch;
use parking_lot::{Mutex, RwLock};
use pulse_core::error::DeliveryError;
use pulse_core::types::{AlertId, DeliveryMethod, Priority, Record, RoomId, SubscriptionId, UserId};
use pulse_resilience::{call_guarded_with, CallVerdict, CircuitBreakerRegistry, GuardError};
use pulse_telemetry::metrics::PulseMetrics;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on one handler call.
    #[serde(default = "default_handler_timeout", with = "humantime_serde")]
    pub handler_timeout: Duration,
    /// Number of recent alerts kept for acknowledgement.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

fn default_handler_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_history_size() -> usize {
    1000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            handler_timeout: default_handler_timeout(),
            history_size: default_history_size(),
        }
    }
}

impl pulse_core::config::Validatable for DispatchConfig {
    fn validate(&self) -> Result<(), pulse_core::error::ConfigError> {
        if self.handler_timeout.is_zero() {
            return Err(pulse_core::error::ConfigError::invalid_value(
                "dispatch.handler_timeout",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Outcome of dispatching one alert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Methods that succeeded, with their receipts.
    pub succeeded: Vec<(DeliveryMethod, DeliveryReceipt)>,
    /// Methods that failed, with the reason.
    pub failed: Vec<(DeliveryMethod, DeliveryError)>,
}

impl DispatchReport {
    /// Returns true if at least one method succeeded.
    #[must_use]
    pub fn delivered(&self) -> bool {
        !self.succeeded.is_empty()
    }
}

#[derive(Debug, Default)]
struct MethodCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
}

impl MethodCounters {
    fn snapshot(&self, method: DeliveryMethod) -> MethodStats {
        MethodStats {
            method,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            breaker_rejected: self.rejected.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

/// Per-method delivery counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodStats {
    /// Delivery method.
    pub method: DeliveryMethod,
    /// Successful deliveries.
    pub succeeded: u64,
    /// Failed deliveries, including rejections and timeouts.
    pub failed: u64,
    /// Calls skipped because the breaker was open.
    pub breaker_rejected: u64,
    /// Calls that exceeded the handler timeout.
    pub timed_out: u64,
}

/// Dispatcher statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherStats {
    /// Alerts dispatched.
    pub dispatched: u64,
    /// Alerts delivered by at least one method.
    pub delivered: u64,
    /// Alerts no method delivered.
    pub undelivered: u64,
    /// Registered handler methods.
    pub handlers: Vec<DeliveryMethod>,
    /// Alerts held in the history.
    pub history_len: usize,
    /// Per-method counters.
    pub methods: Vec<MethodStats>,
}

/// Builds alerts and delivers them through the registered handlers.
///
/// Every handler call runs under the circuit breaker named after the method's
/// dependency and is bounded by the configured handler timeout. A failing
/// method never prevents the other methods of the same alert from running.
pub struct AlertDispatcher {
    config: DispatchConfig,
    handlers: RwLock<HashMap<DeliveryMethod, Arc<dyn DeliveryHandler>>>,
    breakers: Arc<CircuitBreakerRegistry>,
    counters: [MethodCounters; 4],
    dispatched: AtomicU64,
    delivered: AtomicU64,
    history: Mutex<VecDeque<Alert>>,
}

impl AlertDispatcher {
    /// Creates a dispatcher without handlers.
    #[must_use]
    pub fn new(config: DispatchConfig, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            config,
            handlers: RwLock::new(HashMap::new()),
            breakers,
            counters: Default::default(),
            dispatched: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Registers `handler` for its method, replacing any previous one.
    pub fn register_handler(&self, handler: Arc<dyn DeliveryHandler>) {
        let method = handler.method();
        if self.handlers.write().insert(method, handler).is_some() {
            info!(method = %method, "Replaced delivery handler");
        } else {
            info!(method = %method, "Registered delivery handler");
        }
    }

    /// Removes the handler for `method`.
    pub fn unregister_handler(&self, method: DeliveryMethod) -> bool {
        self.handlers.write().remove(&method).is_some()
    }

    /// Returns the breaker registry.
    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Creates an alert for a subscription match.
    #[must_use]
    pub fn create_alert(
        &self,
        subscription_id: SubscriptionId,
        recipient: UserId,
        data: Record,
        priority: Priority,
        delivery_methods: BTreeSet<DeliveryMethod>,
    ) -> Alert {
        Alert::new(
            AlertSource::Subscription { subscription_id },
            recipient,
            data,
            priority,
            delivery_methods,
        )
    }

    /// Creates an alert carrying a room message for one member.
    #[must_use]
    pub fn create_room_alert(
        &self,
        room_id: RoomId,
        sender: Option<UserId>,
        recipient: UserId,
        data: Record,
        delivery_methods: BTreeSet<DeliveryMethod>,
    ) -> Alert {
        Alert::new(
            AlertSource::Room { room_id, sender },
            recipient,
            data,
            Priority::Medium,
            delivery_methods,
        )
    }

    /// Delivers `alert` through each of its methods.
    ///
    /// Sets `alert.delivered` iff at least one method succeeded and records
    /// the alert in the history.
    pub async fn dispatch(&self, alert: &mut Alert) -> DispatchReport {
        let mut report = DispatchReport::default();

        for method in alert.delivery_methods.clone() {
            match self.deliver_one(method, alert).await {
                Ok(receipt) => report.succeeded.push((method, receipt)),
                Err(e) => report.failed.push((method, e)),
            }
        }

        let delivered = report.delivered();
        alert.set_delivered(delivered);
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        if delivered {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            warn!(
                alert = %alert.id,
                recipient = %alert.recipient,
                failures = report.failed.len(),
                "Alert not delivered by any method"
            );
        }
        PulseMetrics::alert_dispatched(alert.priority.as_str(), delivered);
        self.remember(alert.clone());

        report
    }

    /// Creates and dispatches the alert for a subscription match.
    pub async fn create_and_dispatch(&self, matched: &SubscriptionMatch) -> Alert {
        let mut alert = self.create_alert(
            matched.subscription_id.clone(),
            matched.user_id.clone(),
            matched.data.clone(),
            matched.priority,
            matched.delivery_methods.clone(),
        );
        self.dispatch(&mut alert).await;
        alert
    }

    async fn deliver_one(&self, method: DeliveryMethod, alert: &Alert) -> Result<DeliveryReceipt, DeliveryError> {
        let counters = &self.counters[method.index()];

        let handler = self.handlers.read().get(&method).cloned();
        let Some(handler) = handler else {
            warn!(alert = %alert.id, method = %method, "No handler registered, skipping method");
            counters.failed.fetch_add(1, Ordering::Relaxed);
            PulseMetrics::delivery(method.dependency_name(), "no_handler");
            return Err(DeliveryError::NoHandler {
                method: method.to_string(),
            });
        };

        let breaker = self.breakers.get(method.dependency_name());
        let timeout = self.config.handler_timeout;
        let result = call_guarded_with(&breaker, timeout, handler.deliver(alert), judge_delivery)
            .await
            .map_err(|e| match e {
                GuardError::Rejected { dependency } => {
                    counters.rejected.fetch_add(1, Ordering::Relaxed);
                    DeliveryError::CircuitOpen { dependency }
                }
                GuardError::TimedOut { timeout, .. } => {
                    counters.timed_out.fetch_add(1, Ordering::Relaxed);
                    DeliveryError::Timeout {
                        method: method.to_string(),
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    }
                }
                GuardError::Inner(e) => e,
            });

        match &result {
            Ok(receipt) => {
                counters.succeeded.fetch_add(1, Ordering::Relaxed);
                PulseMetrics::delivery(method.dependency_name(), "delivered");
                debug!(alert = %alert.id, method = %method, ?receipt, "Delivered alert");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                PulseMetrics::delivery(method.dependency_name(), e.kind());
                warn!(alert = %alert.id, method = %method, error = %e, "Delivery failed");
            }
        }
        result
    }

    fn remember(&self, alert: Alert) {
        if self.config.history_size == 0 {
            return;
        }
        let mut history = self.history.lock();
        while history.len() >= self.config.history_size {
            history.pop_front();
        }
        history.push_back(alert);
    }

    /// Acknowledges an alert still held in the history.
    ///
    /// Returns false if the alert is unknown or was already acknowledged.
    pub fn acknowledge(&self, alert_id: &AlertId) -> bool {
        self.history
            .lock()
            .iter_mut()
            .find(|a| &a.id == alert_id)
            .is_some_and(Alert::acknowledge)
    }

    /// Returns the user's alerts from the history, newest first.
    #[must_use]
    pub fn recent_alerts(&self, user_id: &UserId, limit: usize) -> Vec<Alert> {
        self.history
            .lock()
            .iter()
            .rev()
            .filter(|a| &a.recipient == user_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns dispatcher statistics.
    #[must_use]
    pub fn get_stats(&self) -> DispatcherStats {
        let dispatched = self.dispatched.load(Ordering::Relaxed);
        let delivered = self.delivered.load(Ordering::Relaxed);
        let mut handlers: Vec<_> = self.handlers.read().keys().copied().collect();
        handlers.sort();
        DispatcherStats {
            dispatched,
            delivered,
            undelivered: dispatched.saturating_sub(delivered),
            handlers,
            history_len: self.history.lock().len(),
            methods: DeliveryMethod::ALL
                .iter()
                .map(|m| self.counters[m.index()].snapshot(*m))
                .collect(),
        }
    }
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("config", &self.config)
            .field("handlers", &self.handlers.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Timed-out endpoints fail the breaker even when the alert was buffered.
fn judge_delivery(result: &Result<DeliveryReceipt, DeliveryError>) -> CallVerdict {
    match result {
        Ok(receipt) if receipt.timed_out() > 0 => {
            CallVerdict::Failure(format!("{} endpoint(s) timed out", receipt.timed_out()))
        }
        Ok(_) => CallVerdict::Success,
        Err(e) if e.is_dependency_failure() => CallVerdict::Failure(e.to_string()),
        Err(_) => CallVerdict::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::CallbackHandler;
    use async_trait::async_trait;
    use pulse_resilience::{BreakerRegistryConfig, CircuitBreakerConfig, CircuitState};
    use std::sync::atomic::AtomicUsize;

    fn dispatcher(config: BreakerRegistryConfig) -> AlertDispatcher {
        AlertDispatcher::new(
            DispatchConfig::default(),
            Arc::new(CircuitBreakerRegistry::new(config)),
        )
    }

    fn ok_handler(method: DeliveryMethod, calls: Arc<AtomicUsize>) -> Arc<dyn DeliveryHandler> {
        Arc::new(CallbackHandler::new(method, move |_: &Alert| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(DeliveryReceipt::ONE)
        }))
    }

    fn failing_handler(method: DeliveryMethod, calls: Arc<AtomicUsize>) -> Arc<dyn DeliveryHandler> {
        Arc::new(CallbackHandler::new(method, move |_: &Alert| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DeliveryError::transport(method, "connection refused"))
        }))
    }

    fn alert(d: &AlertDispatcher, methods: &[DeliveryMethod]) -> Alert {
        d.create_alert(
            SubscriptionId::new("sub-1"),
            UserId::new("alice"),
            Record::new().with("symbol", "600519"),
            Priority::High,
            methods.iter().copied().collect(),
        )
    }

    #[tokio::test]
    async fn test_delivered_if_any_method_succeeds() {
        let d = dispatcher(BreakerRegistryConfig::default());
        d.register_handler(ok_handler(DeliveryMethod::WebSocket, Arc::default()));
        d.register_handler(failing_handler(DeliveryMethod::Email, Arc::default()));

        let mut a = alert(&d, &[DeliveryMethod::WebSocket, DeliveryMethod::Email]);
        let report = d.dispatch(&mut a).await;

        assert!(a.is_delivered());
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, DeliveryMethod::Email);
    }

    #[tokio::test]
    async fn test_missing_handler_is_failed_method() {
        let d = dispatcher(BreakerRegistryConfig::default());
        let mut a = alert(&d, &[DeliveryMethod::Sms]);
        let report = d.dispatch(&mut a).await;

        assert!(!a.is_delivered());
        assert!(matches!(report.failed[0].1, DeliveryError::NoHandler { .. }));
        // Missing handlers are a configuration problem, not a dependency failure.
        assert!(d.breakers().existing("sms").is_none());

        let stats = d.get_stats();
        assert_eq!(stats.undelivered, 1);
        assert_eq!(stats.methods[DeliveryMethod::Sms.index()].failed, 1);
    }

    /// An open email breaker skips the handler while websocket still delivers.
    #[tokio::test]
    async fn test_scenario_open_breaker_skips_method() {
        let config = BreakerRegistryConfig::default().with_dependency(
            "email",
            CircuitBreakerConfig::default()
                .with_failure_threshold(3)
                .with_recovery_timeout(Duration::from_millis(100)),
        );
        let d = dispatcher(config);
        let email_calls = Arc::new(AtomicUsize::new(0));
        d.register_handler(ok_handler(DeliveryMethod::WebSocket, Arc::default()));
        d.register_handler(failing_handler(DeliveryMethod::Email, email_calls.clone()));

        for _ in 0..3 {
            let mut a = alert(&d, &[DeliveryMethod::Email]);
            d.dispatch(&mut a).await;
        }
        assert_eq!(email_calls.load(Ordering::SeqCst), 3);
        assert_eq!(d.breakers().get("email").state(), CircuitState::Open);

        let mut a = alert(&d, &[DeliveryMethod::Email, DeliveryMethod::WebSocket]);
        let report = d.dispatch(&mut a).await;
        assert!(a.is_delivered());
        assert_eq!(email_calls.load(Ordering::SeqCst), 3);
        assert!(matches!(report.failed[0].1, DeliveryError::CircuitOpen { .. }));

        // Recovery: after the timeout one success closes the breaker.
        tokio::time::sleep(Duration::from_millis(150)).await;
        d.register_handler(ok_handler(DeliveryMethod::Email, email_calls.clone()));
        let mut a = alert(&d, &[DeliveryMethod::Email]);
        d.dispatch(&mut a).await;
        assert!(a.is_delivered());
        assert_eq!(d.breakers().get("email").state(), CircuitState::Closed);
        assert_eq!(d.get_stats().methods[DeliveryMethod::Email.index()].breaker_rejected, 1);
    }

    struct SlowHandler;

    #[async_trait]
    impl DeliveryHandler for SlowHandler {
        fn method(&self) -> DeliveryMethod {
            DeliveryMethod::Webhook
        }

        async fn deliver(&self, _alert: &Alert) -> Result<DeliveryReceipt, DeliveryError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(DeliveryReceipt::ONE)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_timeout_counts_against_breaker() {
        let d = dispatcher(BreakerRegistryConfig::default());
        d.register_handler(Arc::new(SlowHandler));

        let mut a = alert(&d, &[DeliveryMethod::Webhook]);
        let report = d.dispatch(&mut a).await;

        assert!(!a.is_delivered());
        assert!(matches!(
            report.failed[0].1,
            DeliveryError::Timeout { timeout_ms: 5000, .. }
        ));
        assert_eq!(d.breakers().get("webhook").failure_count(), 1);
        assert_eq!(d.get_stats().methods[DeliveryMethod::Webhook.index()].timed_out, 1);
    }

    #[tokio::test]
    async fn test_unreachable_does_not_trip_breaker() {
        let d = dispatcher(BreakerRegistryConfig::default());
        d.register_handler(Arc::new(CallbackHandler::new(DeliveryMethod::WebSocket, |a: &Alert| {
            Err(DeliveryError::Unreachable {
                method: "websocket".to_string(),
                recipient: a.recipient.to_string(),
            })
        })));

        for _ in 0..10 {
            let mut a = alert(&d, &[DeliveryMethod::WebSocket]);
            d.dispatch(&mut a).await;
        }
        assert_eq!(d.breakers().get("websocket").state(), CircuitState::Closed);
        assert_eq!(d.breakers().get("websocket").failure_count(), 0);
    }

    #[tokio::test]
    async fn test_timed_out_endpoints_fail_breaker_but_deliver() {
        let d = dispatcher(BreakerRegistryConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        d.register_handler(Arc::new(CallbackHandler::new(DeliveryMethod::WebSocket, move |_: &Alert| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(DeliveryReceipt::ONE)
            } else {
                Ok(DeliveryReceipt::Deferred {
                    buffered: 1,
                    timed_out: 1,
                })
            }
        })));

        for _ in 0..2 {
            let mut a = alert(&d, &[DeliveryMethod::WebSocket]);
            d.dispatch(&mut a).await;
            assert!(a.is_delivered());
        }

        let snapshot = d.breakers().get("websocket").snapshot();
        assert_eq!(snapshot.total_successes, 1);
        assert_eq!(snapshot.total_failures, 1);
        assert_eq!(
            snapshot.last_failure_reason.as_deref(),
            Some("1 endpoint(s) timed out")
        );
        assert_eq!(d.get_stats().methods[DeliveryMethod::WebSocket.index()].succeeded, 2);
    }

    #[tokio::test]
    async fn test_history_acknowledge_and_recent() {
        let d = AlertDispatcher::new(
            DispatchConfig {
                history_size: 2,
                ..DispatchConfig::default()
            },
            Arc::new(CircuitBreakerRegistry::default()),
        );
        d.register_handler(ok_handler(DeliveryMethod::WebSocket, Arc::default()));

        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut a = alert(&d, &[DeliveryMethod::WebSocket]);
            d.dispatch(&mut a).await;
            ids.push(a.id.clone());
        }

        // Oldest alert fell out of the history.
        assert!(!d.acknowledge(&ids[0]));
        assert!(d.acknowledge(&ids[2]));
        assert!(!d.acknowledge(&ids[2]));

        let recent = d.recent_alerts(&UserId::new("alice"), 10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, ids[2]);
        assert!(recent[0].is_acknowledged());
        assert!(d.recent_alerts(&UserId::new("bob"), 10).is_empty());
    }
}
