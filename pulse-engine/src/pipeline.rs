//! Record-to-alert pipeline.
//!
//! Ties the subscription manager, the dispatcher and the optional store
//! together behind identity-checked operations.

use crate::alert::{Alert, AlertDispatcher};
use crate::store::SubscriptionStore;
use crate::subscription::{NewSubscription, Subscription, SubscriptionManager};
use futures::future::join_all;
use pulse_core::error::{PulseError, StorageError, ValidationError};
use pulse_core::types::{Identity, Record, SubscriptionId, UserId};
use pulse_resilience::{call_guarded, CircuitBreaker, GuardError, STORAGE_DEPENDENCY};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Evaluates records and dispatches the resulting alerts.
pub struct AlertPipeline {
    subscriptions: Arc<SubscriptionManager>,
    dispatcher: Arc<AlertDispatcher>,
    store: Option<Arc<dyn SubscriptionStore>>,
    storage_breaker: Arc<CircuitBreaker>,
    store_timeout: Duration,
}

impl AlertPipeline {
    /// Creates a pipeline without persistence.
    #[must_use]
    pub fn new(subscriptions: Arc<SubscriptionManager>, dispatcher: Arc<AlertDispatcher>) -> Self {
        let storage_breaker = dispatcher.breakers().get(STORAGE_DEPENDENCY);
        Self {
            subscriptions,
            dispatcher,
            store: None,
            storage_breaker,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Attaches a store. Store calls are guarded by the `storage` breaker.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn SubscriptionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the deadline for one store call.
    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Subscription manager.
    #[must_use]
    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    /// Alert dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<AlertDispatcher> {
        &self.dispatcher
    }

    /// Creates a subscription owned by the caller.
    ///
    /// Validation failures leave no state behind. Persisting is best-effort.
    pub async fn subscribe(
        &self,
        identity: &Identity,
        request: NewSubscription,
    ) -> Result<Subscription, PulseError> {
        let subscription = Subscription::new(identity.user_id.clone(), request);
        self.subscriptions.add(subscription.clone())?;
        info!(
            subscription = %subscription.id,
            user = %subscription.user_id,
            name = %subscription.name,
            "Subscription created"
        );

        if let Some(store) = &self.store {
            self.guard_store("save_subscription", store.save_subscription(&subscription))
                .await;
        }
        Ok(subscription)
    }

    /// Removes a subscription the caller owns (or any, for admins).
    pub async fn unsubscribe(
        &self,
        identity: &Identity,
        id: &SubscriptionId,
    ) -> Result<Subscription, PulseError> {
        self.authorize(identity, id)?;
        let removed = self
            .subscriptions
            .remove(id)
            .ok_or_else(|| ValidationError::not_found("subscription", id))?;
        info!(subscription = %id, by = %identity.user_id, "Subscription removed");

        if let Some(store) = &self.store {
            self.guard_store("delete_subscription", store.delete_subscription(id))
                .await;
        }
        Ok(removed)
    }

    /// Enables or disables a subscription the caller owns (or any, for admins).
    pub async fn set_enabled(
        &self,
        identity: &Identity,
        id: &SubscriptionId,
        enabled: bool,
    ) -> Result<(), PulseError> {
        self.authorize(identity, id)?;
        if !self.subscriptions.set_enabled(id, enabled) {
            return Err(ValidationError::not_found("subscription", id).into());
        }

        if let Some(store) = &self.store
            && let Some(updated) = self.subscriptions.get(id)
        {
            self.guard_store("save_subscription", store.save_subscription(&updated))
                .await;
        }
        Ok(())
    }

    fn authorize(&self, identity: &Identity, id: &SubscriptionId) -> Result<(), ValidationError> {
        let owner = self
            .subscriptions
            .get(id)
            .map(|s| s.user_id)
            .ok_or_else(|| ValidationError::not_found("subscription", id))?;
        if identity.can_manage(&owner) {
            Ok(())
        } else {
            Err(ValidationError::permission_denied(format!(
                "user '{}' does not own subscription '{id}'",
                identity.user_id
            )))
        }
    }

    /// Evaluates `record` and dispatches an alert per match, concurrently.
    ///
    /// Returns the dispatched alerts in unspecified order.
    pub async fn process(&self, record: &Record) -> Vec<Alert> {
        let matches = self.subscriptions.process_matches(record);
        if matches.is_empty() {
            return Vec::new();
        }

        let alerts = join_all(matches.iter().map(|m| self.dispatcher.create_and_dispatch(m))).await;
        debug!(alerts = alerts.len(), "Dispatched alerts for record");

        if let Some(store) = &self.store {
            for alert in &alerts {
                self.guard_store("save_alert", store.save_alert(alert)).await;
            }
        }
        alerts
    }

    /// Loads a user's subscriptions from the store into the manager.
    ///
    /// Subscriptions already present or no longer valid are skipped. Returns
    /// the number restored.
    pub async fn restore_user(&self, user_id: &UserId) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let Some(stored) = self
            .guard_store("get_user_subscriptions", store.get_user_subscriptions(user_id))
            .await
        else {
            return 0;
        };

        let mut restored = 0;
        for subscription in stored {
            let id = subscription.id.clone();
            match self.subscriptions.add(subscription) {
                Ok(_) => restored += 1,
                Err(PulseError::Validation(ValidationError::Duplicate { .. })) => {}
                Err(e) => warn!(subscription = %id, error = %e, "Skipping stored subscription"),
            }
        }
        info!(user = %user_id, restored, "Restored subscriptions");
        restored
    }

    async fn guard_store<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StorageError>>,
    ) -> Option<T> {
        match call_guarded(&self.storage_breaker, self.store_timeout, call, |_| true).await {
            Ok(value) => Some(value),
            Err(GuardError::Rejected { .. }) => {
                debug!(operation, "{}", StorageError::CircuitOpen);
                None
            }
            Err(e) => {
                warn!(operation, error = %e, "Store call failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for AlertPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertPipeline")
            .field("subscriptions", &self.subscriptions)
            .field("has_store", &self.store.is_some())
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{CallbackHandler, DeliveryReceipt, DispatchConfig};
    use crate::filter::{FilterCondition, FilterExpression, FilterLogic, FilterOperator};
    use crate::store::InMemoryStore;
    use crate::subscription::SubscriptionManagerConfig;
    use async_trait::async_trait;
    use pulse_core::types::{DeliveryMethod, Priority};
    use pulse_resilience::{BreakerRegistryConfig, CircuitBreakerRegistry, CircuitState};

    fn dispatcher() -> Arc<AlertDispatcher> {
        let d = AlertDispatcher::new(
            DispatchConfig::default(),
            Arc::new(CircuitBreakerRegistry::new(BreakerRegistryConfig::default())),
        );
        d.register_handler(Arc::new(CallbackHandler::new(DeliveryMethod::WebSocket, |_: &Alert| {
            Ok(DeliveryReceipt::ONE)
        })));
        Arc::new(d)
    }

    fn pipeline() -> AlertPipeline {
        AlertPipeline::new(
            Arc::new(SubscriptionManager::new(SubscriptionManagerConfig::default())),
            dispatcher(),
        )
    }

    fn price_watch() -> NewSubscription {
        let filter = FilterExpression::new("moutai above 1800", FilterLogic::And)
            .with_condition(FilterCondition::new("symbol", FilterOperator::Eq, "600519"))
            .with_condition(FilterCondition::new("price", FilterOperator::Gt, 1800.0));
        NewSubscription::new("moutai", filter).with_priority(Priority::High)
    }

    #[tokio::test]
    async fn test_process_dispatches_alerts() {
        let p = pipeline();
        let alice = Identity::user("alice");
        let sub = p.subscribe(&alice, price_watch()).await.unwrap();

        let alerts = p
            .process(&Record::new().with("symbol", "600519").with("price", 1850.0))
            .await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].subscription_id(), Some(&sub.id));
        assert_eq!(alerts[0].recipient, alice.user_id);
        assert!(alerts[0].is_delivered());

        assert!(p.process(&Record::new().with("symbol", "600519").with("price", 1700.0)).await.is_empty());
    }

    #[tokio::test]
    async fn test_ownership_checks() {
        let p = pipeline();
        let alice = Identity::user("alice");
        let bob = Identity::user("bob");
        let admin = Identity::new("root", pulse_core::types::ADMIN_ROLE);
        let sub = p.subscribe(&alice, price_watch()).await.unwrap();

        let err = p.set_enabled(&bob, &sub.id, false).await.unwrap_err();
        assert!(matches!(
            err,
            PulseError::Validation(ValidationError::PermissionDenied { .. })
        ));
        assert!(p.unsubscribe(&bob, &sub.id).await.is_err());

        p.set_enabled(&admin, &sub.id, false).await.unwrap();
        assert!(!p.subscriptions().get(&sub.id).unwrap().enabled);

        p.unsubscribe(&alice, &sub.id).await.unwrap();
        let err = p.unsubscribe(&alice, &sub.id).await.unwrap_err();
        assert!(matches!(
            err,
            PulseError::Validation(ValidationError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_subscribe_leaves_no_state() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline().with_store(store.clone());
        let bad = FilterExpression::new("bad", FilterLogic::And)
            .with_condition(FilterCondition::new("price", FilterOperator::Gt, "high"));

        let err = p
            .subscribe(&Identity::user("alice"), NewSubscription::new("bad", bad))
            .await
            .unwrap_err();
        assert!(err.is_validation_error());
        assert!(p.subscriptions().is_empty());
        assert_eq!(store.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_store_and_restore() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline().with_store(store.clone());
        let alice = Identity::user("alice");
        let sub = p.subscribe(&alice, price_watch()).await.unwrap();

        let alerts = p
            .process(&Record::new().with("symbol", "600519").with("price", 1900.0))
            .await;
        assert!(store.alert(&alerts[0].id).is_some());

        let fresh = pipeline().with_store(store.clone());
        assert_eq!(fresh.restore_user(&alice.user_id).await, 1);
        assert!(fresh.subscriptions().get(&sub.id).is_some());
        // Restoring twice is a no-op.
        assert_eq!(fresh.restore_user(&alice.user_id).await, 0);
    }

    struct BrokenStore;

    #[async_trait]
    impl SubscriptionStore for BrokenStore {
        async fn save_subscription(&self, _: &Subscription) -> Result<(), StorageError> {
            Err(StorageError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }

        async fn delete_subscription(&self, _: &SubscriptionId) -> Result<(), StorageError> {
            Ok(())
        }

        async fn save_alert(&self, _: &Alert) -> Result<(), StorageError> {
            Err(StorageError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }

        async fn get_user_subscriptions(&self, _: &UserId) -> Result<Vec<Subscription>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_store_failures_are_isolated() {
        let p = pipeline().with_store(Arc::new(BrokenStore));
        let alice = Identity::user("alice");

        // Storage breaker opens after 3 failures; subscribing keeps working.
        for _ in 0..4 {
            p.subscribe(&alice, price_watch()).await.unwrap();
        }
        assert_eq!(p.subscriptions().len(), 4);
        assert_eq!(
            p.dispatcher().breakers().get(STORAGE_DEPENDENCY).state(),
            CircuitState::Open
        );

        let alerts = p
            .process(&Record::new().with("symbol", "600519").with("price", 1900.0))
            .await;
        assert_eq!(alerts.len(), 4);
    }
}
