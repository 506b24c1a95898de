//! Persistence interface for subscriptions and alerts.
//!
//! Persistence is optional. The pipeline works without a store and treats
//! every store call as best-effort.

use crate::alert::Alert;
use crate::subscription::Subscription;
use parking_lot::RwLock;
use pulse_core::error::StorageError;
use pulse_core::types::{AlertId, SubscriptionId, UserId};
use std::collections::HashMap;

/// Pluggable persistence backend.
#[async_trait::async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Saves or replaces a subscription.
    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), StorageError>;

    /// Deletes a subscription. Deleting an unknown id is not an error.
    async fn delete_subscription(&self, id: &SubscriptionId) -> Result<(), StorageError>;

    /// Appends an alert to the audit log.
    async fn save_alert(&self, alert: &Alert) -> Result<(), StorageError>;

    /// Loads every subscription owned by `user_id`.
    async fn get_user_subscriptions(&self, user_id: &UserId) -> Result<Vec<Subscription>, StorageError>;
}

/// Store keeping everything in process memory.
///
/// Useful for tests and single-node deployments that do not need
/// subscriptions to survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    alerts: RwLock<Vec<Alert>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Number of stored alerts.
    #[must_use]
    pub fn alert_count(&self) -> usize {
        self.alerts.read().len()
    }

    /// Returns a stored alert.
    #[must_use]
    pub fn alert(&self, id: &AlertId) -> Option<Alert> {
        self.alerts.read().iter().find(|a| &a.id == id).cloned()
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), StorageError> {
        self.subscriptions
            .write()
            .insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn delete_subscription(&self, id: &SubscriptionId) -> Result<(), StorageError> {
        self.subscriptions.write().remove(id);
        Ok(())
    }

    async fn save_alert(&self, alert: &Alert) -> Result<(), StorageError> {
        self.alerts.write().push(alert.clone());
        Ok(())
    }

    async fn get_user_subscriptions(&self, user_id: &UserId) -> Result<Vec<Subscription>, StorageError> {
        let mut owned: Vec<_> = self
            .subscriptions
            .read()
            .values()
            .filter(|s| &s.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by_key(|s| s.created_at);
        Ok(owned)
    }
}
