//! Subscription manager.

use super::sink::{ErrorSink, LoggingErrorSink};
use super::types::{Subscription, SubscriptionMatch};
use crate::filter::FilterExpression;
use chrono::Utc;
use dashmap::DashMap;
use pulse_core::config::Validatable;
use pulse_core::error::{CapacityError, ConfigError, PulseError, ValidationError};
use pulse_core::types::{Record, SubscriptionId, UserId};
use pulse_telemetry::metrics::PulseMetrics;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Subscription manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionManagerConfig {
    /// Maximum subscriptions one user may hold.
    #[serde(default = "default_max_per_user")]
    pub max_per_user: usize,
}

fn default_max_per_user() -> usize {
    100
}

impl Default for SubscriptionManagerConfig {
    fn default() -> Self {
        Self {
            max_per_user: default_max_per_user(),
        }
    }
}

impl Validatable for SubscriptionManagerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_per_user == 0 {
            return Err(ConfigError::invalid_value(
                "subscriptions.max_per_user",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Snapshot of subscription statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStats {
    /// Subscriptions held.
    pub total: usize,
    /// Enabled subscriptions.
    pub enabled: usize,
    /// Users owning at least one subscription.
    pub users: usize,
    /// Records passed to `process`.
    pub records_processed: u64,
    /// Matches reported.
    pub total_matches: u64,
    /// Evaluation errors isolated.
    pub evaluation_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    records_processed: AtomicU64,
    total_matches: AtomicU64,
    evaluation_errors: AtomicU64,
}

/// Owns all active subscriptions and evaluates records against them.
///
/// Subscriptions live in a sharded map so that evaluation of one record only
/// locks one shard at a time.
pub struct SubscriptionManager {
    config: SubscriptionManagerConfig,
    subscriptions: DashMap<SubscriptionId, Subscription>,
    by_user: DashMap<UserId, HashSet<SubscriptionId>>,
    error_sink: Arc<dyn ErrorSink>,
    counters: Counters,
}

impl SubscriptionManager {
    /// Creates a manager that logs evaluation errors.
    #[must_use]
    pub fn new(config: SubscriptionManagerConfig) -> Self {
        Self::with_error_sink(config, Arc::new(LoggingErrorSink))
    }

    /// Creates a manager reporting evaluation errors to `error_sink`.
    #[must_use]
    pub fn with_error_sink(config: SubscriptionManagerConfig, error_sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            config,
            subscriptions: DashMap::new(),
            by_user: DashMap::new(),
            error_sink,
            counters: Counters::default(),
        }
    }

    /// Validates and adds a subscription.
    ///
    /// Nothing is stored when validation fails.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed subscriptions or duplicate
    /// ids, and a capacity error when the owner is at `max_per_user`.
    pub fn add(&self, subscription: Subscription) -> Result<SubscriptionId, PulseError> {
        subscription.validate()?;

        let id = subscription.id.clone();
        let user_id = subscription.user_id.clone();

        // The owner's entry stays locked until the subscription is inserted,
        // so concurrent adds cannot overshoot the per-user limit.
        let mut owned = self.by_user.entry(user_id.clone()).or_default();
        let rejection: Option<PulseError> = if owned.len() >= self.config.max_per_user {
            Some(
                CapacityError::SubscriptionLimit {
                    user_id: user_id.to_string(),
                    limit: self.config.max_per_user,
                }
                .into(),
            )
        } else if self.subscriptions.contains_key(&id) {
            Some(
                ValidationError::Duplicate {
                    kind: "subscription".to_string(),
                    id: id.to_string(),
                }
                .into(),
            )
        } else {
            None
        };
        if let Some(error) = rejection {
            let empty = owned.is_empty();
            drop(owned);
            if empty {
                self.by_user.remove_if(&user_id, |_, set| set.is_empty());
            }
            return Err(error);
        }

        owned.insert(id.clone());
        self.subscriptions.insert(id.clone(), subscription);
        drop(owned);

        info!(subscription = %id, user = %user_id, "Subscription added");
        Ok(id)
    }

    /// Removes a subscription.
    pub fn remove(&self, id: &SubscriptionId) -> Option<Subscription> {
        let (_, subscription) = self.subscriptions.remove(id)?;

        if let Some(mut owned) = self.by_user.get_mut(&subscription.user_id) {
            owned.remove(id);
            let empty = owned.is_empty();
            drop(owned);
            if empty {
                self.by_user.remove_if(&subscription.user_id, |_, set| set.is_empty());
            }
        }

        info!(subscription = %id, user = %subscription.user_id, "Subscription removed");
        Some(subscription)
    }

    /// Enables a subscription. Returns false for unknown ids.
    pub fn enable(&self, id: &SubscriptionId) -> bool {
        self.set_enabled(id, true)
    }

    /// Disables a subscription. Returns false for unknown ids.
    pub fn disable(&self, id: &SubscriptionId) -> bool {
        self.set_enabled(id, false)
    }

    /// Sets the enabled flag. Returns false for unknown ids.
    pub fn set_enabled(&self, id: &SubscriptionId, enabled: bool) -> bool {
        match self.subscriptions.get_mut(id) {
            Some(mut subscription) => {
                subscription.enabled = enabled;
                debug!(subscription = %id, enabled, "Subscription toggled");
                true
            }
            None => {
                warn!(subscription = %id, "Toggle requested for unknown subscription");
                false
            }
        }
    }

    /// Replaces a subscription's filter after validating it.
    pub fn set_filter(&self, id: &SubscriptionId, filter: FilterExpression) -> Result<(), PulseError> {
        filter.validate()?;
        if filter.conditions.is_empty() {
            return Err(ValidationError::invalid_value(
                "filter.conditions",
                "at least one condition is required",
            )
            .into());
        }
        let mut subscription = self
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| ValidationError::not_found("subscription", id))?;
        subscription.filter = filter;
        Ok(())
    }

    /// Returns a copy of a subscription.
    #[must_use]
    pub fn get(&self, id: &SubscriptionId) -> Option<Subscription> {
        self.subscriptions.get(id).map(|s| s.clone())
    }

    /// Returns copies of all subscriptions owned by `user_id`.
    #[must_use]
    pub fn user_subscriptions(&self, user_id: &UserId) -> Vec<Subscription> {
        let ids: Vec<SubscriptionId> = self
            .by_user
            .get(user_id)
            .map(|owned| owned.iter().cloned().collect())
            .unwrap_or_default();
        let mut subscriptions: Vec<Subscription> =
            ids.iter().filter_map(|id| self.get(id)).collect();
        subscriptions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        subscriptions
    }

    /// Number of subscriptions held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns true if no subscriptions are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Evaluates `record` against every enabled subscription and returns the
    /// ids that matched.
    ///
    /// Match bookkeeping is updated before an id is appended. The order of
    /// the returned ids is unspecified.
    pub fn process(&self, record: &Record) -> Vec<SubscriptionId> {
        self.process_matches(record)
            .into_iter()
            .map(|m| m.subscription_id)
            .collect()
    }

    /// Like [`process`](Self::process), returning what is needed to build
    /// an alert for each match.
    pub fn process_matches(&self, record: &Record) -> Vec<SubscriptionMatch> {
        let started = Instant::now();
        let now = Utc::now();
        let mut matches = Vec::new();
        let mut failures = Vec::new();

        for mut entry in self.subscriptions.iter_mut() {
            let subscription = entry.value_mut();
            if !subscription.enabled {
                continue;
            }
            match subscription.filter.evaluate(record) {
                Ok(true) => {
                    subscription.record_match(record, now);
                    matches.push(SubscriptionMatch::from_subscription(subscription, record, now));
                }
                Ok(false) => {}
                Err(e) => failures.push((subscription.id.clone(), e)),
            }
        }

        self.counters.records_processed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .total_matches
            .fetch_add(matches.len() as u64, Ordering::Relaxed);
        self.counters
            .evaluation_errors
            .fetch_add(failures.len() as u64, Ordering::Relaxed);

        for (id, error) in &failures {
            self.error_sink.report(id, error);
        }

        PulseMetrics::record_processed(matches.len(), started.elapsed().as_secs_f64());
        debug!(
            matches = matches.len(),
            errors = failures.len(),
            "Record processed"
        );
        matches
    }

    /// Returns a statistics snapshot.
    #[must_use]
    pub fn get_stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            total: self.subscriptions.len(),
            enabled: self.subscriptions.iter().filter(|s| s.enabled).count(),
            users: self.by_user.len(),
            records_processed: self.counters.records_processed.load(Ordering::Relaxed),
            total_matches: self.counters.total_matches.load(Ordering::Relaxed),
            evaluation_errors: self.counters.evaluation_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new(SubscriptionManagerConfig::default())
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("subscriptions", &self.subscriptions.len())
            .field("users", &self.by_user.len())
            .finish_non_exhaustive()
    }
}
