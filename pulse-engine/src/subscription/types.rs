//! Subscription data types.

use crate::filter::FilterExpression;
use chrono::{DateTime, Utc};
use pulse_core::error::ValidationError;
use pulse_core::types::{DeliveryMethod, Priority, Record, SubscriptionId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

fn default_methods() -> BTreeSet<DeliveryMethod> {
    BTreeSet::from([DeliveryMethod::WebSocket])
}

/// A subscribe request, as received from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    /// Display name.
    pub name: String,
    /// Filter the subscription evaluates.
    pub filter: FilterExpression,
    /// Priority of produced alerts.
    #[serde(default)]
    pub priority: Priority,
    /// Methods used to deliver produced alerts.
    #[serde(default = "default_methods")]
    pub delivery_methods: BTreeSet<DeliveryMethod>,
}

impl NewSubscription {
    /// Creates a request delivering over websocket with medium priority.
    #[must_use]
    pub fn new(name: impl Into<String>, filter: FilterExpression) -> Self {
        Self {
            name: name.into(),
            filter,
            priority: Priority::default(),
            delivery_methods: default_methods(),
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Replaces the delivery methods.
    #[must_use]
    pub fn with_methods(mut self, methods: impl IntoIterator<Item = DeliveryMethod>) -> Self {
        self.delivery_methods = methods.into_iter().collect();
        self
    }
}

/// A user's standing interest.
///
/// The subscription owns its filter expression. Match bookkeeping is only
/// mutated by the [`SubscriptionManager`](super::SubscriptionManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription id.
    pub id: SubscriptionId,
    /// Owner.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// Owned filter expression.
    pub filter: FilterExpression,
    /// Priority of produced alerts.
    pub priority: Priority,
    /// Disabled subscriptions are skipped by `process`.
    pub enabled: bool,
    /// Methods used to deliver produced alerts.
    pub delivery_methods: BTreeSet<DeliveryMethod>,
    /// Number of records matched so far.
    pub match_count: u64,
    /// Time of the latest match.
    pub last_match_time: Option<DateTime<Utc>>,
    /// Record of the latest match.
    pub last_match_data: Option<Record>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Builds a subscription for `user_id` from a request, with a fresh id.
    #[must_use]
    pub fn new(user_id: UserId, request: NewSubscription) -> Self {
        Self {
            id: SubscriptionId::generate(),
            user_id,
            name: request.name,
            filter: request.filter,
            priority: request.priority,
            enabled: true,
            delivery_methods: request.delivery_methods,
            match_count: 0,
            last_match_time: None,
            last_match_data: None,
            created_at: Utc::now(),
        }
    }

    /// Checks the subscription can be added.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "name".to_string(),
            });
        }
        if self.user_id.as_str().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "user_id".to_string(),
            });
        }
        if self.delivery_methods.is_empty() {
            return Err(ValidationError::invalid_value(
                "delivery_methods",
                "at least one delivery method is required",
            ));
        }
        if self.filter.conditions.is_empty() {
            return Err(ValidationError::invalid_value(
                "filter.conditions",
                "at least one condition is required",
            ));
        }
        self.filter.validate()
    }

    pub(crate) fn record_match(&mut self, record: &Record, at: DateTime<Utc>) {
        self.match_count += 1;
        self.last_match_time = Some(at);
        self.last_match_data = Some(record.clone());
    }
}

/// What `process` reports for each matching subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionMatch {
    /// Matching subscription.
    pub subscription_id: SubscriptionId,
    /// Its owner, the alert recipient.
    pub user_id: UserId,
    /// Priority for the alert.
    pub priority: Priority,
    /// Delivery methods for the alert.
    pub delivery_methods: BTreeSet<DeliveryMethod>,
    /// The matched record.
    pub data: Record,
    /// Match time.
    pub matched_at: DateTime<Utc>,
}

impl SubscriptionMatch {
    pub(crate) fn from_subscription(subscription: &Subscription, record: &Record, at: DateTime<Utc>) -> Self {
        Self {
            subscription_id: subscription.id.clone(),
            user_id: subscription.user_id.clone(),
            priority: subscription.priority,
            delivery_methods: subscription.delivery_methods.clone(),
            data: record.clone(),
            matched_at: at,
        }
    }
}
