//! Alert data types.

use chrono::{DateTime, Utc};
use pulse_core::types::{AlertId, DeliveryMethod, Priority, Record, RoomId, SubscriptionId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What produced an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertSource {
    /// A subscription matched a record.
    Subscription {
        /// Matching subscription.
        subscription_id: SubscriptionId,
    },
    /// A message was broadcast to a room.
    Room {
        /// Room the message was sent to.
        room_id: RoomId,
        /// Sending member, if any.
        sender: Option<UserId>,
    },
}

/// One notification instance.
///
/// Everything but the `acknowledged` and `delivered` flags is fixed at
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Alert id.
    pub id: AlertId,
    /// Origin of the alert.
    pub source: AlertSource,
    /// User the alert is for.
    pub recipient: UserId,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Payload: the matched record or the room message.
    pub data: Record,
    /// Priority.
    pub priority: Priority,
    /// Methods the dispatcher will try.
    pub delivery_methods: BTreeSet<DeliveryMethod>,
    acknowledged: bool,
    acknowledged_at: Option<DateTime<Utc>>,
    delivered: bool,
}

impl Alert {
    /// Creates an undelivered, unacknowledged alert.
    #[must_use]
    pub fn new(
        source: AlertSource,
        recipient: UserId,
        data: Record,
        priority: Priority,
        delivery_methods: BTreeSet<DeliveryMethod>,
    ) -> Self {
        Self {
            id: AlertId::generate(),
            source,
            recipient,
            timestamp: Utc::now(),
            data,
            priority,
            delivery_methods,
            acknowledged: false,
            acknowledged_at: None,
            delivered: false,
        }
    }

    /// Returns the originating subscription, if any.
    #[must_use]
    pub fn subscription_id(&self) -> Option<&SubscriptionId> {
        match &self.source {
            AlertSource::Subscription { subscription_id } => Some(subscription_id),
            AlertSource::Room { .. } => None,
        }
    }

    /// Returns the originating room, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        match &self.source {
            AlertSource::Room { room_id, .. } => Some(room_id),
            AlertSource::Subscription { .. } => None,
        }
    }

    /// Event name clients receive the alert under.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self.source {
            AlertSource::Subscription { .. } => "alert",
            AlertSource::Room { .. } => "room_message",
        }
    }

    /// Returns true once any delivery method succeeded.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        self.delivered
    }

    /// Returns true once the recipient acknowledged the alert.
    #[must_use]
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    /// Acknowledgement time.
    #[must_use]
    pub fn acknowledged_at(&self) -> Option<DateTime<Utc>> {
        self.acknowledged_at
    }

    /// Marks the alert acknowledged. Returns false if it already was.
    pub fn acknowledge(&mut self) -> bool {
        if self.acknowledged {
            return false;
        }
        self.acknowledged = true;
        self.acknowledged_at = Some(Utc::now());
        true
    }

    pub(crate) fn set_delivered(&mut self, delivered: bool) {
        self.delivered = delivered;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acknowledge_is_idempotent() {
        let mut alert = Alert::new(
            AlertSource::Subscription {
                subscription_id: SubscriptionId::new("s"),
            },
            UserId::new("alice"),
            Record::new(),
            Priority::High,
            BTreeSet::from([DeliveryMethod::WebSocket]),
        );
        assert!(alert.acknowledge());
        let first = alert.acknowledged_at();
        assert!(!alert.acknowledge());
        assert_eq!(alert.acknowledged_at(), first);
        assert_eq!(alert.event_name(), "alert");
    }

    #[test]
    fn test_source_serializes_tagged() {
        let source = AlertSource::Room {
            room_id: RoomId::new("r1"),
            sender: None,
        };
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["kind"], "room");
        assert_eq!(json["room_id"], "r1");
    }
}
