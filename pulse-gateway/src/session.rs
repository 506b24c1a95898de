//! Live client sessions and their outbound queues.

use crate::buffer::OfflineMessage;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pulse_core::types::{ConnectionId, MessageId, RoomId, UserId};
use pulse_engine::alert::Alert;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// One outbound frame as the client receives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message id, stable across buffering and replay.
    pub id: MessageId,
    /// Event name (`alert`, `room_message`).
    pub event: String,
    /// Event payload.
    pub payload: serde_json::Value,
    /// Room the message belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// True when delivered from the offline buffer.
    #[serde(default)]
    pub replayed: bool,
}

impl Envelope {
    /// Wraps an alert.
    pub fn from_alert(alert: &Alert) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: MessageId::new(alert.id.as_str()),
            event: alert.event_name().to_string(),
            payload: serde_json::to_value(alert)?,
            room: alert.room_id().cloned(),
            created_at: alert.timestamp,
            replayed: false,
        })
    }

    /// Converts into a message for the offline buffer.
    #[must_use]
    pub fn into_offline(self) -> OfflineMessage {
        OfflineMessage {
            id: self.id,
            event: self.event,
            payload: self.payload,
            room: self.room,
            retry_count: 0,
            created_at: self.created_at,
        }
    }
}

impl From<OfflineMessage> for Envelope {
    fn from(message: OfflineMessage) -> Self {
        Self {
            id: message.id,
            event: message.event,
            payload: message.payload,
            room: message.room,
            created_at: message.created_at,
            replayed: true,
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    user_id: UserId,
    sender: mpsc::Sender<Envelope>,
    opened_at: DateTime<Utc>,
}

/// Registry of live sessions keyed by connection.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, Session>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session, replacing any previous one for the connection.
    ///
    /// Returns the receiving end the transport task drains.
    pub fn open(&self, id: ConnectionId, user_id: UserId, queue_size: usize) -> mpsc::Receiver<Envelope> {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        debug!(connection = %id, user = %user_id, "Session opened");
        self.sessions.insert(
            id,
            Session {
                user_id,
                sender,
                opened_at: Utc::now(),
            },
        );
        receiver
    }

    /// Closes a session. The receiver sees the channel end.
    pub fn close(&self, id: &ConnectionId) -> bool {
        let closed = self.sessions.remove(id).is_some();
        if closed {
            debug!(connection = %id, "Session closed");
        }
        closed
    }

    /// Sender of a live session.
    #[must_use]
    pub fn sender(&self, id: &ConnectionId) -> Option<mpsc::Sender<Envelope>> {
        self.sessions.get(id).map(|s| s.sender.clone())
    }

    /// Owner of a live session.
    #[must_use]
    pub fn user_of(&self, id: &ConnectionId) -> Option<UserId> {
        self.sessions.get(id).map(|s| s.user_id.clone())
    }

    /// When the session was opened.
    #[must_use]
    pub fn opened_at(&self, id: &ConnectionId) -> Option<DateTime<Utc>> {
        self.sessions.get(id).map(|s| s.opened_at)
    }

    /// Returns true if the connection has a live session.
    #[must_use]
    pub fn is_live(&self, id: &ConnectionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Closes every session.
    pub fn clear(&self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_open_send_close() {
        let registry = SessionRegistry::new();
        let id = ConnectionId::new("conn-1");
        let mut rx = registry.open(id.clone(), UserId::new("alice"), 4);

        let message = OfflineMessage::new("alert", json!({"price": 1850}), None);
        registry.sender(&id).unwrap().send(message.clone().into()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, message.id);
        assert!(received.replayed);

        assert!(registry.close(&id));
        assert!(!registry.close(&id));
        assert!(rx.recv().await.is_none());
        assert!(registry.sender(&id).is_none());
    }
}
