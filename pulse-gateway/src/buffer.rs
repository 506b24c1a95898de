//! Per-connection bounded FIFO of undelivered messages.

use chrono::{DateTime, Utc};
use pulse_core::types::{MessageId, RoomId};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// A message held for a disconnected connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineMessage {
    /// Message id; replay is idempotent per id.
    pub id: MessageId,
    /// Event name the client receives the payload under.
    pub event: String,
    /// Event payload.
    pub payload: serde_json::Value,
    /// Room the message was broadcast to, if any.
    pub room: Option<RoomId>,
    /// Failed replay attempts.
    pub retry_count: u32,
    /// Buffering time.
    pub created_at: DateTime<Utc>,
}

impl OfflineMessage {
    /// Creates a message with a fresh id.
    #[must_use]
    pub fn new(event: impl Into<String>, payload: serde_json::Value, room: Option<RoomId>) -> Self {
        Self {
            id: MessageId::generate(),
            event: event.into(),
            payload,
            room,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// Bounded FIFO; overflow evicts the oldest message.
///
/// Sent ids are remembered so a message handed to the client is never
/// returned by [`get_unsent_messages`](Self::get_unsent_messages) again.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    max_size: usize,
    messages: VecDeque<OfflineMessage>,
    sent: HashSet<MessageId>,
    dropped: u64,
}

impl MessageBuffer {
    /// Creates an empty buffer holding at most `max_size` messages.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            messages: VecDeque::new(),
            sent: HashSet::new(),
            dropped: 0,
        }
    }

    /// Appends a message. Returns the evicted message, if any.
    pub fn add_message(&mut self, message: OfflineMessage) -> Option<OfflineMessage> {
        let evicted = if self.messages.len() >= self.max_size {
            let oldest = self.messages.pop_front();
            if let Some(old) = &oldest {
                self.sent.remove(&old.id);
                self.dropped += 1;
            }
            oldest
        } else {
            None
        };
        self.messages.push_back(message);
        evicted
    }

    /// Buffers a new message built from its parts and returns its id.
    pub fn add(&mut self, event: impl Into<String>, payload: serde_json::Value, room: Option<RoomId>) -> MessageId {
        let message = OfflineMessage::new(event, payload, room);
        let id = message.id.clone();
        self.add_message(message);
        id
    }

    /// Messages not yet marked sent, oldest first.
    #[must_use]
    pub fn get_unsent_messages(&self) -> Vec<OfflineMessage> {
        self.messages
            .iter()
            .filter(|m| !self.sent.contains(&m.id))
            .cloned()
            .collect()
    }

    /// Marks one message sent. Returns false if it was unknown or already sent.
    pub fn mark_sent(&mut self, id: &MessageId) -> bool {
        if self.messages.iter().any(|m| &m.id == id) {
            self.sent.insert(id.clone())
        } else {
            false
        }
    }

    /// Marks every buffered message sent.
    pub fn mark_all_sent(&mut self) {
        self.sent.extend(self.messages.iter().map(|m| m.id.clone()));
    }

    /// Drops sent messages and returns how many were removed.
    pub fn clear_sent(&mut self) -> usize {
        let before = self.messages.len();
        let sent = &self.sent;
        self.messages.retain(|m| !sent.contains(&m.id));
        self.sent.clear();
        before - self.messages.len()
    }

    /// Bumps the retry count of one message.
    pub fn increment_retry(&mut self, id: &MessageId) -> Option<u32> {
        let message = self.messages.iter_mut().find(|m| &m.id == id)?;
        message.retry_count += 1;
        Some(message.retry_count)
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.sent.clear();
    }

    /// Messages held, sent or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages held and not yet sent.
    #[must_use]
    pub fn unsent_count(&self) -> usize {
        self.messages.len() - self.sent.len()
    }

    /// Messages evicted by overflow so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Capacity.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn filled(max_size: usize, count: usize) -> (MessageBuffer, Vec<MessageId>) {
        let mut buffer = MessageBuffer::new(max_size);
        let ids = (0..count)
            .map(|i| buffer.add("alert", json!({ "seq": i }), None))
            .collect();
        (buffer, ids)
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let (buffer, ids) = filled(3, 5);
        let unsent: Vec<_> = buffer.get_unsent_messages().into_iter().map(|m| m.id).collect();
        assert_eq!(unsent, ids[2..].to_vec());
        assert_eq!(buffer.dropped(), 2);
    }

    #[test]
    fn test_mark_sent_is_idempotent() {
        let (mut buffer, ids) = filled(10, 3);
        assert!(buffer.mark_sent(&ids[1]));
        assert!(!buffer.mark_sent(&ids[1]));
        assert!(!buffer.mark_sent(&MessageId::new("msg-unknown")));
        assert_eq!(buffer.unsent_count(), 2);

        buffer.mark_all_sent();
        buffer.mark_all_sent();
        assert!(buffer.get_unsent_messages().is_empty());
        assert_eq!(buffer.clear_sent(), 3);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_increment_retry() {
        let (mut buffer, ids) = filled(10, 1);
        assert_eq!(buffer.increment_retry(&ids[0]), Some(1));
        assert_eq!(buffer.increment_retry(&ids[0]), Some(2));
        assert_eq!(buffer.get_unsent_messages()[0].retry_count, 2);
    }

    #[test]
    fn test_evicting_sent_message_keeps_counts_consistent() {
        let (mut buffer, ids) = filled(2, 2);
        buffer.mark_sent(&ids[0]);
        buffer.add("alert", json!({}), None);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.unsent_count(), 2);
    }

    proptest! {
        #[test]
        fn prop_keeps_latest_n(n in 1usize..20, k in 0usize..40) {
            let (buffer, ids) = filled(n, n + k);
            let kept: Vec<_> = buffer.get_unsent_messages().into_iter().map(|m| m.id).collect();
            prop_assert_eq!(kept, ids[k..].to_vec());
        }

        #[test]
        fn prop_sent_never_reappears(
            count in 1usize..30,
            sent in proptest::collection::vec(any::<prop::sample::Index>(), 0..30),
        ) {
            let (mut buffer, ids) = filled(64, count);
            let marked: HashSet<_> = sent.iter().map(|i| ids[i.index(count)].clone()).collect();
            for id in &marked {
                buffer.mark_sent(id);
            }
            buffer.add("alert", json!({}), None);
            for message in buffer.get_unsent_messages() {
                prop_assert!(!marked.contains(&message.id));
            }
        }
    }
}
