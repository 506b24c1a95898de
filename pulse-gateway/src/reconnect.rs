//! Reconnection state and offline buffering per tracked connection.
//!
//! ```text
//! CONNECTED -> DISCONNECTED -> (attempts) -> CONNECTED
//!                           \-> RECONNECT_FAILED (terminal until re-registration)
//! ```

use crate::buffer::{MessageBuffer, OfflineMessage};
use crate::config::ReconnectConfig;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pulse_core::types::{ConnectionId, UserId};
use pulse_resilience::ExponentialBackoff;
use pulse_telemetry::metrics::PulseMetrics;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reconnection state of a tracked connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconnectState {
    /// Live session attached.
    Connected,
    /// Session lost; messages are buffered.
    Disconnected,
    /// Retries exhausted.
    ReconnectFailed,
}

#[derive(Debug)]
struct TrackedConnection {
    user_id: UserId,
    state: ReconnectState,
    attempts: u32,
    last_error: Option<String>,
    disconnected_at: Option<DateTime<Utc>>,
    buffer: MessageBuffer,
}

/// Outcome of a buffer flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    /// Messages delivered and marked sent.
    pub sent: usize,
    /// Messages still buffered.
    pub remaining: usize,
}

/// Coordinator statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorStats {
    /// Tracked connections.
    pub tracked: usize,
    /// Connected.
    pub connected: usize,
    /// Disconnected, still retrying.
    pub disconnected: usize,
    /// Retries exhausted.
    pub failed: usize,
    /// Unsent messages across all buffers.
    pub buffered_messages: usize,
    /// Messages evicted by buffer overflow.
    pub dropped_messages: u64,
}

/// Tracks connections through disconnects and owns their offline buffers.
#[derive(Debug)]
pub struct ReconnectionCoordinator {
    config: ReconnectConfig,
    backoff: ExponentialBackoff,
    tracked: DashMap<ConnectionId, TrackedConnection>,
}

impl ReconnectionCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        let backoff = ExponentialBackoff::new(config.base_interval, config.max_interval);
        Self {
            config,
            backoff,
            tracked: DashMap::new(),
        }
    }

    /// Tracks a connection as CONNECTED.
    ///
    /// Re-registering resets state and attempts but keeps buffered messages.
    pub fn register(&self, id: ConnectionId, user_id: UserId) {
        self.tracked
            .entry(id.clone())
            .and_modify(|t| {
                t.user_id = user_id.clone();
                t.state = ReconnectState::Connected;
                t.attempts = 0;
                t.last_error = None;
                t.disconnected_at = None;
            })
            .or_insert_with(|| TrackedConnection {
                user_id: user_id.clone(),
                state: ReconnectState::Connected,
                attempts: 0,
                last_error: None,
                disconnected_at: None,
                buffer: MessageBuffer::new(self.config.buffer_size),
            });
        debug!(connection = %id, user = %user_id, "Tracking connection");
    }

    /// Stops tracking a connection and drops its buffer.
    ///
    /// Returns the number of unsent messages discarded.
    pub fn unregister(&self, id: &ConnectionId) -> Option<usize> {
        let (_, tracked) = self.tracked.remove(id)?;
        let unsent = tracked.buffer.unsent_count();
        if unsent > 0 {
            warn!(connection = %id, unsent, "Dropping unsent buffered messages");
        }
        Some(unsent)
    }

    /// Marks a connection DISCONNECTED.
    pub fn mark_disconnected(&self, id: &ConnectionId, reason: impl Into<String>) -> bool {
        let Some(mut tracked) = self.tracked.get_mut(id) else {
            warn!(connection = %id, "Disconnect of untracked connection ignored");
            return false;
        };
        let reason = reason.into();
        if tracked.state == ReconnectState::Connected {
            tracked.state = ReconnectState::Disconnected;
            tracked.disconnected_at = Some(Utc::now());
            info!(connection = %id, user = %tracked.user_id, reason = %reason, "Connection lost");
        }
        tracked.last_error = Some(reason);
        true
    }

    /// Returns true if another reconnect attempt is allowed.
    ///
    /// Exhausting `max_retries` moves the connection to RECONNECT_FAILED.
    pub fn should_attempt_reconnect(&self, id: &ConnectionId) -> bool {
        let Some(mut tracked) = self.tracked.get_mut(id) else {
            return false;
        };
        match tracked.state {
            ReconnectState::Connected | ReconnectState::ReconnectFailed => false,
            ReconnectState::Disconnected if tracked.attempts >= self.config.max_retries => {
                tracked.state = ReconnectState::ReconnectFailed;
                warn!(
                    connection = %id,
                    attempts = tracked.attempts,
                    "Reconnect retries exhausted"
                );
                false
            }
            ReconnectState::Disconnected => true,
        }
    }

    /// Delay before the next attempt: `base_interval * 2^attempts`, capped.
    #[must_use]
    pub fn get_next_reconnect_interval(&self, id: &ConnectionId) -> Option<Duration> {
        self.tracked
            .get(id)
            .map(|t| self.backoff.delay_for(t.attempts))
    }

    /// Counts one reconnect attempt and returns the new total.
    pub fn record_reconnect_attempt(&self, id: &ConnectionId) -> Option<u32> {
        let mut tracked = self.tracked.get_mut(id)?;
        tracked.attempts += 1;
        Some(tracked.attempts)
    }

    /// Marks a connection CONNECTED again, resetting attempts and the error.
    ///
    /// Fails for unknown connections and ones that exhausted their retries.
    pub fn mark_reconnected(&self, id: &ConnectionId) -> bool {
        let Some(mut tracked) = self.tracked.get_mut(id) else {
            return false;
        };
        if tracked.state == ReconnectState::ReconnectFailed {
            return false;
        }
        tracked.state = ReconnectState::Connected;
        tracked.attempts = 0;
        tracked.last_error = None;
        tracked.disconnected_at = None;
        info!(
            connection = %id,
            buffered = tracked.buffer.unsent_count(),
            "Connection restored"
        );
        true
    }

    /// Current state of a connection.
    #[must_use]
    pub fn state(&self, id: &ConnectionId) -> Option<ReconnectState> {
        self.tracked.get(id).map(|t| t.state)
    }

    /// Attempts since the last disconnect.
    #[must_use]
    pub fn attempts(&self, id: &ConnectionId) -> Option<u32> {
        self.tracked.get(id).map(|t| t.attempts)
    }

    /// Last disconnect reason.
    #[must_use]
    pub fn last_error(&self, id: &ConnectionId) -> Option<String> {
        self.tracked.get(id).and_then(|t| t.last_error.clone())
    }

    /// Owner of a tracked connection.
    #[must_use]
    pub fn owner(&self, id: &ConnectionId) -> Option<UserId> {
        self.tracked.get(id).map(|t| t.user_id.clone())
    }

    /// Returns true if the connection is tracked.
    #[must_use]
    pub fn is_tracked(&self, id: &ConnectionId) -> bool {
        self.tracked.contains_key(id)
    }

    /// Buffers a message for a connection that retries remain for.
    ///
    /// Returns false if the connection is untracked or gave up reconnecting.
    pub fn buffer_message(&self, id: &ConnectionId, message: OfflineMessage) -> bool {
        let Some(mut tracked) = self.tracked.get_mut(id) else {
            return false;
        };
        if tracked.state == ReconnectState::ReconnectFailed {
            return false;
        }
        let evicted = tracked.buffer.add_message(message);
        if let Some(old) = &evicted {
            debug!(connection = %id, evicted = %old.id, "Buffer full, evicted oldest message");
        }
        PulseMetrics::message_buffered(evicted.is_some());
        true
    }

    /// Unsent messages for a connection, oldest first.
    #[must_use]
    pub fn unsent_messages(&self, id: &ConnectionId) -> Vec<OfflineMessage> {
        self.tracked
            .get(id)
            .map(|t| t.buffer.get_unsent_messages())
            .unwrap_or_default()
    }

    /// Replays buffered messages through `send`, oldest first.
    ///
    /// Only CONNECTED connections are flushed. Each message is marked sent
    /// right after its send succeeds. The first failure stops the flush so
    /// later messages cannot overtake it; its retry count is bumped.
    pub async fn flush<F, Fut, E>(&self, id: &ConnectionId, mut send: F) -> FlushReport
    where
        F: FnMut(OfflineMessage) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        let pending = match self.tracked.get(id) {
            Some(t) if t.state == ReconnectState::Connected => t.buffer.get_unsent_messages(),
            Some(t) => {
                return FlushReport {
                    sent: 0,
                    remaining: t.buffer.unsent_count(),
                };
            }
            None => return FlushReport::default(),
        };

        let mut sent = 0;
        for message in pending {
            let message_id = message.id.clone();
            match send(message).await {
                Ok(()) => {
                    if let Some(mut t) = self.tracked.get_mut(id) {
                        t.buffer.mark_sent(&message_id);
                    }
                    sent += 1;
                }
                Err(e) => {
                    if let Some(mut t) = self.tracked.get_mut(id) {
                        t.buffer.increment_retry(&message_id);
                    }
                    warn!(connection = %id, message = %message_id, error = %e, "Replay stopped");
                    break;
                }
            }
        }

        let remaining = self
            .tracked
            .get_mut(id)
            .map(|mut t| {
                t.buffer.clear_sent();
                t.buffer.unsent_count()
            })
            .unwrap_or_default();

        if sent > 0 {
            PulseMetrics::messages_replayed(sent);
            info!(connection = %id, sent, remaining, "Replayed buffered messages");
        }
        FlushReport { sent, remaining }
    }

    /// Stops tracking connections that exhausted their retries.
    ///
    /// Returns the purged ids.
    pub fn purge_failed(&self) -> Vec<ConnectionId> {
        let failed: Vec<ConnectionId> = self
            .tracked
            .iter()
            .filter(|t| t.state == ReconnectState::ReconnectFailed)
            .map(|t| t.key().clone())
            .collect();
        for id in &failed {
            self.tracked
                .remove_if(id, |_, t| t.state == ReconnectState::ReconnectFailed);
        }
        if !failed.is_empty() {
            info!(purged = failed.len(), "Purged failed connections");
        }
        failed
    }

    /// Tracked connection ids.
    #[must_use]
    pub fn tracked_ids(&self) -> Vec<ConnectionId> {
        self.tracked.iter().map(|t| t.key().clone()).collect()
    }

    /// Returns a statistics snapshot.
    #[must_use]
    pub fn get_stats(&self) -> CoordinatorStats {
        let mut stats = CoordinatorStats::default();
        for t in self.tracked.iter() {
            stats.tracked += 1;
            match t.state {
                ReconnectState::Connected => stats.connected += 1,
                ReconnectState::Disconnected => stats.disconnected += 1,
                ReconnectState::ReconnectFailed => stats.failed += 1,
            }
            stats.buffered_messages += t.buffer.unsent_count();
            stats.dropped_messages += t.buffer.dropped();
        }
        stats
    }

    /// Clears every buffer and stops tracking everything.
    pub fn shutdown(&self) {
        let tracked = self.tracked.len();
        self.tracked.clear();
        info!(tracked, "Reconnection coordinator shut down");
    }
}
