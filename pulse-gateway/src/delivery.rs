//! WebSocket delivery over pooled sessions.

use crate::pool::ConnectionPool;
use crate::reconnect::{ReconnectState, ReconnectionCoordinator};
use crate::session::{Envelope, SessionRegistry};
use async_trait::async_trait;
use futures::future::join_all;
use pulse_core::error::DeliveryError;
use pulse_core::types::{ConnectionId, DeliveryMethod};
use pulse_engine::alert::{Alert, DeliveryHandler, DeliveryReceipt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Routes alerts to every session of the recipient.
///
/// Live sessions get the alert through their outbound queue. All sends run
/// concurrently, each bounded by `send_timeout`. A send that times out or hits a closed queue releases the
/// connection with an error, marks it disconnected and buffers the alert.
/// Connections already disconnected get the alert buffered.
pub struct WebSocketDelivery {
    pool: Arc<ConnectionPool>,
    coordinator: Arc<ReconnectionCoordinator>,
    sessions: Arc<SessionRegistry>,
    send_timeout: Duration,
}

impl WebSocketDelivery {
    /// Creates the handler.
    #[must_use]
    pub fn new(
        pool: Arc<ConnectionPool>,
        coordinator: Arc<ReconnectionCoordinator>,
        sessions: Arc<SessionRegistry>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            coordinator,
            sessions,
            send_timeout,
        }
    }
}

#[async_trait]
impl DeliveryHandler for WebSocketDelivery {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::WebSocket
    }

    async fn deliver(&self, alert: &Alert) -> Result<DeliveryReceipt, DeliveryError> {
        let envelope = Envelope::from_alert(alert)
            .map_err(|e| DeliveryError::transport(DeliveryMethod::WebSocket, e.to_string()))?;

        // Sends run side by side so a slow recipient costs at most one
        // `send_timeout` regardless of how many sessions it holds.
        let sends = self
            .pool
            .connections_for_owner(&alert.recipient)
            .into_iter()
            .map(|id| self.send_one(id, alert, &envelope));
        let outcomes = join_all(sends).await;

        let mut delivered = 0;
        let mut buffered = 0;
        let mut timed_out = 0;
        for outcome in outcomes {
            match outcome {
                SendOutcome::Sent => delivered += 1,
                SendOutcome::Buffered { timed_out: t } => {
                    buffered += 1;
                    timed_out += usize::from(t);
                }
                SendOutcome::Dropped { timed_out: t } => timed_out += usize::from(t),
            }
        }

        debug!(alert = %alert.id, delivered, buffered, timed_out, "WebSocket fan-out finished");
        if delivered > 0 {
            Ok(DeliveryReceipt::Delivered {
                recipients: delivered,
                timed_out,
            })
        } else if buffered > 0 {
            Ok(DeliveryReceipt::Deferred { buffered, timed_out })
        } else if timed_out > 0 {
            Err(DeliveryError::Timeout {
                method: DeliveryMethod::WebSocket.to_string(),
                timeout_ms: u64::try_from(self.send_timeout.as_millis()).unwrap_or(u64::MAX),
            })
        } else {
            Err(DeliveryError::Unreachable {
                method: DeliveryMethod::WebSocket.to_string(),
                recipient: alert.recipient.to_string(),
            })
        }
    }
}

/// Result of sending to one connection.
enum SendOutcome {
    Sent,
    Buffered { timed_out: bool },
    Dropped { timed_out: bool },
}

impl WebSocketDelivery {
    async fn send_one(&self, id: ConnectionId, alert: &Alert, envelope: &Envelope) -> SendOutcome {
        let Some(sender) = self.sessions.sender(&id) else {
            let buffered = self.coordinator.state(&id) == Some(ReconnectState::Disconnected)
                && self.coordinator.buffer_message(&id, envelope.clone().into_offline());
            return if buffered {
                SendOutcome::Buffered { timed_out: false }
            } else {
                SendOutcome::Dropped { timed_out: false }
            };
        };

        let (reason, timed_out) =
            match tokio::time::timeout(self.send_timeout, sender.send(envelope.clone())).await {
                Ok(Ok(())) => {
                    self.pool.touch(&id);
                    return SendOutcome::Sent;
                }
                Ok(Err(_)) => ("session queue closed".to_string(), false),
                Err(_) => (format!("send timed out after {:?}", self.send_timeout), true),
            };

        warn!(connection = %id, alert = %alert.id, reason = %reason, "Session send failed");
        self.sessions.close(&id);
        self.pool.release(&id, true);
        self.coordinator.mark_disconnected(&id, reason);
        if self.coordinator.buffer_message(&id, envelope.clone().into_offline()) {
            SendOutcome::Buffered { timed_out }
        } else {
            SendOutcome::Dropped { timed_out }
        }
    }
}
