//! The gateway service object.
//!
//! `Gateway` owns the connection pool, the reconnection coordinator, the
//! session registry and the rooms, and wires the websocket delivery handler
//! into the alert pipeline's dispatcher. Nothing here is global; tests build
//! as many isolated gateways as they need.

use crate::config::GatewayConfig;
use crate::delivery::WebSocketDelivery;
use crate::pool::{ConnectionPool, PoolStats};
use crate::reconnect::{CoordinatorStats, FlushReport, ReconnectState, ReconnectionCoordinator};
use crate::room::{RoomBroadcaster, RoomStats};
use crate::session::{Envelope, SessionRegistry};
use parking_lot::Mutex;
use pulse_core::error::{PulseError, ValidationError};
use pulse_core::types::{ConnectionId, Identity, Record};
use pulse_engine::alert::{Alert, DispatcherStats};
use pulse_engine::pipeline::AlertPipeline;
use pulse_engine::subscription::SubscriptionStats;
use pulse_resilience::RegistryStats;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// A client session handed to the transport layer.
#[derive(Debug)]
pub struct ClientSession {
    /// Pooled connection backing the session.
    pub connection_id: ConnectionId,
    /// Outbound frames for the client.
    pub receiver: mpsc::Receiver<Envelope>,
    /// Buffered messages replayed when the session opened.
    pub replay: FlushReport,
}

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Broken or stale pool connections dropped.
    pub pool_removed: usize,
    /// Connections that exhausted their reconnect retries.
    pub failed_purged: usize,
    /// Tracked connections whose pool entry no longer exists.
    pub orphans_dropped: usize,
}

/// Aggregated, read-only statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStats {
    /// Live sessions.
    pub sessions: usize,
    /// Connection pool.
    pub pool: PoolStats,
    /// Reconnection coordinator.
    pub reconnect: CoordinatorStats,
    /// Rooms.
    pub rooms: RoomStats,
    /// Subscriptions.
    pub subscriptions: SubscriptionStats,
    /// Dispatcher.
    pub dispatcher: DispatcherStats,
    /// Circuit breakers.
    pub breakers: RegistryStats,
}

/// Connection gateway.
pub struct Gateway {
    config: GatewayConfig,
    pool: Arc<ConnectionPool>,
    coordinator: Arc<ReconnectionCoordinator>,
    sessions: Arc<SessionRegistry>,
    rooms: Arc<RoomBroadcaster>,
    pipeline: Arc<AlertPipeline>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    /// Builds a gateway around `pipeline` and registers the websocket
    /// handler with its dispatcher.
    #[must_use]
    pub fn new(config: GatewayConfig, pipeline: Arc<AlertPipeline>) -> Self {
        let pool = Arc::new(ConnectionPool::new(config.pool.clone()));
        let coordinator = Arc::new(ReconnectionCoordinator::new(config.reconnect.clone()));
        let sessions = Arc::new(SessionRegistry::new());

        pipeline.dispatcher().register_handler(Arc::new(WebSocketDelivery::new(
            pool.clone(),
            coordinator.clone(),
            sessions.clone(),
            config.session.send_timeout,
        )));
        let rooms = Arc::new(RoomBroadcaster::new(
            config.rooms.clone(),
            pipeline.dispatcher().clone(),
        ));

        Self {
            config,
            pool,
            coordinator,
            sessions,
            rooms,
            pipeline,
            sweeper: Mutex::new(None),
        }
    }

    /// Connection pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Reconnection coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<ReconnectionCoordinator> {
        &self.coordinator
    }

    /// Rooms.
    #[must_use]
    pub fn rooms(&self) -> &Arc<RoomBroadcaster> {
        &self.rooms
    }

    /// Alert pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<AlertPipeline> {
        &self.pipeline
    }

    /// Opens a session for the caller on a pooled connection.
    ///
    /// When the pool hands back one of the caller's parked connections, its
    /// buffered messages are replayed into the new session.
    #[instrument(skip(self, identity), fields(user = %identity.user_id))]
    pub async fn connect(&self, identity: &Identity) -> Result<ClientSession, PulseError> {
        let user_id = identity.user_id.clone();
        let connection_id = self.pool.acquire(Some(&user_id)).await?;
        let receiver = self
            .sessions
            .open(connection_id.clone(), user_id.clone(), self.config.session.queue_size);
        self.coordinator.register(connection_id.clone(), user_id);

        let replay = self.replay(&connection_id).await;
        info!(connection = %connection_id, replayed = replay.sent, "Client connected");
        Ok(ClientSession {
            connection_id,
            receiver,
            replay,
        })
    }

    /// Resumes a disconnected connection and replays its buffer.
    ///
    /// # Errors
    ///
    /// Not found for unknown connections, permission denied for another
    /// user's connection, and an invalid-value rejection when no further
    /// attempt is allowed or the pool no longer holds the connection.
    #[instrument(skip(self, identity), fields(user = %identity.user_id))]
    pub async fn resume(
        &self,
        identity: &Identity,
        connection_id: &ConnectionId,
    ) -> Result<ClientSession, PulseError> {
        let owner = self
            .coordinator
            .owner(connection_id)
            .ok_or_else(|| ValidationError::not_found("connection", connection_id))?;
        if !identity.can_manage(&owner) {
            return Err(ValidationError::permission_denied(format!(
                "connection '{connection_id}' belongs to another user"
            ))
            .into());
        }

        if !self.coordinator.should_attempt_reconnect(connection_id) {
            let state = self.coordinator.state(connection_id);
            return Err(ValidationError::invalid_value(
                "connection_id",
                format!("reconnect not allowed in state {state:?}"),
            )
            .into());
        }
        self.coordinator.record_reconnect_attempt(connection_id);

        if !self.pool.checkout(connection_id) {
            return Err(ValidationError::invalid_value(
                "connection_id",
                "connection is no longer available in the pool",
            )
            .into());
        }

        let receiver = self.sessions.open(
            connection_id.clone(),
            owner,
            self.config.session.queue_size,
        );
        self.coordinator.mark_reconnected(connection_id);
        let replay = self.replay(connection_id).await;
        info!(connection = %connection_id, replayed = replay.sent, "Client resumed");

        Ok(ClientSession {
            connection_id: connection_id.clone(),
            receiver,
            replay,
        })
    }

    /// Suggested wait before the client retries `resume`.
    #[must_use]
    pub fn reconnect_hint(&self, connection_id: &ConnectionId) -> Option<Duration> {
        match self.coordinator.state(connection_id)? {
            ReconnectState::Disconnected => self.coordinator.get_next_reconnect_interval(connection_id),
            ReconnectState::Connected | ReconnectState::ReconnectFailed => None,
        }
    }

    /// Handles a lost transport: the connection goes back to the pool and
    /// further messages are buffered until it resumes.
    pub fn disconnect(&self, connection_id: &ConnectionId, error: bool) {
        self.sessions.close(connection_id);
        self.pool.release(connection_id, error);
        let reason = if error { "transport error" } else { "client disconnected" };
        self.coordinator.mark_disconnected(connection_id, reason);
    }

    /// Ends a connection for good, discarding its buffer.
    pub fn close(&self, connection_id: &ConnectionId) {
        self.sessions.close(connection_id);
        self.coordinator.unregister(connection_id);
        self.pool.remove(connection_id);
        info!(connection = %connection_id, "Connection closed");
    }

    /// Evaluates one record and dispatches the resulting alerts.
    pub async fn process_record(&self, record: &Record) -> Vec<Alert> {
        self.pipeline.process(record).await
    }

    async fn replay(&self, connection_id: &ConnectionId) -> FlushReport {
        let Some(sender) = self.sessions.sender(connection_id) else {
            return FlushReport::default();
        };
        let timeout = self.config.session.send_timeout;
        self.coordinator
            .flush(connection_id, |message| {
                let sender = sender.clone();
                async move {
                    match tokio::time::timeout(timeout, sender.send(Envelope::from(message))).await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(_)) => Err("session queue closed".to_string()),
                        Err(_) => Err(format!("send timed out after {timeout:?}")),
                    }
                }
            })
            .await
    }

    /// Runs one maintenance pass.
    pub fn sweep(&self) -> SweepReport {
        let pool_removed = self.pool.cleanup();

        let failed = self.coordinator.purge_failed();
        for id in &failed {
            self.sessions.close(id);
            if self.pool.contains(id) {
                self.pool.remove(id);
            }
        }

        let mut orphans_dropped = 0;
        for id in self.coordinator.tracked_ids() {
            if !self.pool.contains(&id) {
                self.sessions.close(&id);
                self.coordinator.unregister(&id);
                orphans_dropped += 1;
            }
        }

        let report = SweepReport {
            pool_removed,
            failed_purged: failed.len(),
            orphans_dropped,
        };
        if report != SweepReport::default() {
            debug!(?report, "Gateway sweep");
        }
        report
    }

    /// Starts the background sweeper at the pool's `cleanup_interval`.
    ///
    /// Calling it again while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }
        let interval = self.config.pool.cleanup_interval;
        let prewarmed = self.pool.prewarm();
        let gateway: Weak<Self> = Arc::downgrade(self);
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(gateway) = gateway.upgrade() else {
                    break;
                };
                gateway.sweep();
            }
        }));
        info!(?interval, prewarmed, "Gateway started");
    }

    /// Returns an aggregated statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            sessions: self.sessions.len(),
            pool: self.pool.get_stats(),
            reconnect: self.coordinator.get_stats(),
            rooms: self.rooms.get_stats(),
            subscriptions: self.pipeline.subscriptions().get_stats(),
            dispatcher: self.pipeline.dispatcher().get_stats(),
            breakers: self.pipeline.dispatcher().breakers().get_stats(),
        }
    }

    /// Stops the sweeper, closes every session, clears buffers and drains
    /// the pool. Never blocks.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.sessions.clear();
        self.coordinator.shutdown();
        self.pool.shutdown();
        info!("Gateway shut down");
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("sessions", &self.sessions.len())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
