//! Bounded pool of reusable logical connections.
//!
//! The pool is the only component that changes a connection's state. A
//! connection is ACTIVE while checked out, IDLE while parked for reuse,
//! and BROKEN once its error count reaches the threshold. Broken and stale
//! connections are dropped by [`ConnectionPool::cleanup`].

use crate::config::PoolConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pulse_core::error::CapacityError;
use pulse_core::types::{ConnectionId, UserId};
use pulse_telemetry::metrics::PulseMetrics;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Lifecycle state of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolConnState {
    /// Parked, available for reuse.
    Idle,
    /// Checked out by a session.
    Active,
    /// Idle past the stale timeout, about to be dropped.
    Stale,
    /// Reached the error threshold; never handed out again.
    Broken,
}

/// A logical connection owned by the pool.
#[derive(Debug, Clone)]
pub struct PooledConnection {
    /// Connection id.
    pub id: ConnectionId,
    /// Owning user, once assigned.
    pub user_id: Option<UserId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last activity (creation, checkout, touch or release).
    pub last_activity: Instant,
    /// Current state.
    pub state: PoolConnState,
    /// Number of recorded activities.
    pub activity_count: u64,
    /// Errors reported on release.
    pub error_count: u32,
    /// Times the connection was handed out again after release.
    pub reuse_count: u64,
}

impl PooledConnection {
    fn new(user_id: Option<UserId>) -> Self {
        Self {
            id: ConnectionId::generate(),
            user_id,
            created_at: Utc::now(),
            last_activity: Instant::now(),
            state: PoolConnState::Active,
            activity_count: 0,
            error_count: 0,
            reuse_count: 0,
        }
    }

    /// Returns true if the connection may be handed out.
    #[must_use]
    pub fn is_healthy(&self, error_threshold: u32) -> bool {
        self.state != PoolConnState::Broken && self.error_count < error_threshold
    }

    /// Returns true if the connection has been idle longer than `stale_timeout`.
    #[must_use]
    pub fn is_stale(&self, stale_timeout: Duration) -> bool {
        matches!(self.state, PoolConnState::Idle | PoolConnState::Stale)
            && self.last_activity.elapsed() > stale_timeout
    }

    fn activate(&mut self) {
        self.state = PoolConnState::Active;
        self.last_activity = Instant::now();
        self.activity_count += 1;
    }
}

/// Pool statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    /// Connections held, in any state.
    pub total: usize,
    /// Idle connections.
    pub idle: usize,
    /// Active connections.
    pub active: usize,
    /// Broken connections awaiting cleanup.
    pub broken: usize,
    /// Hard cap on live connections.
    pub max_size: usize,
    /// Owners with at least one connection.
    pub owners: usize,
    /// Successful acquisitions.
    pub acquired: u64,
    /// Connections created.
    pub created: u64,
    /// Acquisitions served from the idle set.
    pub reused: u64,
    /// Acquisitions that timed out.
    pub exhausted: u64,
    /// Fraction of acquisitions served from the idle set.
    pub hit_rate: f64,
    /// Average reuse count over held connections.
    pub avg_reuse: f64,
}

#[derive(Debug, Default)]
struct PoolInner {
    connections: HashMap<ConnectionId, PooledConnection>,
    idle: VecDeque<ConnectionId>,
    by_owner: HashMap<UserId, HashSet<ConnectionId>>,
    closed: bool,
    acquired: u64,
    created: u64,
    reused: u64,
    exhausted: u64,
}

impl PoolInner {
    fn live_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.state != PoolConnState::Broken)
            .count()
    }

    fn index_owner(&mut self, owner: &UserId, id: &ConnectionId) {
        self.by_owner.entry(owner.clone()).or_default().insert(id.clone());
    }

    fn unindex_owner(&mut self, owner: &UserId, id: &ConnectionId) {
        if let Some(owned) = self.by_owner.get_mut(owner) {
            owned.remove(id);
            if owned.is_empty() {
                self.by_owner.remove(owner);
            }
        }
    }

    fn drop_connection(&mut self, id: &ConnectionId) -> Option<PooledConnection> {
        let conn = self.connections.remove(id)?;
        self.idle.retain(|i| i != id);
        if let Some(owner) = &conn.user_id {
            self.unindex_owner(owner, id);
        }
        Some(conn)
    }

    fn insert(&mut self, conn: PooledConnection) -> ConnectionId {
        let id = conn.id.clone();
        if let Some(owner) = &conn.user_id {
            self.index_owner(owner, &id);
        }
        self.connections.insert(id.clone(), conn);
        self.created += 1;
        id
    }

    /// Picks an idle connection for `owner`: its own first, then unowned.
    fn take_idle(&mut self, owner: Option<&UserId>, config: &PoolConfig) -> Option<ConnectionId> {
        loop {
            let position = owner
                .and_then(|o| {
                    self.idle.iter().position(|id| {
                        self.connections
                            .get(id)
                            .is_some_and(|c| c.user_id.as_ref() == Some(o))
                    })
                })
                .or_else(|| {
                    self.idle.iter().position(|id| {
                        self.connections.get(id).is_some_and(|c| c.user_id.is_none())
                    })
                })?;
            let id = self.idle.remove(position)?;

            let valid = self.connections.get(&id).is_some_and(|c| {
                c.is_healthy(config.error_threshold) && !c.is_stale(config.stale_timeout)
            });
            if !valid {
                debug!(connection = %id, "Discarding invalid idle connection");
                self.drop_connection(&id);
                continue;
            }

            if let Some(owner) = owner
                && self.connections.get(&id).is_some_and(|c| c.user_id.is_none())
            {
                self.index_owner(owner, &id);
            }
            let conn = self.connections.get_mut(&id)?;
            if conn.user_id.is_none() {
                conn.user_id = owner.cloned();
            }
            conn.reuse_count += 1;
            conn.activate();
            self.reused += 1;
            return Some(id);
        }
    }

    /// Frees a slot at capacity by dropping the least recently used idle
    /// connection, whoever owns it. Callers try `take_idle` first, so the
    /// requester's own idle connections are reused rather than reclaimed.
    fn reclaim_idle(&mut self) -> bool {
        let victim = self
            .idle
            .iter()
            .filter_map(|id| self.connections.get(id))
            .min_by_key(|c| c.last_activity)
            .map(|c| c.id.clone());
        match victim {
            Some(id) => {
                debug!(connection = %id, "Reclaiming least recently used idle connection");
                self.drop_connection(&id);
                true
            }
            None => false,
        }
    }
}

/// Bounded, health-tracked connection pool.
///
/// # Example
///
/// ```
/// use pulse_gateway::config::PoolConfig;
/// use pulse_gateway::pool::ConnectionPool;
///
/// let pool = ConnectionPool::new(PoolConfig { max_size: 1, ..PoolConfig::default() });
/// let id = pool.try_acquire(None).unwrap().unwrap();
/// assert!(pool.try_acquire(None).unwrap().is_none());
/// pool.release(&id, false);
/// assert_eq!(pool.try_acquire(None).unwrap(), Some(id));
/// ```
#[derive(Debug)]
pub struct ConnectionPool {
    config: PoolConfig,
    inner: Mutex<PoolInner>,
    released: Notify,
}

impl ConnectionPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(PoolInner::default()),
            released: Notify::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Acquires a connection without waiting.
    ///
    /// Returns `Ok(None)` when the pool is at capacity.
    pub fn try_acquire(&self, owner: Option<&UserId>) -> Result<Option<ConnectionId>, CapacityError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(CapacityError::PoolClosed);
        }

        if let Some(id) = inner.take_idle(owner, &self.config) {
            inner.acquired += 1;
            debug!(connection = %id, "Reused idle connection");
            return Ok(Some(id));
        }

        if inner.live_count() >= self.config.max_size && !inner.reclaim_idle() {
            return Ok(None);
        }

        let mut conn = PooledConnection::new(owner.cloned());
        conn.activity_count = 1;
        let id = inner.insert(conn);
        inner.acquired += 1;
        debug!(connection = %id, "Created connection");
        Ok(Some(id))
    }

    /// Acquires a connection, waiting up to `acquire_timeout` for a free slot.
    ///
    /// # Errors
    ///
    /// [`CapacityError::PoolExhausted`] (retryable) when no slot freed up in
    /// time, [`CapacityError::PoolClosed`] after shutdown.
    pub async fn acquire(&self, owner: Option<&UserId>) -> Result<ConnectionId, CapacityError> {
        let started = Instant::now();
        let deadline = started + self.config.acquire_timeout;

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(id) = self.try_acquire(owner)? {
                return Ok(id);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                self.inner.lock().exhausted += 1;
                PulseMetrics::pool_exhausted();
                let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                warn!(
                    max_size = self.config.max_size,
                    waited_ms, "Connection pool exhausted"
                );
                return Err(CapacityError::PoolExhausted {
                    max_size: self.config.max_size,
                    waited_ms,
                });
            }
        }
    }

    /// Returns a connection to the pool.
    ///
    /// With `error` set the error count is bumped; at the threshold the
    /// connection becomes BROKEN for good. Unknown or non-active ids are
    /// ignored with a warning.
    pub fn release(&self, id: &ConnectionId, error: bool) {
        let mut inner = self.inner.lock();
        let Some(conn) = inner.connections.get_mut(id) else {
            warn!(connection = %id, "Release of unknown connection ignored");
            return;
        };
        if conn.state != PoolConnState::Active {
            warn!(connection = %id, state = ?conn.state, "Release of inactive connection ignored");
            return;
        }

        conn.last_activity = Instant::now();
        if error {
            conn.error_count += 1;
        }
        if conn.error_count >= self.config.error_threshold {
            conn.state = PoolConnState::Broken;
            warn!(connection = %id, errors = conn.error_count, "Connection marked broken");
        } else {
            conn.state = PoolConnState::Idle;
            inner.idle.push_back(id.clone());
        }
        drop(inner);
        self.released.notify_waiters();
    }

    /// Adds an externally created connection as ACTIVE.
    ///
    /// Registering a known id is a no-op.
    ///
    /// # Errors
    ///
    /// [`CapacityError::PoolExhausted`] if the pool is full,
    /// [`CapacityError::PoolClosed`] after shutdown.
    pub fn register(&self, id: ConnectionId, owner: Option<UserId>) -> Result<(), CapacityError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(CapacityError::PoolClosed);
        }
        if inner.connections.contains_key(&id) {
            warn!(connection = %id, "Connection already registered");
            return Ok(());
        }
        if inner.live_count() >= self.config.max_size && !inner.reclaim_idle() {
            return Err(CapacityError::PoolExhausted {
                max_size: self.config.max_size,
                waited_ms: 0,
            });
        }
        let mut conn = PooledConnection::new(owner);
        conn.id = id;
        conn.activity_count = 1;
        inner.insert(conn);
        Ok(())
    }

    /// Re-activates one specific idle connection, e.g. on session resume.
    ///
    /// Returns false if the connection is unknown, not idle, broken or stale.
    pub fn checkout(&self, id: &ConnectionId) -> bool {
        let mut inner = self.inner.lock();
        let valid = inner.connections.get(id).is_some_and(|c| {
            c.state == PoolConnState::Idle
                && c.is_healthy(self.config.error_threshold)
                && !c.is_stale(self.config.stale_timeout)
        });
        if !valid {
            return false;
        }
        inner.idle.retain(|i| i != id);
        inner.acquired += 1;
        inner.reused += 1;
        if let Some(conn) = inner.connections.get_mut(id) {
            conn.reuse_count += 1;
            conn.activate();
        }
        true
    }

    /// Records activity on a connection.
    pub fn touch(&self, id: &ConnectionId) -> bool {
        let mut inner = self.inner.lock();
        match inner.connections.get_mut(id) {
            Some(conn) => {
                conn.last_activity = Instant::now();
                conn.activity_count += 1;
                true
            }
            None => false,
        }
    }

    /// Drops a connection from the pool.
    pub fn remove(&self, id: &ConnectionId) -> Option<PooledConnection> {
        let removed = self.inner.lock().drop_connection(id);
        if removed.is_some() {
            self.released.notify_waiters();
        } else {
            warn!(connection = %id, "Removal of unknown connection ignored");
        }
        removed
    }

    /// Returns true if the pool holds `id`.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.lock().connections.contains_key(id)
    }

    /// Returns a snapshot of one connection.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<PooledConnection> {
        self.inner.lock().connections.get(id).cloned()
    }

    /// Connections owned by `owner`.
    #[must_use]
    pub fn connections_for_owner(&self, owner: &UserId) -> Vec<ConnectionId> {
        self.inner
            .lock()
            .by_owner
            .get(owner)
            .map(|owned| owned.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Creates unowned idle connections up to `min_size`.
    pub fn prewarm(&self) -> usize {
        let mut inner = self.inner.lock();
        if inner.closed {
            return 0;
        }
        let mut created = 0;
        while inner.live_count() < self.config.min_size.min(self.config.max_size) {
            let mut conn = PooledConnection::new(None);
            conn.state = PoolConnState::Idle;
            let id = inner.insert(conn);
            inner.idle.push_back(id);
            created += 1;
        }
        if created > 0 {
            info!(created, min_size = self.config.min_size, "Pre-warmed connection pool");
        }
        created
    }

    /// Drops broken connections and idle ones past the stale timeout.
    ///
    /// Returns the number of connections removed.
    pub fn cleanup(&self) -> usize {
        let mut inner = self.inner.lock();
        let doomed: Vec<ConnectionId> = inner
            .connections
            .values_mut()
            .filter_map(|c| {
                if c.is_stale(self.config.stale_timeout) {
                    c.state = PoolConnState::Stale;
                }
                matches!(c.state, PoolConnState::Broken | PoolConnState::Stale).then(|| c.id.clone())
            })
            .collect();
        for id in &doomed {
            inner.drop_connection(id);
        }
        drop(inner);

        if !doomed.is_empty() {
            debug!(removed = doomed.len(), "Pool cleanup removed connections");
            self.released.notify_waiters();
        }
        self.publish_gauges();
        doomed.len()
    }

    /// Drops every connection and fails current and future acquisitions.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let dropped = inner.connections.len();
        inner.connections.clear();
        inner.idle.clear();
        inner.by_owner.clear();
        drop(inner);
        self.released.notify_waiters();
        info!(dropped, "Connection pool shut down");
    }

    /// Returns a statistics snapshot.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn get_stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        let count = |state| inner.connections.values().filter(|c| c.state == state).count();
        let total = inner.connections.len();
        let reuse_sum: u64 = inner.connections.values().map(|c| c.reuse_count).sum();
        PoolStats {
            total,
            idle: count(PoolConnState::Idle),
            active: count(PoolConnState::Active),
            broken: count(PoolConnState::Broken),
            max_size: self.config.max_size,
            owners: inner.by_owner.len(),
            acquired: inner.acquired,
            created: inner.created,
            reused: inner.reused,
            exhausted: inner.exhausted,
            hit_rate: if inner.acquired == 0 {
                0.0
            } else {
                inner.reused as f64 / inner.acquired as f64
            },
            avg_reuse: if total == 0 {
                0.0
            } else {
                reuse_sum as f64 / total as f64
            },
        }
    }

    fn publish_gauges(&self) {
        let stats = self.get_stats();
        PulseMetrics::pool_connections(stats.idle, stats.active, stats.broken);
    }
}
