//! Capacity error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A bounded resource was full.
///
/// Capacity errors degrade a single operation and are retryable.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapacityError {
    /// No connection became available before the acquire timeout.
    #[error("[Capacity] Connection pool exhausted (max {max_size}), waited {waited_ms}ms")]
    PoolExhausted {
        /// Hard cap of the pool.
        max_size: usize,
        /// Time spent waiting.
        waited_ms: u64,
    },

    /// The pool has been shut down.
    #[error("[Capacity] Connection pool is shut down")]
    PoolClosed,

    /// A room reached its member limit.
    #[error("[Capacity] Room '{room_id}' is full ({max_members} members)")]
    RoomFull {
        /// Room id.
        room_id: String,
        /// Member limit.
        max_members: usize,
    },

    /// A user reached the subscription limit.
    #[error("[Capacity] User '{user_id}' reached the limit of {limit} subscriptions")]
    SubscriptionLimit {
        /// User id.
        user_id: String,
        /// Configured limit.
        limit: usize,
    },
}

impl CapacityError {
    /// Returns true if the operation may succeed when retried later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }
}
