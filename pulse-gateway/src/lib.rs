//! # Pulse Gateway
//!
//! Client-facing side of the alert layer:
//!
//! - [`pool`]: bounded, health-tracked pool of logical connections
//! - [`buffer`] and [`reconnect`]: per-connection offline buffers and
//!   exponential-backoff reconnection state
//! - [`session`]: live outbound session queues
//! - [`delivery`]: the websocket delivery handler
//! - [`room`]: named rooms with member fan-out
//! - [`hub`]: the [`Gateway`] service object tying it all together

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]

pub mod buffer;
pub mod config;
pub mod delivery;
pub mod hub;
pub mod pool;
pub mod reconnect;
pub mod room;
pub mod session;

pub use buffer::{MessageBuffer, OfflineMessage};
pub use config::{GatewayConfig, PoolConfig, ReconnectConfig, RoomConfig, SessionConfig};
pub use delivery::WebSocketDelivery;
pub use hub::{ClientSession, Gateway, GatewayStats, SweepReport};
pub use pool::{ConnectionPool, PoolConnState, PoolStats, PooledConnection};
pub use reconnect::{CoordinatorStats, FlushReport, ReconnectState, ReconnectionCoordinator};
pub use room::{BroadcastReport, MemberRole, Room, RoomBroadcaster, RoomError, RoomMember, RoomStats, RoomType};
pub use session::{Envelope, SessionRegistry};
