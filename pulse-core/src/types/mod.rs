//! Core type definitions.
//!
//! Identifiers are opaque string newtypes so that ids of different entities
//! cannot be mixed up at call sites. Records are flat maps of scalar values,
//! which is the only shape the filter layer evaluates.

mod delivery;
mod identity;
mod ids;
mod record;
mod value;

pub use delivery::{DeliveryMethod, Priority};
pub use identity::{ADMIN_ROLE, Identity};
pub use ids::{AlertId, ConnectionId, MessageId, RoomId, SubscriptionId, UserId};
pub use record::Record;
pub use value::FieldValue;
