//! Named rooms and member fan-out.
//!
//! A broadcast creates one alert per member and sends it through the
//! dispatcher, so room messages share the breaker-guarded delivery path
//! and the offline buffering of subscription alerts.

use crate::config::RoomConfig;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use pulse_core::error::{CapacityError, PulseError, ValidationError};
use pulse_core::types::{Identity, Record, RoomId, UserId};
use pulse_engine::alert::AlertDispatcher;
use pulse_telemetry::metrics::PulseMetrics;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Room operation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    /// No room with this id.
    #[error("[Room] Room '{room_id}' not found")]
    NotFound {
        /// Room id.
        room_id: String,
    },

    /// The room reached its member limit.
    #[error("[Room] Room '{room_id}' is full ({max_members} members)")]
    Full {
        /// Room id.
        room_id: String,
        /// Member limit.
        max_members: usize,
    },

    /// The user may not perform the operation.
    #[error("[Room] User '{user_id}' may not {action} room '{room_id}'")]
    Forbidden {
        /// Room id.
        room_id: String,
        /// Acting user.
        user_id: String,
        /// Attempted action.
        action: &'static str,
    },

    /// The request is malformed.
    #[error("[Room] Invalid request: {0}")]
    Invalid(String),
}

impl From<RoomError> for PulseError {
    fn from(error: RoomError) -> Self {
        match error {
            RoomError::NotFound { room_id } => ValidationError::not_found("room", room_id).into(),
            RoomError::Full {
                room_id,
                max_members,
            } => CapacityError::RoomFull {
                room_id,
                max_members,
            }
            .into(),
            RoomError::Forbidden { .. } => ValidationError::permission_denied(error.to_string()).into(),
            RoomError::Invalid(reason) => ValidationError::invalid_value("room", reason).into(),
        }
    }
}

/// Who may join a room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomType {
    /// Anyone may join.
    #[default]
    Public,
    /// Owner, admins and invited users only.
    Private,
}

/// Role of a member within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    /// Room creator.
    Owner,
    /// Regular member.
    Member,
}

/// A room member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMember {
    /// Member user id.
    pub user_id: UserId,
    /// Role.
    pub role: MemberRole,
    /// Join time.
    pub joined_at: DateTime<Utc>,
}

/// A room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    /// Room id.
    pub id: RoomId,
    /// Display name.
    pub name: String,
    /// Join policy.
    pub room_type: RoomType,
    /// Creator.
    pub owner_id: UserId,
    /// Member limit.
    pub max_members: usize,
    /// Members by user id.
    pub members: HashMap<UserId, RoomMember>,
    /// Pending invitations.
    pub invited: HashSet<UserId>,
    /// Messages broadcast so far.
    pub message_count: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Room {
    fn can_administer(&self, identity: &Identity) -> bool {
        identity.can_manage(&self.owner_id)
    }

    fn can_join(&self, identity: &Identity) -> bool {
        match self.room_type {
            RoomType::Public => true,
            RoomType::Private => {
                self.can_administer(identity) || self.invited.contains(&identity.user_id)
            }
        }
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReport {
    /// Room broadcast to.
    pub room_id: RoomId,
    /// Members addressed.
    pub recipients: usize,
    /// Members reached by at least one method.
    pub delivered: usize,
}

/// Room statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomStats {
    /// Rooms.
    pub rooms: usize,
    /// Memberships across rooms.
    pub memberships: usize,
    /// Messages broadcast.
    pub messages: u64,
    /// Member alerts not delivered by any method.
    pub undelivered: u64,
}

/// Manages rooms and fans messages out to their members.
pub struct RoomBroadcaster {
    config: RoomConfig,
    rooms: DashMap<RoomId, Room>,
    dispatcher: Arc<AlertDispatcher>,
    messages: AtomicU64,
    undelivered: AtomicU64,
}

impl RoomBroadcaster {
    /// Creates a broadcaster delivering through `dispatcher`.
    #[must_use]
    pub fn new(config: RoomConfig, dispatcher: Arc<AlertDispatcher>) -> Self {
        Self {
            config,
            rooms: DashMap::new(),
            dispatcher,
            messages: AtomicU64::new(0),
            undelivered: AtomicU64::new(0),
        }
    }

    /// Creates a room owned by the caller.
    ///
    /// The owner is not joined automatically.
    pub fn create_room(
        &self,
        owner: &Identity,
        name: impl Into<String>,
        room_type: RoomType,
        max_members: Option<usize>,
    ) -> Result<Room, RoomError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RoomError::Invalid("room name must not be empty".to_string()));
        }
        let max_members = max_members.unwrap_or(self.config.default_max_members);
        if max_members == 0 {
            return Err(RoomError::Invalid("max_members must be greater than 0".to_string()));
        }

        let room = Room {
            id: RoomId::generate(),
            name,
            room_type,
            owner_id: owner.user_id.clone(),
            max_members,
            members: HashMap::new(),
            invited: HashSet::new(),
            message_count: 0,
            created_at: Utc::now(),
        };
        self.rooms.insert(room.id.clone(), room.clone());
        info!(room = %room.id, name = %room.name, owner = %room.owner_id, "Room created");
        Ok(room)
    }

    /// Joins the caller to a room.
    ///
    /// Returns `Ok(false)` if the caller already is a member.
    pub fn join_room(&self, identity: &Identity, room_id: &RoomId) -> Result<bool, RoomError> {
        let mut room = self.room_mut(room_id)?;
        if room.members.contains_key(&identity.user_id) {
            return Ok(false);
        }
        if !room.can_join(identity) {
            return Err(RoomError::Forbidden {
                room_id: room_id.to_string(),
                user_id: identity.user_id.to_string(),
                action: "join",
            });
        }
        if room.members.len() >= room.max_members {
            return Err(RoomError::Full {
                room_id: room_id.to_string(),
                max_members: room.max_members,
            });
        }

        let role = if room.owner_id == identity.user_id {
            MemberRole::Owner
        } else {
            MemberRole::Member
        };
        room.invited.remove(&identity.user_id);
        room.members.insert(
            identity.user_id.clone(),
            RoomMember {
                user_id: identity.user_id.clone(),
                role,
                joined_at: Utc::now(),
            },
        );
        info!(room = %room_id, user = %identity.user_id, members = room.members.len(), "Joined room");
        Ok(true)
    }

    /// Removes a user from a room. Returns false if they were not a member.
    pub fn leave_room(&self, user_id: &UserId, room_id: &RoomId) -> Result<bool, RoomError> {
        let left = self.room_mut(room_id)?.members.remove(user_id).is_some();
        if left {
            info!(room = %room_id, user = %user_id, "Left room");
        }
        Ok(left)
    }

    /// Deletes a room. Only the owner or an admin may do so.
    pub fn delete_room(&self, identity: &Identity, room_id: &RoomId) -> Result<Room, RoomError> {
        self.check_admin(identity, room_id, "delete")?;
        let (_, room) = self
            .rooms
            .remove(room_id)
            .ok_or_else(|| RoomError::NotFound {
                room_id: room_id.to_string(),
            })?;
        info!(room = %room_id, by = %identity.user_id, "Room deleted");
        Ok(room)
    }

    /// Invites a user to a room. Only the owner or an admin may invite.
    pub fn invite(&self, identity: &Identity, room_id: &RoomId, user_id: UserId) -> Result<(), RoomError> {
        self.check_admin(identity, room_id, "invite to")?;
        let mut room = self.room_mut(room_id)?;
        if !room.members.contains_key(&user_id) {
            room.invited.insert(user_id);
        }
        Ok(())
    }

    /// Members of a room.
    pub fn members(&self, room_id: &RoomId) -> Result<Vec<RoomMember>, RoomError> {
        let room = self.rooms.get(room_id).ok_or_else(|| RoomError::NotFound {
            room_id: room_id.to_string(),
        })?;
        let mut members: Vec<_> = room.members.values().cloned().collect();
        members.sort_by_key(|m| m.joined_at);
        Ok(members)
    }

    /// Rooms the user is a member of.
    #[must_use]
    pub fn user_rooms(&self, user_id: &UserId) -> Vec<RoomId> {
        self.rooms
            .iter()
            .filter(|r| r.members.contains_key(user_id))
            .map(|r| r.key().clone())
            .collect()
    }

    /// Snapshot of a room.
    #[must_use]
    pub fn get(&self, room_id: &RoomId) -> Option<Room> {
        self.rooms.get(room_id).map(|r| r.clone())
    }

    /// Sends `message` to every member of a room.
    ///
    /// With a sender set, the sender must be a member. Delivery failures for
    /// individual members are counted, never returned.
    #[instrument(skip(self, message), fields(room = %room_id))]
    pub async fn broadcast(
        &self,
        sender: Option<&UserId>,
        room_id: &RoomId,
        message: Record,
    ) -> Result<BroadcastReport, RoomError> {
        let recipients: Vec<UserId> = {
            let mut room = self.room_mut(room_id)?;
            if let Some(sender) = sender
                && !room.members.contains_key(sender)
            {
                return Err(RoomError::Forbidden {
                    room_id: room_id.to_string(),
                    user_id: sender.to_string(),
                    action: "broadcast to",
                });
            }
            room.message_count += 1;
            room.members.keys().cloned().collect()
        };

        let dispatches = recipients.iter().map(|recipient| {
            let mut alert = self.dispatcher.create_room_alert(
                room_id.clone(),
                sender.cloned(),
                recipient.clone(),
                message.clone(),
                self.config.broadcast_methods.clone(),
            );
            async move {
                self.dispatcher.dispatch(&mut alert).await;
                alert.is_delivered()
            }
        });
        let delivered = join_all(dispatches).await.into_iter().filter(|d| *d).count();

        let missed = recipients.len() - delivered;
        if missed > 0 {
            warn!(missed, "Room message not delivered to every member");
        }
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.undelivered.fetch_add(missed as u64, Ordering::Relaxed);
        PulseMetrics::room_broadcast();

        Ok(BroadcastReport {
            room_id: room_id.clone(),
            recipients: recipients.len(),
            delivered,
        })
    }

    /// Returns a statistics snapshot.
    #[must_use]
    pub fn get_stats(&self) -> RoomStats {
        RoomStats {
            rooms: self.rooms.len(),
            memberships: self.rooms.iter().map(|r| r.members.len()).sum(),
            messages: self.messages.load(Ordering::Relaxed),
            undelivered: self.undelivered.load(Ordering::Relaxed),
        }
    }

    fn room_mut(&self, room_id: &RoomId) -> Result<dashmap::mapref::one::RefMut<'_, RoomId, Room>, RoomError> {
        self.rooms.get_mut(room_id).ok_or_else(|| RoomError::NotFound {
            room_id: room_id.to_string(),
        })
    }

    fn check_admin(&self, identity: &Identity, room_id: &RoomId, action: &'static str) -> Result<(), RoomError> {
        let room = self.rooms.get(room_id).ok_or_else(|| RoomError::NotFound {
            room_id: room_id.to_string(),
        })?;
        if room.can_administer(identity) {
            Ok(())
        } else {
            Err(RoomError::Forbidden {
                room_id: room_id.to_string(),
                user_id: identity.user_id.to_string(),
                action,
            })
        }
    }
}

impl std::fmt::Debug for RoomBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomBroadcaster")
            .field("config", &self.config)
            .field("rooms", &self.rooms.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::types::{ADMIN_ROLE, DeliveryMethod};
    use pulse_engine::alert::{Alert, CallbackHandler, DeliveryReceipt, DispatchConfig};
    use pulse_resilience::CircuitBreakerRegistry;

    fn broadcaster() -> (RoomBroadcaster, Arc<parking_lot::Mutex<Vec<Alert>>>) {
        let dispatcher = AlertDispatcher::new(
            DispatchConfig::default(),
            Arc::new(CircuitBreakerRegistry::default()),
        );
        let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = received.clone();
        dispatcher.register_handler(Arc::new(CallbackHandler::new(
            DeliveryMethod::WebSocket,
            move |alert: &Alert| {
                sink.lock().push(alert.clone());
                Ok(DeliveryReceipt::ONE)
            },
        )));
        (
            RoomBroadcaster::new(RoomConfig::default(), Arc::new(dispatcher)),
            received,
        )
    }

    /// A room of two rejects a third member.
    #[test]
    fn test_scenario_room_capacity() {
        let (rooms, _) = broadcaster();
        let owner = Identity::user("owner");
        let room = rooms.create_room(&owner, "traders", RoomType::Public, Some(2)).unwrap();

        assert!(rooms.join_room(&Identity::user("alice"), &room.id).unwrap());
        assert!(rooms.join_room(&Identity::user("bob"), &room.id).unwrap());
        let err = rooms.join_room(&Identity::user("carol"), &room.id).unwrap_err();

        assert!(matches!(err, RoomError::Full { max_members: 2, .. }));
        assert!(PulseError::from(err).is_capacity_error());
        assert_eq!(rooms.members(&room.id).unwrap().len(), 2);
    }

    #[test]
    fn test_join_is_idempotent_and_owner_role() {
        let (rooms, _) = broadcaster();
        let owner = Identity::user("owner");
        let room = rooms.create_room(&owner, "desk", RoomType::Public, None).unwrap();

        assert!(rooms.join_room(&owner, &room.id).unwrap());
        assert!(!rooms.join_room(&owner, &room.id).unwrap());
        assert_eq!(rooms.members(&room.id).unwrap()[0].role, MemberRole::Owner);
        assert_eq!(rooms.user_rooms(&owner.user_id), vec![room.id.clone()]);

        assert!(rooms.leave_room(&owner.user_id, &room.id).unwrap());
        assert!(!rooms.leave_room(&owner.user_id, &room.id).unwrap());
    }

    #[test]
    fn test_private_room_requires_invite() {
        let (rooms, _) = broadcaster();
        let owner = Identity::user("owner");
        let alice = Identity::user("alice");
        let room = rooms.create_room(&owner, "vip", RoomType::Private, None).unwrap();

        assert!(matches!(
            rooms.join_room(&alice, &room.id),
            Err(RoomError::Forbidden { .. })
        ));
        assert!(rooms.invite(&alice, &room.id, UserId::new("bob")).is_err());

        rooms.invite(&owner, &room.id, alice.user_id.clone()).unwrap();
        assert!(rooms.join_room(&alice, &room.id).unwrap());
        assert!(rooms.get(&room.id).unwrap().invited.is_empty());

        let admin = Identity::new("root", ADMIN_ROLE);
        assert!(rooms.join_room(&admin, &room.id).unwrap());
    }

    #[test]
    fn test_delete_requires_owner() {
        let (rooms, _) = broadcaster();
        let owner = Identity::user("owner");
        let room = rooms.create_room(&owner, "desk", RoomType::Public, None).unwrap();

        assert!(rooms.delete_room(&Identity::user("alice"), &room.id).is_err());
        rooms.delete_room(&owner, &room.id).unwrap();
        assert!(matches!(
            rooms.join_room(&owner, &room.id),
            Err(RoomError::NotFound { .. })
        ));
        assert!(rooms.create_room(&owner, "  ", RoomType::Public, None).is_err());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_member() {
        let (rooms, received) = broadcaster();
        let owner = Identity::user("owner");
        let room = rooms.create_room(&owner, "desk", RoomType::Public, None).unwrap();
        for user in ["alice", "bob", "carol"] {
            rooms.join_room(&Identity::user(user), &room.id).unwrap();
        }

        let alice = UserId::new("alice");
        let report = rooms
            .broadcast(Some(&alice), &room.id, Record::new().with("text", "halted"))
            .await
            .unwrap();
        assert_eq!(report.recipients, 3);
        assert_eq!(report.delivered, 3);

        let alerts = received.lock();
        assert_eq!(alerts.len(), 3);
        assert!(alerts.iter().all(|a| a.room_id() == Some(&room.id)));
        assert!(alerts.iter().all(|a| a.event_name() == "room_message"));
        drop(alerts);

        // Non-members cannot broadcast.
        let err = rooms
            .broadcast(Some(&owner.user_id), &room.id, Record::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::Forbidden { .. }));
        assert_eq!(rooms.get_stats().messages, 1);
        assert_eq!(rooms.get(&room.id).unwrap().message_count, 1);
    }
}
