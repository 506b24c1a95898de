//! Caller identity handed in by the authentication layer.

use super::UserId;
use serde::{Deserialize, Serialize};

/// Role string that grants access to other users' resources.
pub const ADMIN_ROLE: &str = "admin";

/// An already-verified caller.
///
/// Pulse performs no credential checks; it trusts the user id and role it
/// receives here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Resolved user id.
    pub user_id: UserId,
    /// Resolved role, e.g. `"user"` or `"admin"`.
    pub role: String,
}

impl Identity {
    /// Creates an identity with the given role.
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, role: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: role.into(),
        }
    }

    /// Creates an identity with the plain `user` role.
    #[must_use]
    pub fn user(user_id: impl Into<UserId>) -> Self {
        Self::new(user_id, "user")
    }

    /// Returns true for administrators.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case(ADMIN_ROLE)
    }

    /// Returns true if this caller may act on resources owned by `owner`.
    #[must_use]
    pub fn can_manage(&self, owner: &UserId) -> bool {
        &self.user_id == owner || self.is_admin()
    }
}
