//! Caller identity and capabilities.
//!
//! Identity is supplied by the external auth layer; the engine trusts the
//! caller id and role and only performs role/relationship checks.

use serde::{Deserialize, Serialize};

use crate::core_types::UserId;

/// Capability level of a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum Role {
    User = 0,
    Moderator = 1,
    Admin = 2,
}

impl Role {
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(Role::User),
            1 => Some(Role::Moderator),
            2 => Some(Role::Admin),
            _ => None,
        }
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }
}

/// A caller making a request against the engine.
///
/// `root_admin` is an internal-only elevated capability: it inherits all
/// admin capabilities plus role management, and is never exposed as a
/// distinct role in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
    pub root_admin: bool,
}

impl Actor {
    pub fn user(id: UserId) -> Self {
        Self {
            id,
            role: Role::User,
            root_admin: false,
        }
    }

    pub fn moderator(id: UserId) -> Self {
        Self {
            id,
            role: Role::Moderator,
            root_admin: false,
        }
    }

    pub fn admin(id: UserId) -> Self {
        Self {
            id,
            role: Role::Admin,
            root_admin: false,
        }
    }

    /// Staff may arbitrate disputes and resolve withdrawals.
    #[inline]
    pub fn is_staff(&self) -> bool {
        self.root_admin || matches!(self.role, Role::Moderator | Role::Admin)
    }

    #[inline]
    pub fn is_admin(&self) -> bool {
        self.root_admin || self.role == Role::Admin
    }
}
