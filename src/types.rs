//! Core domain types shared across the crate.

use chrono::{DateTime, Utc};

/// Session lifecycle state. The transition is monotonic: once a session is
/// expired it is never reactivated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Expired,
}

impl SessionState {
    /// Column value used by the persistent store.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }

    /// Parse a column value. Anything other than `active` is treated as
    /// expired, so an unknown state can never grant access.
    pub fn from_column(value: &str) -> Self {
        if value == "active" {
            Self::Active
        } else {
            Self::Expired
        }
    }
}

/// One row of the session table.
///
/// A browser session is a chain of rows sharing a `sticky_id`: rotation
/// inserts a new row with a fresh rotating half instead of mutating the
/// old one. The sticky id is useful for auditing and bulk revocation, and
/// must never be used to establish authorization on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Opaque composite token: sticky half + `,` + rotating half.
    pub id: String,
    /// The stable half of `id`, shared by every rotation of this chain.
    pub sticky_id: String,
    pub created_at: DateTime<Utc>,
    /// Inactivity deadline; the row is invalid once `now` passes it.
    pub expire: DateTime<Utc>,
    pub state: SessionState,
    /// Empty string for anonymous (unauthenticated) sessions.
    pub user_id: String,
    /// Controls the expiry horizon and whether the browser cookie outlives
    /// the browser session.
    pub remember_me: bool,
}

impl Session {
    /// True when no user is attached to this session.
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_empty()
    }

    /// True when the row may still authenticate requests at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.state == SessionState::Active && now <= self.expire
    }
}

/// Stored password credential for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: String,
    /// Salted bcrypt hash, opaque to everything but the verifier.
    pub password_hash: String,
    pub updated_at: DateTime<Utc>,
}
