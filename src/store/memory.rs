//! In-memory backend. Used by tests and as a throwaway store for local
//! experimentation; nothing survives a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::types::{Credential, Session, SessionState};

use super::traits::{StoreBackend, StoreError};

#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Keyed by the full composite session id.
    sessions: HashMap<String, Session>,
    /// Keyed by user id.
    credentials: HashMap<String, Credential>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of session rows currently held, in any state.
    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn session_by_id(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.inner.read().sessions.get(id).cloned())
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        self.inner
            .write()
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn close_sticky(&self, sticky_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        for session in inner.sessions.values_mut() {
            if session.sticky_id == sticky_id {
                session.state = SessionState::Expired;
            }
        }
        Ok(())
    }

    async fn shorten_expiry(
        &self,
        id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if let Some(session) = inner.sessions.get_mut(id) {
            if session.state == SessionState::Active && session.expire > deadline {
                session.expire = deadline;
            }
        }
        Ok(())
    }

    async fn close_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.write();
        let mut changed = 0;
        for session in inner.sessions.values_mut() {
            if session.state == SessionState::Active && session.expire < now {
                session.state = SessionState::Expired;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn upsert_credential(
        &self,
        user_id: &str,
        password_hash: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.write().credentials.insert(
            user_id.to_owned(),
            Credential {
                user_id: user_id.to_owned(),
                password_hash: password_hash.to_owned(),
                updated_at,
            },
        );
        Ok(())
    }

    async fn credential(&self, user_id: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self.inner.read().credentials.get(user_id).cloned())
    }
}
