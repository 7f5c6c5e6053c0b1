//! Storage abstraction for session and credential persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Credential, Session};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage task failed: {0}")]
    Runtime(String),
}

/// Backend contract for session and credential storage.
///
/// Sessions are append-mostly: rows are inserted and later flipped to the
/// expired state, never deleted or rewritten wholesale. All methods take
/// `&self`; implementations handle their own synchronization.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Fetch a session row by its full composite id.
    async fn session_by_id(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// Persist a freshly minted session row.
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Mark every row sharing `sticky_id` as expired, whatever its current
    /// state. Closing an unknown sticky id is a no-op.
    async fn close_sticky(&self, sticky_id: &str) -> Result<(), StoreError>;

    /// Pull one active session's expiry forward to `deadline`. Rows that are
    /// already expired, or already due before `deadline`, are left alone;
    /// this can only ever shorten a session's remaining lifetime.
    async fn shorten_expiry(
        &self,
        id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Flip every active row whose expiry lies before `now` to expired.
    /// Returns the number of rows changed; repeating the call returns zero.
    async fn close_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Insert or replace the stored password hash for `user_id`.
    async fn upsert_credential(
        &self,
        user_id: &str,
        password_hash: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Fetch the stored credential for `user_id`, if any.
    async fn credential(&self, user_id: &str) -> Result<Option<Credential>, StoreError>;
}
