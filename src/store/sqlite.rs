//! SQLite backend.
//!
//! A single connection guarded by a mutex is plenty for the write rates
//! involved here; every call runs on the blocking thread pool so the async
//! runtime is never stalled by disk I/O.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::types::{Credential, Session, SessionState};

use super::traits::{StoreBackend, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS http_sessions (
    id          TEXT PRIMARY KEY,
    sticky_id   TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    expiration  TEXT NOT NULL,
    state       TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    kind        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS http_sessions_sticky_id ON http_sessions (sticky_id);
CREATE TABLE IF NOT EXISTS users_credentials (
    user_id       TEXT PRIMARY KEY,
    password_hash TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);
";

pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

/// Timestamps are stored as fixed-width UTC RFC 3339 text so that SQL
/// comparisons on the `expiration` column work lexicographically.
fn encode_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(column: usize, value: String) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(&value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn encode_kind(remember_me: bool) -> &'static str {
    if remember_me {
        "persistent"
    } else {
        "ephemeral"
    }
}

impl SqliteBackend {
    /// Open (creating if needed) the database at `path` and ensure the
    /// schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(StoreError::Database)?;
        conn.execute_batch(SCHEMA).map_err(StoreError::Database)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Runtime(e.to_string()))?
        .map_err(StoreError::Database)
    }
}

#[async_trait]
impl StoreBackend for SqliteBackend {
    async fn session_by_id(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let id = id.to_owned();
        self.call(move |conn| {
            conn.query_row(
                "SELECT id, sticky_id, created_at, expiration, state, user_id, kind \
                 FROM http_sessions WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Session {
                        id: row.get(0)?,
                        sticky_id: row.get(1)?,
                        created_at: decode_time(2, row.get(2)?)?,
                        expire: decode_time(3, row.get(3)?)?,
                        state: SessionState::from_column(&row.get::<_, String>(4)?),
                        user_id: row.get(5)?,
                        remember_me: row.get::<_, String>(6)? == "persistent",
                    })
                },
            )
            .optional()
        })
        .await
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        let session = session.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO http_sessions \
                 (id, sticky_id, created_at, expiration, state, user_id, kind) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    session.id,
                    session.sticky_id,
                    encode_time(session.created_at),
                    encode_time(session.expire),
                    session.state.as_str(),
                    session.user_id,
                    encode_kind(session.remember_me),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn close_sticky(&self, sticky_id: &str) -> Result<(), StoreError> {
        let sticky_id = sticky_id.to_owned();
        self.call(move |conn| {
            conn.execute(
                "UPDATE http_sessions SET state = 'expired' WHERE sticky_id = ?1",
                params![sticky_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn shorten_expiry(
        &self,
        id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let id = id.to_owned();
        let deadline = encode_time(deadline);
        self.call(move |conn| {
            conn.execute(
                "UPDATE http_sessions SET expiration = ?1 \
                 WHERE id = ?2 AND state = 'active' AND expiration > ?1",
                params![deadline, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn close_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let now = encode_time(now);
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE http_sessions SET state = 'expired' \
                 WHERE state = 'active' AND expiration < ?1",
                params![now],
            )?;
            Ok(changed as u64)
        })
        .await
    }

    async fn upsert_credential(
        &self,
        user_id: &str,
        password_hash: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let user_id = user_id.to_owned();
        let password_hash = password_hash.to_owned();
        let updated_at = encode_time(updated_at);
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO users_credentials (user_id, password_hash, updated_at) \
                 VALUES (?1, ?2, ?3) \
                 ON CONFLICT (user_id) DO UPDATE SET \
                 password_hash = excluded.password_hash, \
                 updated_at = excluded.updated_at",
                params![user_id, password_hash, updated_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn credential(&self, user_id: &str) -> Result<Option<Credential>, StoreError> {
        let user_id = user_id.to_owned();
        self.call(move |conn| {
            conn.query_row(
                "SELECT user_id, password_hash, updated_at \
                 FROM users_credentials WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(Credential {
                        user_id: row.get(0)?,
                        password_hash: row.get(1)?,
                        updated_at: decode_time(2, row.get(2)?)?,
                    })
                },
            )
            .optional()
        })
        .await
    }
}
