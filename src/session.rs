//! Session lifecycle: creation, rotation, revocation and cookie handling.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::store::{StoreBackend, StoreError};
use crate::token::{self, TokenError, SESSION_ID_LENGTH};
use crate::types::{Session, SessionState};

/// Cookie name. The `__Host-` prefix makes browsers enforce Secure,
/// no Domain attribute, and Path=/.
pub const SESSION_COOKIE_NAME: &str = "__Host-Storefront-SID";

/// How long a session id stays in use before a read rotates it.
const RENEWAL_AFTER: Duration = Duration::hours(1);

/// Inactivity horizon for sessions the browser should forget on close.
const EPHEMERAL_HORIZON_DAYS: i64 = 30;

/// Inactivity horizon for remember-me sessions.
const PERSISTENT_HORIZON_DAYS: i64 = 365;

/// How long a superseded session id keeps working after rotation or login,
/// so in-flight requests racing the new cookie do not get logged out.
const SUPERSEDED_GRACE: Duration = Duration::seconds(60);

/// Upper bound on the detached post-login expiry task.
const EXPIRY_TASK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SessionError {
    /// The process could not draw entropy for a token. There is no
    /// fallback; issuing a session without it would be worse than failing.
    #[error("cannot mint session token: {0}")]
    Token(#[from] TokenError),

    #[error("session store failure: {0}")]
    Store(#[from] StoreError),
}

/// A session handed back to the caller, together with the `Set-Cookie`
/// header value to send when the browser's cookie must change.
#[derive(Debug)]
pub struct IssuedSession {
    pub session: Session,
    pub set_cookie: Option<String>,
}

/// Session manager. Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct Sessions {
    backend: Arc<dyn StoreBackend>,
}

impl Sessions {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    /// Resolve the request's session from its cookie value, if any.
    ///
    /// A missing, malformed, expired or unknown cookie yields a fresh
    /// anonymous session. A valid session older than the renewal threshold
    /// is rotated: a new id with the same sticky half is issued and the
    /// superseded row is given a short grace window. Store read failures
    /// are logged and treated as a missing session rather than bubbling up,
    /// so a flaky database degrades to anonymous browsing instead of
    /// erroring every request.
    pub async fn read(&self, cookie: Option<&str>) -> Result<IssuedSession, SessionError> {
        let now = Utc::now();

        let mut current = None;
        if let Some(value) = cookie {
            // Cheap shape check before touching the store.
            if value.len() == SESSION_ID_LENGTH {
                match self.backend.session_by_id(value).await {
                    Ok(found) => current = found,
                    Err(err) => {
                        warn!(error = %err, "cannot read session from store, starting fresh");
                    }
                }
            }
        }

        let session = match current {
            Some(s) if s.is_active_at(now) => s,
            _ => return self.start(Self::anonymous(now)?).await,
        };

        if now < session.created_at + RENEWAL_AFTER {
            return Ok(IssuedSession {
                session,
                set_cookie: None,
            });
        }

        match self.rotate(&session, now).await {
            Ok(issued) => Ok(issued),
            Err(err) => {
                // The old id still works; renewal will be retried on the
                // next request.
                warn!(error = %err, "cannot rotate session, keeping the current id");
                Ok(IssuedSession {
                    session,
                    set_cookie: None,
                })
            }
        }
    }

    /// Mint an authenticated session for `user_id`.
    ///
    /// The new session gets a fresh sticky id, never one inherited from the
    /// pre-login session, so a fixated cookie cannot follow the user across
    /// authentication. The superseded session is expired shortly after, in
    /// the background; a failure there costs one grace window, not the
    /// login.
    pub async fn login(
        &self,
        user_id: &str,
        remember_me: bool,
        old_session: Option<&Session>,
    ) -> Result<IssuedSession, SessionError> {
        let now = Utc::now();
        let (id, sticky_id) = token::new_session_id()?;
        let issued = self
            .start(Session {
                id,
                sticky_id,
                created_at: now,
                expire: now + horizon(remember_me),
                state: SessionState::Active,
                user_id: user_id.to_owned(),
                remember_me,
            })
            .await?;

        if let Some(old) = old_session {
            self.expire_soon_detached(old.id.clone());
        }
        debug!(user_id, remember_me, "authenticated session started");
        Ok(issued)
    }

    /// Expire every session in the chain identified by `sticky_id`.
    /// Unknown sticky ids are a no-op.
    pub async fn close(&self, sticky_id: &str) -> Result<(), SessionError> {
        self.backend.close_sticky(sticky_id).await?;
        Ok(())
    }

    /// Flip all overdue sessions to the expired state. Returns how many
    /// rows changed; safe to run repeatedly from a scheduled job.
    pub async fn close_expired(&self) -> Result<u64, SessionError> {
        Ok(self.backend.close_expired(Utc::now()).await?)
    }

    fn anonymous(now: DateTime<Utc>) -> Result<Session, TokenError> {
        let (id, sticky_id) = token::new_session_id()?;
        Ok(Session {
            id,
            sticky_id,
            created_at: now,
            expire: now + horizon(false),
            state: SessionState::Active,
            user_id: String::new(),
            remember_me: false,
        })
    }

    async fn start(&self, session: Session) -> Result<IssuedSession, SessionError> {
        self.backend.insert_session(&session).await?;
        let set_cookie = Some(session_cookie(&session));
        Ok(IssuedSession {
            session,
            set_cookie,
        })
    }

    /// Issue a replacement id for `session`, keeping its sticky half and
    /// identity, then put the superseded row on the grace clock.
    async fn rotate(
        &self,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, SessionError> {
        let id = token::regenerate_id(&session.sticky_id)?;
        let issued = self
            .start(Session {
                id,
                sticky_id: session.sticky_id.clone(),
                created_at: now,
                expire: now + horizon(session.remember_me),
                state: SessionState::Active,
                user_id: session.user_id.clone(),
                remember_me: session.remember_me,
            })
            .await?;

        // Best effort: if this fails the old row simply runs out its
        // original expiry.
        if let Err(err) = self
            .backend
            .shorten_expiry(&session.id, now + SUPERSEDED_GRACE)
            .await
        {
            warn!(error = %err, "cannot put superseded session on the grace clock");
        }
        Ok(issued)
    }

    /// Shorten a superseded session's expiry from a detached task, so the
    /// login response is never held up by it.
    fn expire_soon_detached(&self, old_id: String) {
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            let deadline = Utc::now() + SUPERSEDED_GRACE;
            match tokio::time::timeout(
                EXPIRY_TASK_TIMEOUT,
                backend.shorten_expiry(&old_id, deadline),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(error = %err, "cannot expire superseded session after login");
                }
                Err(_) => warn!("timed out expiring superseded session after login"),
            }
        });
    }
}

fn horizon(remember_me: bool) -> Duration {
    if remember_me {
        Duration::days(PERSISTENT_HORIZON_DAYS)
    } else {
        Duration::days(EPHEMERAL_HORIZON_DAYS)
    }
}

/// Build the `Set-Cookie` value carrying `session`'s id.
///
/// Remember-me sessions get an explicit `Expires` so the cookie survives
/// browser restarts; ephemeral sessions get none and die with the browser.
pub fn session_cookie(session: &Session) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={}; Path=/; Secure; HttpOnly; SameSite=Lax",
        session.id
    );
    if session.remember_me {
        cookie.push_str("; Expires=");
        cookie.push_str(&session.expire.format("%a, %d %b %Y %H:%M:%S GMT").to_string());
    }
    cookie
}

/// Build a `Set-Cookie` value that removes the session cookie.
pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE_NAME}=; Path=/; Secure; HttpOnly; SameSite=Lax; Max-Age=0")
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use crate::store::MemoryBackend;
    use crate::token::STICKY_ID_LENGTH;
    use crate::types::Credential;

    use super::*;

    fn manager() -> (Arc<MemoryBackend>, Sessions) {
        let backend = Arc::new(MemoryBackend::new());
        let sessions = Sessions::new(backend.clone() as Arc<dyn StoreBackend>);
        (backend, sessions)
    }

    /// Delegates to a real in-memory store but fails selected operations,
    /// for exercising the degraded-store paths.
    struct FailingBackend {
        inner: MemoryBackend,
        fail_lookup: bool,
        fail_insert: bool,
    }

    impl FailingBackend {
        fn failure() -> StoreError {
            StoreError::Runtime("store offline".into())
        }
    }

    #[async_trait]
    impl StoreBackend for FailingBackend {
        async fn session_by_id(&self, id: &str) -> Result<Option<Session>, StoreError> {
            if self.fail_lookup {
                return Err(Self::failure());
            }
            self.inner.session_by_id(id).await
        }

        async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
            if self.fail_insert {
                return Err(Self::failure());
            }
            self.inner.insert_session(session).await
        }

        async fn close_sticky(&self, sticky_id: &str) -> Result<(), StoreError> {
            self.inner.close_sticky(sticky_id).await
        }

        async fn shorten_expiry(
            &self,
            id: &str,
            deadline: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner.shorten_expiry(id, deadline).await
        }

        async fn close_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.close_expired(now).await
        }

        async fn upsert_credential(
            &self,
            user_id: &str,
            password_hash: &str,
            updated_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner.upsert_credential(user_id, password_hash, updated_at).await
        }

        async fn credential(&self, user_id: &str) -> Result<Option<Credential>, StoreError> {
            self.inner.credential(user_id).await
        }
    }

    #[tokio::test]
    async fn missing_cookie_starts_anonymous_session() {
        let (_, sessions) = manager();

        let issued = sessions.read(None).await.unwrap();
        assert!(issued.session.is_anonymous());
        assert!(!issued.session.remember_me);
        assert_eq!(issued.session.id.len(), SESSION_ID_LENGTH);
        let cookie = issued.set_cookie.expect("fresh session must set a cookie");
        assert!(cookie.starts_with(&format!("{SESSION_COOKIE_NAME}=")));
        assert!(cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn malformed_cookie_is_ignored_without_a_lookup() {
        let (_, sessions) = manager();

        let issued = sessions.read(Some("definitely-not-a-session-id")).await.unwrap();
        assert!(issued.session.is_anonymous());
        assert!(issued.set_cookie.is_some());
    }

    #[tokio::test]
    async fn young_session_passes_through_untouched() {
        let (_, sessions) = manager();

        let first = sessions.read(None).await.unwrap();
        let again = sessions.read(Some(&first.session.id)).await.unwrap();

        assert_eq!(again.session.id, first.session.id);
        assert!(again.set_cookie.is_none());
    }

    #[tokio::test]
    async fn failing_lookup_falls_back_to_fresh_anonymous() {
        let backend = Arc::new(FailingBackend {
            inner: MemoryBackend::new(),
            fail_lookup: true,
            fail_insert: false,
        });
        let sessions = Sessions::new(backend as Arc<dyn StoreBackend>);

        let cookie = "x".repeat(SESSION_ID_LENGTH);
        let issued = sessions.read(Some(&cookie)).await.unwrap();
        assert!(issued.session.is_anonymous());
        assert_ne!(issued.session.id, cookie);
        assert!(issued.set_cookie.is_some());
    }

    #[tokio::test]
    async fn failed_rotation_keeps_the_current_id() {
        let backend = Arc::new(FailingBackend {
            inner: MemoryBackend::new(),
            fail_lookup: false,
            fail_insert: true,
        });
        let now = Utc::now();
        let (id, sticky_id) = token::new_session_id().unwrap();
        let aged = Session {
            id: id.clone(),
            sticky_id,
            created_at: now - Duration::hours(2),
            expire: now + Duration::days(30),
            state: SessionState::Active,
            user_id: "alice".to_owned(),
            remember_me: false,
        };
        backend.inner.insert_session(&aged).await.unwrap();

        let sessions = Sessions::new(Arc::clone(&backend) as Arc<dyn StoreBackend>);
        let issued = sessions.read(Some(&id)).await.unwrap();
        assert_eq!(issued.session.id, id);
        assert_eq!(issued.session.user_id, "alice");
        assert!(issued.set_cookie.is_none());

        // No new row, and the surviving session was not put on the grace
        // clock by the failed rotation.
        let row = backend.inner.session_by_id(&id).await.unwrap().unwrap();
        assert_eq!(row.expire, aged.expire);
        assert_eq!(backend.inner.session_count(), 1);
    }

    #[tokio::test]
    async fn unknown_cookie_of_the_right_shape_starts_fresh() {
        let (_, sessions) = manager();

        let phantom = "x".repeat(SESSION_ID_LENGTH);
        let issued = sessions.read(Some(&phantom)).await.unwrap();
        assert!(issued.session.is_anonymous());
        assert_ne!(issued.session.id, phantom);
    }

    #[tokio::test]
    async fn old_session_is_rotated_keeping_sticky_and_user() {
        let (backend, sessions) = manager();

        let issued = sessions.login("alice", true, None).await.unwrap();
        let old = issued.session;
        // Age the row past the renewal threshold.
        let mut aged = old.clone();
        aged.created_at = Utc::now() - Duration::hours(2);
        backend.insert_session(&aged).await.unwrap();

        let rotated = sessions.read(Some(&old.id)).await.unwrap();
        assert_ne!(rotated.session.id, old.id);
        assert_eq!(rotated.session.sticky_id, old.sticky_id);
        assert_eq!(rotated.session.user_id, "alice");
        assert!(rotated.session.remember_me);
        assert!(rotated.set_cookie.is_some());

        // The superseded row has at most the grace window left.
        let superseded = backend.session_by_id(&old.id).await.unwrap().unwrap();
        assert!(superseded.expire <= Utc::now() + SUPERSEDED_GRACE);
        assert_eq!(superseded.state, SessionState::Active);
    }

    #[tokio::test]
    async fn expired_session_yields_a_fresh_anonymous_one() {
        let (backend, sessions) = manager();

        let issued = sessions.login("alice", false, None).await.unwrap();
        let mut dead = issued.session.clone();
        dead.expire = Utc::now() - Duration::seconds(1);
        backend.insert_session(&dead).await.unwrap();

        let next = sessions.read(Some(&dead.id)).await.unwrap();
        assert!(next.session.is_anonymous());
        assert_ne!(next.session.sticky_id, dead.sticky_id);
    }

    #[tokio::test]
    async fn login_mints_a_new_sticky_id() {
        let (_, sessions) = manager();

        let anon = sessions.read(None).await.unwrap();
        let logged_in = sessions
            .login("alice", false, Some(&anon.session))
            .await
            .unwrap();

        assert_ne!(logged_in.session.sticky_id, anon.session.sticky_id);
        assert_eq!(logged_in.session.user_id, "alice");
        assert_eq!(logged_in.session.sticky_id.len(), STICKY_ID_LENGTH);
        assert!(logged_in.set_cookie.is_some());
    }

    #[tokio::test]
    async fn login_puts_the_old_session_on_the_grace_clock() {
        let (backend, sessions) = manager();

        let anon = sessions.read(None).await.unwrap();
        sessions
            .login("alice", false, Some(&anon.session))
            .await
            .unwrap();

        // The shortening runs on a detached task; give it a moment.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            let old = backend
                .session_by_id(&anon.session.id)
                .await
                .unwrap()
                .unwrap();
            if old.expire <= Utc::now() + SUPERSEDED_GRACE {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "superseded session was never shortened"
            );
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn close_revokes_the_whole_chain() {
        let (backend, sessions) = manager();

        let issued = sessions.login("alice", false, None).await.unwrap();
        let mut aged = issued.session.clone();
        aged.created_at = Utc::now() - Duration::hours(2);
        backend.insert_session(&aged).await.unwrap();
        let rotated = sessions.read(Some(&issued.session.id)).await.unwrap();

        sessions.close(&issued.session.sticky_id).await.unwrap();

        let after = sessions.read(Some(&rotated.session.id)).await.unwrap();
        assert!(after.session.is_anonymous());
    }

    #[tokio::test]
    async fn close_expired_reports_zero_on_repeat() {
        let (backend, sessions) = manager();

        let issued = sessions.read(None).await.unwrap();
        let mut dead = issued.session.clone();
        dead.expire = Utc::now() - Duration::minutes(5);
        backend.insert_session(&dead).await.unwrap();

        assert_eq!(sessions.close_expired().await.unwrap(), 1);
        assert_eq!(sessions.close_expired().await.unwrap(), 0);
    }

    #[test]
    fn remember_me_cookie_carries_expires() {
        let now = Utc::now();
        let session = Session {
            id: "sticky,rotating".to_owned(),
            sticky_id: "sticky".to_owned(),
            created_at: now,
            expire: now + Duration::days(365),
            state: SessionState::Active,
            user_id: "alice".to_owned(),
            remember_me: true,
        };

        let cookie = session_cookie(&session);
        assert!(cookie.contains("Expires="));
        assert!(cookie.contains("GMT"));
        assert!(cookie.contains("SameSite=Lax"));

        let mut ephemeral = session;
        ephemeral.remember_me = false;
        assert!(!session_cookie(&ephemeral).contains("Expires="));
    }

    #[test]
    fn clearing_cookie_zeroes_max_age() {
        let cookie = clear_session_cookie();
        assert!(cookie.starts_with(&format!("{SESSION_COOKIE_NAME}=;")));
        assert!(cookie.contains("Max-Age=0"));
    }
}
