//! Ties sessions and credentials together into the login, logout and
//! password-change flows.

use thiserror::Error;
use tracing::info;

use crate::credentials::{CredentialError, Credentials};
use crate::session::{clear_session_cookie, IssuedSession, SessionError, Sessions};
use crate::types::Session;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Front door for authentication flows. Cheap to clone.
#[derive(Clone)]
pub struct Authenticator {
    sessions: Sessions,
    credentials: Credentials,
}

impl Authenticator {
    pub fn new(sessions: Sessions, credentials: Credentials) -> Self {
        Self {
            sessions,
            credentials,
        }
    }

    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Authenticate `user_id` with `password` and mint a fresh session.
    ///
    /// The password is checked first; nothing about the session changes on
    /// a failed attempt. On success the pre-login chain is revoked and the
    /// new session starts on a brand-new sticky id.
    pub async fn login(
        &self,
        current: Option<&Session>,
        user_id: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<IssuedSession, AuthError> {
        self.credentials.check_password(user_id, password).await?;

        if let Some(session) = current {
            self.sessions.close(&session.sticky_id).await?;
        }
        let issued = self.sessions.login(user_id, remember_me, current).await?;
        info!(user_id, "user logged in");
        Ok(issued)
    }

    /// End `session`'s authenticated chain. Returns the `Set-Cookie` value
    /// that removes the cookie from the browser. Logging out an anonymous
    /// session only clears the cookie.
    pub async fn logout(&self, session: &Session) -> Result<String, AuthError> {
        if !session.is_anonymous() {
            self.sessions.close(&session.sticky_id).await?;
            info!(user_id = %session.user_id, "user logged out");
        }
        Ok(clear_session_cookie())
    }

    /// Change `user_id`'s password and revoke the caller's session chain,
    /// forcing a fresh login everywhere the old password was in use.
    pub async fn change_password(
        &self,
        session: Option<&Session>,
        user_id: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.credentials
            .set_credentials(user_id, new_password)
            .await?;
        if let Some(session) = session {
            self.sessions.close(&session.sticky_id).await?;
        }
        info!(user_id, "password changed");
        Ok(())
    }
}
