//! Password credential management: policy-checked writes, bcrypt-verified
//! reads.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error};

use crate::passwords::{PasswordPolicyError, PasswordValidator, MAX_PASSWORD_LENGTH};
use crate::store::{StoreBackend, StoreError};

#[derive(Debug, Error)]
pub enum CredentialError {
    /// The candidate password failed the entropy policy. Safe to show to
    /// the user.
    #[error(transparent)]
    Policy(#[from] PasswordPolicyError),

    #[error("password is empty")]
    EmptyPassword,

    #[error("password is too long")]
    OversizedPassword,

    #[error("unknown user")]
    UnknownUser,

    #[error("wrong password")]
    WrongPassword,

    #[error("credential store failure: {0}")]
    Store(#[from] StoreError),

    #[error("cannot hash password: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

impl CredentialError {
    /// Whether the message may be shown to the end user verbatim. Store
    /// and hashing failures stay opaque; callers log them and answer with
    /// a generic error.
    pub fn is_user_safe(&self) -> bool {
        !matches!(self, Self::Store(_) | Self::Hash(_))
    }
}

/// Manages stored password hashes for user accounts.
#[derive(Clone)]
pub struct Credentials {
    backend: Arc<dyn StoreBackend>,
    validator: Arc<PasswordValidator>,
    cost: u32,
}

impl Credentials {
    pub fn new(backend: Arc<dyn StoreBackend>, validator: PasswordValidator) -> Self {
        Self::with_cost(backend, validator, bcrypt::DEFAULT_COST)
    }

    /// Like [`Credentials::new`] with an explicit bcrypt work factor.
    /// Tests use a low cost to keep hashing fast.
    pub fn with_cost(
        backend: Arc<dyn StoreBackend>,
        validator: PasswordValidator,
        cost: u32,
    ) -> Self {
        Self {
            backend,
            validator: Arc::new(validator),
            cost,
        }
    }

    /// Set or replace the password for `user_id`.
    ///
    /// The candidate must clear the entropy policy before anything is
    /// hashed or written. Only the salted hash ever reaches the store.
    pub async fn set_credentials(
        &self,
        user_id: &str,
        password: &str,
    ) -> Result<(), CredentialError> {
        self.validator.validate(password, &[])?;
        let hash = bcrypt::hash(password, self.cost)?;
        self.backend
            .upsert_credential(user_id, &hash, Utc::now())
            .await?;
        debug!(user_id, "credentials updated");
        Ok(())
    }

    /// Verify `password` against the stored hash for `user_id`.
    ///
    /// Empty and oversized candidates are rejected before any hashing.
    /// A malformed stored hash is logged and reported as a wrong password,
    /// never as a success.
    pub async fn check_password(
        &self,
        user_id: &str,
        password: &str,
    ) -> Result<(), CredentialError> {
        if password.is_empty() {
            return Err(CredentialError::EmptyPassword);
        }
        if password.len() > MAX_PASSWORD_LENGTH {
            return Err(CredentialError::OversizedPassword);
        }

        let stored = self
            .backend
            .credential(user_id)
            .await?
            .ok_or(CredentialError::UnknownUser)?;

        match bcrypt::verify(password, &stored.password_hash) {
            Ok(true) => Ok(()),
            Ok(false) => Err(CredentialError::WrongPassword),
            Err(err) => {
                error!(user_id, error = %err, "cannot compare password hash");
                Err(CredentialError::WrongPassword)
            }
        }
    }
}
