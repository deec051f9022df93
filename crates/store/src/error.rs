//! Errors raised inside the storage backends.
//!
//! Callers of [`crate::CredentialStore`] only ever see
//! [`core_lib::AuthError`]; backend failures are folded into
//! `AuthError::StorageError` at the trait boundary.

use core_lib::{encryption::CryptoError, AuthError};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A stored value could not be mapped back into the domain model.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("background task failed: {0}")]
    TaskJoin(String),

    /// A domain outcome raised from inside a blocking closure.
    #[error(transparent)]
    Auth(AuthError),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

impl From<AuthError> for StoreError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Auth(inner) => inner,
            other => AuthError::StorageError(other.to_string()),
        }
    }
}
