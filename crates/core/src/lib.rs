use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod encryption;
pub mod model;
pub mod secret;
pub mod state;
pub mod token;

pub use model::{Credential, Identity, Principal, Usage, Validation};
pub use secret::Secret;
pub use state::{StateManager, StateStore};
pub use token::TokenSet;

/// Errors produced by the credential lifecycle.
///
/// Every variant is an expected outcome; callers decide how to surface it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Handshake state was never issued, already consumed, or expired.
    #[error("invalid state parameter")]
    InvalidState,

    /// Code-for-token exchange with the provider failed.
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),

    /// The provider could not resolve the access token to an identity.
    #[error("identity lookup failed: {0}")]
    IdentityLookupFailed(String),

    #[error("principal with external id {0} not found")]
    PrincipalNotFound(i64),

    #[error("principal {0} already has an API key")]
    DuplicateCredential(i64),

    #[error("invalid API key")]
    InvalidCredential,

    /// Daily quota for the credential is used up until `reset_at`.
    #[error("daily rate limit of {limit} requests exceeded, resets at {reset_at}")]
    RateLimitExceeded {
        limit: u32,
        remaining: u32,
        reset_at: DateTime<Utc>,
    },

    /// The global failsafe rejected the request.
    #[error("system capacity exceeded")]
    SystemOverloaded,

    #[error("storage error: {0}")]
    StorageError(String),
}

/// The one identity provider this service talks to.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Issues a fresh handshake state and returns `(authorize_url, state)`.
    /// `redirect_uri` overrides the configured callback for this handshake.
    async fn authorize_url(&self, redirect_uri: Option<&str>)
        -> Result<(String, String), AuthError>;

    /// Validates `state` and trades `code` for a provider access token.
    /// `redirect_uri` must match the one the handshake was started with.
    async fn exchange_code(
        &self,
        code: &str,
        state: &str,
        redirect_uri: Option<&str>,
    ) -> Result<TokenSet, AuthError>;

    /// Resolves an access token to the external identity behind it.
    async fn resolve_identity(&self, access_token: &str) -> Result<Identity, AuthError>;
}
