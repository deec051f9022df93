use core_lib::{AuthError, Credential, Identity, Principal, Usage};

mod db;
pub mod error;
mod migration;
mod redis_state;
mod sqlite;

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use redis_state::RedisStateStore;
pub use sqlite::{SqliteCredentialStore, StoreConfig};

/// Durable owner of principals and their credentials.
///
/// Implementations are the only writers of these records. All operations
/// must be safe to call concurrently from independent requests.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    /// Inserts the principal or overwrites its mutable fields, refreshing
    /// `last_login`.
    async fn upsert_principal(&self, identity: &Identity) -> Result<Principal, AuthError>;

    /// Absence is `Ok(None)`, not an error.
    async fn get_principal(&self, external_id: i64) -> Result<Option<Principal>, AuthError>;

    /// Returns the principal's credential, creating it on first call.
    /// An existing credential gets its `last_used` touched.
    async fn get_or_create_credential(&self, external_id: i64) -> Result<Credential, AuthError>;

    /// Fails with `DuplicateCredential` when one already exists.
    async fn create_credential(&self, external_id: i64) -> Result<Credential, AuthError>;

    async fn get_credential(&self, api_key: &str) -> Result<Option<Credential>, AuthError>;

    async fn credential_for_principal(
        &self,
        external_id: i64,
    ) -> Result<Option<Credential>, AuthError>;

    /// Writes `next` only if the stored counters still equal `expected`.
    /// Returns false when another writer got there first.
    async fn compare_and_swap_usage(
        &self,
        api_key: &str,
        expected: &Usage,
        next: &Usage,
    ) -> Result<bool, AuthError>;
}
