use chrono::{DateTime, Utc};
use core_lib::{
    encryption::TokenCipher,
    model::{start_of_day, DEFAULT_DAILY_LIMIT},
    token::{generate_api_key, DEFAULT_KEY_PREFIX},
    AuthError, Credential, Identity, Principal, Usage,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::debug;

use crate::{
    db::Database,
    error::{StoreError, StoreResult},
    CredentialStore,
};

/// Settings applied to newly issued credentials.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub key_prefix: String,
    pub daily_limit: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            daily_limit: DEFAULT_DAILY_LIMIT,
        }
    }
}

/// Relational credential store on SQLite.
///
/// Provider tokens are sealed with the [`TokenCipher`] before they reach disk.
#[derive(Clone)]
pub struct SqliteCredentialStore {
    db: Database,
    cipher: TokenCipher,
    config: StoreConfig,
}

const CREDENTIAL_COLUMNS: &str = "api_key, github_user_id, created_at, last_used, request_count, \
     daily_request_count, daily_reset_at, daily_limit";

const PRINCIPAL_COLUMNS: &str =
    "github_id, login, name, email, avatar_url, token, created_at, last_login";

impl SqliteCredentialStore {
    /// Wraps an already opened database and brings its schema up to date.
    pub async fn new(db: Database, cipher: TokenCipher, config: StoreConfig) -> StoreResult<Self> {
        db.run_migrations().await?;
        Ok(Self {
            db,
            cipher,
            config,
        })
    }

    pub async fn in_memory(cipher: TokenCipher, config: StoreConfig) -> StoreResult<Self> {
        Self::new(Database::open_in_memory()?, cipher, config).await
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn open_principal(&self, row: PrincipalRow) -> StoreResult<Principal> {
        Ok(Principal {
            external_id: row.external_id,
            login: row.login,
            name: row.name,
            email: row.email,
            avatar_url: row.avatar_url,
            access_token: self.cipher.open(row.external_id, &row.sealed_token)?,
            created_at: from_millis(row.created_at)?,
            last_login: from_millis(row.last_login)?,
        })
    }
}

#[async_trait::async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn upsert_principal(&self, identity: &Identity) -> Result<Principal, AuthError> {
        let sealed = self
            .cipher
            .seal(identity.external_id, &identity.access_token)
            .map_err(StoreError::from)?;
        let identity = identity.clone();
        let now = Utc::now().timestamp_millis();

        let row = self
            .db
            .execute(move |conn| {
                debug!(external_id = identity.external_id, "upserting principal");
                conn.execute(
                    "INSERT INTO users (github_id, login, name, email, avatar_url, token, created_at, last_login)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                     ON CONFLICT(github_id) DO UPDATE SET
                        login = excluded.login,
                        name = excluded.name,
                        email = excluded.email,
                        avatar_url = excluded.avatar_url,
                        token = excluded.token,
                        last_login = excluded.last_login",
                    params![
                        identity.external_id,
                        identity.login,
                        identity.name,
                        identity.email,
                        identity.avatar_url,
                        sealed,
                        now
                    ],
                )?;
                select_principal(conn, identity.external_id)?
                    .ok_or(StoreError::Auth(AuthError::PrincipalNotFound(identity.external_id)))
            })
            .await?;

        Ok(self.open_principal(row)?)
    }

    async fn get_principal(&self, external_id: i64) -> Result<Option<Principal>, AuthError> {
        let row = self
            .db
            .execute(move |conn| select_principal(conn, external_id))
            .await?;

        match row {
            Some(row) => Ok(Some(self.open_principal(row)?)),
            None => Ok(None),
        }
    }

    async fn get_or_create_credential(&self, external_id: i64) -> Result<Credential, AuthError> {
        let config = self.config.clone();

        let credential = self
            .db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                ensure_principal(&tx, external_id)?;

                let now = now_millis()?;
                let credential = match select_credential_for(&tx, external_id)? {
                    Some(mut existing) => {
                        tx.execute(
                            "UPDATE api_credentials SET last_used = ?1 WHERE api_key = ?2",
                            params![now.timestamp_millis(), existing.api_key],
                        )?;
                        existing.usage.last_used = Some(now);
                        existing
                    }
                    None => insert_credential(&tx, external_id, &config, now)?,
                };

                tx.commit()?;
                Ok(credential)
            })
            .await?;

        Ok(credential)
    }

    async fn create_credential(&self, external_id: i64) -> Result<Credential, AuthError> {
        let config = self.config.clone();

        let credential = self
            .db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                ensure_principal(&tx, external_id)?;

                if select_credential_for(&tx, external_id)?.is_some() {
                    return Err(AuthError::DuplicateCredential(external_id).into());
                }

                let credential = insert_credential(&tx, external_id, &config, now_millis()?)?;
                tx.commit()?;
                Ok(credential)
            })
            .await?;

        Ok(credential)
    }

    async fn get_credential(&self, api_key: &str) -> Result<Option<Credential>, AuthError> {
        let api_key = api_key.to_string();
        let credential = self
            .db
            .execute(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {CREDENTIAL_COLUMNS} FROM api_credentials WHERE api_key = ?1"),
                        params![api_key],
                        CredentialRow::read,
                    )
                    .optional()?;
                row.map(CredentialRow::into_credential).transpose()
            })
            .await?;

        Ok(credential)
    }

    async fn credential_for_principal(
        &self,
        external_id: i64,
    ) -> Result<Option<Credential>, AuthError> {
        Ok(self
            .db
            .execute(move |conn| select_credential_for(conn, external_id))
            .await?)
    }

    async fn compare_and_swap_usage(
        &self,
        api_key: &str,
        expected: &Usage,
        next: &Usage,
    ) -> Result<bool, AuthError> {
        let api_key = api_key.to_string();
        let expected = *expected;
        let next = *next;

        let changed = self
            .db
            .execute(move |conn| {
                let changed = conn.execute(
                    "UPDATE api_credentials
                     SET request_count = ?1,
                         daily_request_count = ?2,
                         daily_reset_at = ?3,
                         last_used = ?4
                     WHERE api_key = ?5
                       AND request_count = ?6
                       AND daily_request_count = ?7
                       AND daily_reset_at = ?8",
                    params![
                        next.request_count as i64,
                        next.daily_request_count,
                        next.daily_reset_at.timestamp_millis(),
                        next.last_used.map(|t| t.timestamp_millis()),
                        api_key,
                        expected.request_count as i64,
                        expected.daily_request_count,
                        expected.daily_reset_at.timestamp_millis(),
                    ],
                )?;
                Ok(changed)
            })
            .await?;

        Ok(changed == 1)
    }
}

struct PrincipalRow {
    external_id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
    sealed_token: String,
    created_at: i64,
    last_login: i64,
}

impl PrincipalRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            external_id: row.get(0)?,
            login: row.get(1)?,
            name: row.get(2)?,
            email: row.get(3)?,
            avatar_url: row.get(4)?,
            sealed_token: row.get(5)?,
            created_at: row.get(6)?,
            last_login: row.get(7)?,
        })
    }
}

struct CredentialRow {
    api_key: String,
    external_id: i64,
    created_at: i64,
    last_used: Option<i64>,
    request_count: i64,
    daily_request_count: u32,
    daily_reset_at: i64,
    daily_limit: u32,
}

impl CredentialRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            api_key: row.get(0)?,
            external_id: row.get(1)?,
            created_at: row.get(2)?,
            last_used: row.get(3)?,
            request_count: row.get(4)?,
            daily_request_count: row.get(5)?,
            daily_reset_at: row.get(6)?,
            daily_limit: row.get(7)?,
        })
    }

    fn into_credential(self) -> StoreResult<Credential> {
        let request_count = u64::try_from(self.request_count).map_err(|_| {
            StoreError::Corrupt(format!("negative request_count for {}", self.external_id))
        })?;

        Ok(Credential {
            api_key: self.api_key,
            external_id: self.external_id,
            created_at: from_millis(self.created_at)?,
            daily_limit: self.daily_limit,
            usage: Usage {
                request_count,
                daily_request_count: self.daily_request_count,
                daily_reset_at: from_millis(self.daily_reset_at)?,
                last_used: self.last_used.map(from_millis).transpose()?,
            },
        })
    }
}

fn select_principal(conn: &Connection, external_id: i64) -> StoreResult<Option<PrincipalRow>> {
    Ok(conn
        .query_row(
            &format!("SELECT {PRINCIPAL_COLUMNS} FROM users WHERE github_id = ?1"),
            params![external_id],
            PrincipalRow::read,
        )
        .optional()?)
}

fn ensure_principal(conn: &Connection, external_id: i64) -> StoreResult<()> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM users WHERE github_id = ?1",
            params![external_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();

    if exists {
        Ok(())
    } else {
        Err(AuthError::PrincipalNotFound(external_id).into())
    }
}

fn select_credential_for(conn: &Connection, external_id: i64) -> StoreResult<Option<Credential>> {
    let row = conn
        .query_row(
            &format!("SELECT {CREDENTIAL_COLUMNS} FROM api_credentials WHERE github_user_id = ?1"),
            params![external_id],
            CredentialRow::read,
        )
        .optional()?;
    row.map(CredentialRow::into_credential).transpose()
}

fn insert_credential(
    conn: &Connection,
    external_id: i64,
    config: &StoreConfig,
    now: DateTime<Utc>,
) -> StoreResult<Credential> {
    let api_key = generate_api_key(&config.key_prefix);
    let window_start = start_of_day(now);

    let inserted = conn.execute(
        "INSERT INTO api_credentials
            (api_key, github_user_id, created_at, daily_reset_at, daily_limit)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            api_key,
            external_id,
            now.timestamp_millis(),
            window_start.timestamp_millis(),
            config.daily_limit
        ],
    );

    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            return Err(AuthError::DuplicateCredential(external_id).into());
        }
        Err(e) => return Err(e.into()),
    }
    debug!(external_id, "issued api credential");

    Ok(Credential {
        api_key,
        external_id,
        created_at: now,
        daily_limit: config.daily_limit,
        usage: Usage {
            request_count: 0,
            daily_request_count: 0,
            daily_reset_at: window_start,
            last_used: None,
        },
    })
}

/// Current time truncated to the millisecond precision rows are stored at.
fn now_millis() -> StoreResult<DateTime<Utc>> {
    from_millis(Utc::now().timestamp_millis())
}

fn from_millis(millis: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {millis}")))
}
