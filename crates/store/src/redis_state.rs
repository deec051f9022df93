use std::time::Duration;

use core_lib::{AuthError, StateStore};
use redis::{aio::MultiplexedConnection, Client};
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

const KEY_PREFIX: &str = "oauth_state:";

/// Pending OAuth states kept in Redis with a TTL.
///
/// Survives process restarts and is shared between instances. `GETDEL`
/// makes consumption a single server-side step.
#[derive(Clone)]
pub struct RedisStateStore {
    conn: MultiplexedConnection,
    ttl: Duration,
}

impl RedisStateStore {
    pub async fn connect(redis_address: &str, ttl: Duration) -> StoreResult<Self> {
        let client = Client::open(redis_address)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn, ttl })
    }

    fn key(state: &str) -> String {
        format!("{KEY_PREFIX}{state}")
    }
}

#[async_trait::async_trait]
impl StateStore for RedisStateStore {
    async fn issue(&self) -> Result<String, AuthError> {
        let mut conn = self.conn.clone();
        let state = Uuid::new_v4().to_string();

        let stored: Option<String> = redis::cmd("SET")
            .arg(Self::key(&state))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(StoreError::from)?;

        if stored.is_none() {
            return Err(AuthError::StorageError("oauth state collision".into()));
        }
        Ok(state)
    }

    async fn consume(&self, state: &str) -> Result<(), AuthError> {
        if state.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        let pending: Option<String> = redis::cmd("GETDEL")
            .arg(Self::key(state))
            .query_async(&mut conn)
            .await
            .map_err(StoreError::from)?;

        match pending {
            Some(_) => Ok(()),
            None => {
                debug!("oauth state not pending in redis");
                Err(AuthError::InvalidState)
            }
        }
    }
}
