//! Anti-CSRF state tokens for the OAuth handshake.
//!
//! A state is pending while it is present in the set. Consuming it removes
//! it, so a second callback carrying the same value fails.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::AuthError;

/// Default lifetime of an issued state.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(600);

/// Pending-set size above which `issue` sweeps expired entries.
const PURGE_THRESHOLD: usize = 1024;

/// Storage for pending handshake states.
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    /// Records and returns a new pending state.
    async fn issue(&self) -> Result<String, AuthError>;

    /// One-shot check of `state`. An empty value is accepted without a
    /// lookup; callers only pass one on trusted non-browser flows.
    async fn consume(&self, state: &str) -> Result<(), AuthError>;
}

/// In-process pending set. Lost on restart.
#[derive(Clone)]
pub struct StateManager {
    pending: Arc<DashMap<String, Instant>>,
    ttl: Duration,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_TTL)
    }
}

impl StateManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn issue(&self) -> String {
        if self.pending.len() > PURGE_THRESHOLD {
            self.purge_expired();
        }

        let state = Uuid::new_v4().to_string();
        self.pending.insert(state.clone(), Instant::now() + self.ttl);
        state
    }

    pub fn consume(&self, state: &str) -> Result<(), AuthError> {
        if state.is_empty() {
            return Ok(());
        }

        // remove() is the check and the delete in one step
        match self.pending.remove(state) {
            Some((_, expires_at)) if Instant::now() < expires_at => Ok(()),
            Some(_) => {
                debug!("rejecting expired oauth state");
                Err(AuthError::InvalidState)
            }
            None => Err(AuthError::InvalidState),
        }
    }

    pub fn is_pending(&self, state: &str) -> bool {
        self.pending
            .get(state)
            .is_some_and(|expires_at| Instant::now() < *expires_at)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.pending.len();
        let now = Instant::now();
        self.pending.retain(|_, expires_at| now < *expires_at);
        let removed = before.saturating_sub(self.pending.len());
        if removed > 0 {
            debug!(removed, "purged expired oauth states");
        }
        removed
    }
}

#[async_trait::async_trait]
impl StateStore for StateManager {
    async fn issue(&self) -> Result<String, AuthError> {
        Ok(StateManager::issue(self))
    }

    async fn consume(&self, state: &str) -> Result<(), AuthError> {
        StateManager::consume(self, state)
    }
}
