use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of requests a credential may make per UTC day.
pub const DEFAULT_DAILY_LIMIT: u32 = 50;

/// Identity as resolved by the provider, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub external_id: i64,
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub access_token: String,
}

/// An authenticated external identity known to this service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub external_id: i64,
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    /// Provider access token. Accepted from the provider, never handed out.
    #[serde(skip_serializing, default)]
    pub access_token: String,
    pub created_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

/// Mutable usage counters of a credential.
///
/// These are the fields the validator rewrites on every accepted request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub request_count: u64,
    pub daily_request_count: u32,
    /// Start of the daily window the counter belongs to.
    pub daily_reset_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

/// An API key bound to exactly one principal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub api_key: String,
    pub external_id: i64,
    pub created_at: DateTime<Utc>,
    pub daily_limit: u32,
    #[serde(flatten)]
    pub usage: Usage,
}

impl Credential {
    /// Instant at which the current daily window ends.
    pub fn reset_at(&self) -> DateTime<Utc> {
        self.usage.daily_reset_at + Duration::days(1)
    }
}

/// Result of a successful validation, projected into `X-RateLimit-*`
/// headers by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub principal: Principal,
    pub limit: u32,
    /// Daily count including the request just admitted.
    pub used: u32,
    pub reset_at: DateTime<Utc>,
}

impl Validation {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }
}

/// UTC midnight of the day containing `now`.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}
