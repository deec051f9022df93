use chrono::{DateTime, Utc};
use core_lib::{model::start_of_day, AuthError, Credential, Usage, Validation};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::{num::NonZeroU32, sync::Arc, time::Duration};
use store::CredentialStore;
use tracing::debug;

/// Configuration for the CredentialValidator
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Requests admitted across all credentials per `global_period`.
    /// Zero disables the global failsafe.
    pub global_limit: u32,

    /// Time period for the global rate limit
    pub global_period: Duration,

    /// Retries allowed on top of twice the credential's daily limit when
    /// the usage swap keeps losing to concurrent writers
    pub max_update_attempts: u32,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            global_limit: 10000,
            global_period: Duration::from_secs(60),
            max_update_attempts: 8,
        }
    }
}

/// Validates presented API keys against a per-credential daily quota.
///
/// Layer 1 is the credential's own daily window, persisted in the store.
/// Layer 2 is an optional in-process failsafe shared by all credentials.
pub struct CredentialValidator {
    store: Arc<dyn CredentialStore>,

    global_limiter: Option<DefaultDirectRateLimiter>,

    config: LimiterConfig,
}

impl CredentialValidator {
    /// Creates a new validator over `store`
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let validator = CredentialValidator::new(store, LimiterConfig::default());
    /// let validation = validator.validate(&api_key).await?;
    /// ```
    pub fn new(store: Arc<dyn CredentialStore>, config: LimiterConfig) -> Self {
        let global_limiter = NonZeroU32::new(config.global_limit).and_then(|burst| {
            Quota::with_period(config.global_period / burst.get())
                .map(|quota| RateLimiter::direct(quota.allow_burst(burst)))
        });

        Self {
            store,
            global_limiter,
            config,
        }
    }

    /// Validates `api_key` against the current wall clock.
    pub async fn validate(&self, api_key: &str) -> Result<Validation, AuthError> {
        self.validate_at(api_key, Utc::now()).await
    }

    /// Validates `api_key` as if the request arrived at `now`.
    ///
    /// # Returns
    ///
    /// * `Ok(Validation)` - request admitted and counted
    /// * `Err(AuthError::InvalidCredential)` - unknown key, nothing written
    /// * `Err(AuthError::RateLimitExceeded { .. })` - daily quota used up, nothing written
    /// * `Err(AuthError::SystemOverloaded)` - global failsafe tripped, nothing written
    pub async fn validate_at(
        &self,
        api_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Validation, AuthError> {
        let mut credential = self.load(api_key).await?;
        self.check_global()?;

        // A lost swap means another request was admitted on this credential,
        // so losses are bounded by what two adjacent windows can admit.
        let mut races_left = u64::from(credential.daily_limit) * 2
            + u64::from(self.config.max_update_attempts);

        loop {
            let next = next_usage(&credential, now)?;

            if self
                .store
                .compare_and_swap_usage(api_key, &credential.usage, &next)
                .await?
            {
                let principal = self
                    .store
                    .get_principal(credential.external_id)
                    .await?
                    .ok_or(AuthError::PrincipalNotFound(credential.external_id))?;

                return Ok(Validation {
                    principal,
                    limit: credential.daily_limit,
                    used: next.daily_request_count,
                    reset_at: window_reset(next.daily_reset_at),
                });
            }

            if races_left == 0 {
                return Err(AuthError::StorageError(
                    "credential usage kept changing without progress".to_string(),
                ));
            }
            races_left -= 1;
            debug!(races_left, "credential usage changed concurrently, retrying");

            credential = self.load(api_key).await?;
        }
    }

    async fn load(&self, api_key: &str) -> Result<Credential, AuthError> {
        self.store
            .get_credential(api_key)
            .await?
            .ok_or(AuthError::InvalidCredential)
    }

    fn check_global(&self) -> Result<(), AuthError> {
        match &self.global_limiter {
            Some(limiter) if limiter.check().is_err() => Err(AuthError::SystemOverloaded),
            _ => Ok(()),
        }
    }
}

/// Computes the usage a credential moves to when a request arrives at `now`.
///
/// A window that started before today's UTC midnight is replaced by a fresh
/// one with the request counted as its first. Within the current window the
/// request is refused once the daily limit is reached.
pub fn next_usage(credential: &Credential, now: DateTime<Utc>) -> Result<Usage, AuthError> {
    let today = start_of_day(now);
    let usage = credential.usage;

    let (daily_request_count, daily_reset_at) = if usage.daily_reset_at < today {
        (1, today)
    } else if usage.daily_request_count >= credential.daily_limit {
        return Err(AuthError::RateLimitExceeded {
            limit: credential.daily_limit,
            remaining: 0,
            reset_at: window_reset(usage.daily_reset_at),
        });
    } else {
        (usage.daily_request_count + 1, usage.daily_reset_at)
    };

    Ok(Usage {
        request_count: usage.request_count.saturating_add(1),
        daily_request_count,
        daily_reset_at,
        last_used: Some(now),
    })
}

fn window_reset(window_start: DateTime<Utc>) -> DateTime<Utc> {
    window_start + chrono::Duration::days(1)
}
