use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use core_lib::{encryption::TokenCipher, model::start_of_day, AuthError, Identity};
use hex_literal::hex;
use ratelimiter::{next_usage, CredentialValidator, LimiterConfig};
use store::{CredentialStore, SqliteCredentialStore, StoreConfig};

const EXTERNAL_ID: i64 = 555;

fn test_cipher() -> TokenCipher {
    TokenCipher::new(&hex!(
        "000102030405060708090a0b0c0d0e0f"
        "101112131415161718191a1b1c1d1e1f"
    ))
    .expect("valid key")
}

fn no_global_limit() -> LimiterConfig {
    LimiterConfig {
        global_limit: 0,
        ..LimiterConfig::default()
    }
}

/// Returns a validator plus the API key of a fresh credential with `daily_limit`.
async fn create_test_validator(
    daily_limit: u32,
    config: LimiterConfig,
) -> (CredentialValidator, Arc<SqliteCredentialStore>, String) {
    let store_config = StoreConfig {
        daily_limit,
        ..StoreConfig::default()
    };
    let store = Arc::new(
        SqliteCredentialStore::in_memory(test_cipher(), store_config)
            .await
            .unwrap(),
    );
    store
        .upsert_principal(&Identity {
            external_id: EXTERNAL_ID,
            login: "alice".to_string(),
            name: None,
            email: None,
            avatar_url: None,
            access_token: "tok123".to_string(),
        })
        .await
        .unwrap();
    let api_key = store.get_or_create_credential(EXTERNAL_ID).await.unwrap().api_key;

    let validator = CredentialValidator::new(store.clone(), config);
    (validator, store, api_key)
}

async fn daily_count(store: &SqliteCredentialStore, api_key: &str) -> u32 {
    store
        .get_credential(api_key)
        .await
        .unwrap()
        .unwrap()
        .usage
        .daily_request_count
}

#[tokio::test]
async fn test_daily_limit_boundary() {
    let (validator, store, api_key) = create_test_validator(3, no_global_limit()).await;
    let now = Utc::now();
    let reset = start_of_day(now) + ChronoDuration::days(1);

    for expected_used in 1..=3 {
        let validation = validator.validate_at(&api_key, now).await.unwrap();
        assert_eq!(validation.limit, 3);
        assert_eq!(validation.used, expected_used);
        assert_eq!(validation.remaining(), 3 - expected_used);
        assert_eq!(validation.reset_at, reset);
        assert_eq!(validation.principal.external_id, EXTERNAL_ID);
        assert_eq!(validation.principal.login, "alice");
    }

    let result = validator.validate_at(&api_key, now).await;
    assert_eq!(
        result,
        Err(AuthError::RateLimitExceeded {
            limit: 3,
            remaining: 0,
            reset_at: reset,
        })
    );
    // the rejected request was not counted
    assert_eq!(daily_count(&store, &api_key).await, 3);
}

#[tokio::test]
async fn test_daily_reset_after_exhaustion() {
    let (validator, store, api_key) = create_test_validator(3, no_global_limit()).await;
    let today = Utc::now();

    for _ in 0..3 {
        validator.validate_at(&api_key, today).await.unwrap();
    }
    assert!(validator.validate_at(&api_key, today).await.is_err());

    let tomorrow = today + ChronoDuration::days(1);
    let validation = validator.validate_at(&api_key, tomorrow).await.unwrap();
    assert_eq!(validation.used, 1);
    assert_eq!(validation.remaining(), 2);

    let credential = store.get_credential(&api_key).await.unwrap().unwrap();
    assert_eq!(credential.usage.daily_request_count, 1);
    assert_eq!(credential.usage.daily_reset_at, start_of_day(tomorrow));
    assert_eq!(credential.usage.request_count, 4);
}

#[tokio::test]
async fn test_invalid_credential_is_rejected_without_mutation() {
    let (validator, store, api_key) = create_test_validator(3, no_global_limit()).await;

    assert_eq!(
        validator.validate("bogus_token").await,
        Err(AuthError::InvalidCredential)
    );
    assert_eq!(validator.validate("").await, Err(AuthError::InvalidCredential));

    let credential = store.get_credential(&api_key).await.unwrap().unwrap();
    assert_eq!(credential.usage.request_count, 0);
    assert_eq!(credential.usage.daily_request_count, 0);
}

#[tokio::test]
async fn test_lifetime_counter_and_last_used() {
    let (validator, store, api_key) = create_test_validator(50, no_global_limit()).await;

    for _ in 0..5 {
        validator.validate(&api_key).await.unwrap();
    }

    let credential = store.get_credential(&api_key).await.unwrap().unwrap();
    assert_eq!(credential.usage.request_count, 5);
    assert_eq!(credential.usage.daily_request_count, 5);
    assert!(credential.usage.last_used.is_some());
}

#[tokio::test]
async fn test_concurrent_validations_respect_limit() {
    let (validator, store, api_key) = create_test_validator(5, no_global_limit()).await;
    let validator = Arc::new(validator);
    let mut handles = vec![];

    for _ in 0..20 {
        let validator = validator.clone();
        let api_key = api_key.clone();
        handles.push(tokio::spawn(async move {
            validator.validate(&api_key).await
        }));
    }

    let results = futures::future::join_all(handles).await;
    let admitted = results
        .iter()
        .filter(|r| r.as_ref().unwrap().is_ok())
        .count();
    let limited = results
        .iter()
        .filter(|r| {
            matches!(
                r.as_ref().unwrap(),
                Err(AuthError::RateLimitExceeded { .. })
            )
        })
        .count();

    assert_eq!(admitted, 5);
    assert_eq!(limited, 15);
    assert_eq!(daily_count(&store, &api_key).await, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_heavy_concurrency_under_limit_admits_everyone() {
    let (validator, store, api_key) = create_test_validator(1000, no_global_limit()).await;
    let validator = Arc::new(validator);
    let mut handles = vec![];

    for _ in 0..200 {
        let validator = validator.clone();
        let api_key = api_key.clone();
        handles.push(tokio::spawn(async move {
            validator.validate(&api_key).await
        }));
    }

    let results = futures::future::join_all(handles).await;
    let failures: Vec<_> = results
        .into_iter()
        .map(|r| r.unwrap())
        .filter_map(Result::err)
        .collect();

    assert!(failures.is_empty(), "unexpected failures: {failures:?}");
    assert_eq!(daily_count(&store, &api_key).await, 200);
    let credential = store.get_credential(&api_key).await.unwrap().unwrap();
    assert_eq!(credential.usage.request_count, 200);
}

#[tokio::test]
async fn test_global_failsafe() {
    let config = LimiterConfig {
        global_limit: 2,
        global_period: Duration::from_secs(3600),
        ..LimiterConfig::default()
    };
    let (validator, store, api_key) = create_test_validator(50, config).await;

    assert!(validator.validate(&api_key).await.is_ok());
    assert!(validator.validate(&api_key).await.is_ok());
    assert_eq!(
        validator.validate(&api_key).await,
        Err(AuthError::SystemOverloaded)
    );
    assert_eq!(daily_count(&store, &api_key).await, 2);
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

#[tokio::test]
async fn test_next_usage_transitions() {
    let (_, store, api_key) = create_test_validator(2, no_global_limit()).await;
    let mut credential = store.get_credential(&api_key).await.unwrap().unwrap();
    credential.usage.daily_reset_at = at(2024, 5, 1, 0);
    credential.usage.daily_request_count = 2;
    credential.usage.request_count = 10;

    // same day at the limit
    assert!(matches!(
        next_usage(&credential, at(2024, 5, 1, 23)),
        Err(AuthError::RateLimitExceeded { reset_at, .. }) if reset_at == at(2024, 5, 2, 0)
    ));

    // next day starts a fresh window
    let next = next_usage(&credential, at(2024, 5, 2, 8)).unwrap();
    assert_eq!(next.daily_request_count, 1);
    assert_eq!(next.daily_reset_at, at(2024, 5, 2, 0));
    assert_eq!(next.request_count, 11);
    assert_eq!(next.last_used, Some(at(2024, 5, 2, 8)));

    // same day below the limit
    credential.usage.daily_request_count = 1;
    let next = next_usage(&credential, at(2024, 5, 1, 12)).unwrap();
    assert_eq!(next.daily_request_count, 2);
    assert_eq!(next.daily_reset_at, at(2024, 5, 1, 0));
}
