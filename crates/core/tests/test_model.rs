use chrono::{Duration, TimeZone, Utc};
use core_lib::model::start_of_day;
use core_lib::{Credential, Principal, Usage, Validation};

fn principal() -> Principal {
    let now = Utc::now();
    Principal {
        external_id: 555,
        login: "alice".to_string(),
        name: None,
        email: Some("alice@example.com".to_string()),
        avatar_url: None,
        access_token: "tok123".to_string(),
        created_at: now,
        last_login: now,
    }
}

#[test]
fn test_start_of_day_is_utc_midnight() {
    let now = Utc.with_ymd_and_hms(2024, 3, 9, 17, 45, 12).unwrap();
    assert_eq!(
        start_of_day(now),
        Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap()
    );

    let midnight = Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap();
    assert_eq!(start_of_day(midnight), midnight);
}

#[test]
fn test_credential_reset_is_one_day_after_window_start() {
    let window = Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap();
    let credential = Credential {
        api_key: "breeze_x".to_string(),
        external_id: 555,
        created_at: window,
        daily_limit: 50,
        usage: Usage {
            request_count: 0,
            daily_request_count: 0,
            daily_reset_at: window,
            last_used: None,
        },
    };
    assert_eq!(credential.reset_at(), window + Duration::days(1));
}

#[test]
fn test_validation_remaining_saturates() {
    let validation = Validation {
        principal: principal(),
        limit: 3,
        used: 3,
        reset_at: Utc::now(),
    };
    assert_eq!(validation.remaining(), 0);

    let over = Validation { used: 7, ..validation };
    assert_eq!(over.remaining(), 0);
}

#[test]
fn test_principal_never_serializes_access_token() {
    let json = serde_json::to_string(&principal()).unwrap();
    assert!(!json.contains("tok123"));
    assert!(!json.contains("access_token"));
    assert!(json.contains("\"login\":\"alice\""));
}
