use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default prefix for issued API keys.
pub const DEFAULT_KEY_PREFIX: &str = "breeze";

/// Access token returned by the provider's code exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

impl TokenSet {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: None,
            scope: None,
        }
    }
}

/// Generates an API key of the form `<prefix>_<uuid-v4>`.
pub fn generate_api_key(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4())
}

/// Returns true if `key` looks like a key minted with `prefix`.
///
/// Only the shape is checked; validity is decided by the store.
pub fn has_key_shape(key: &str, prefix: &str) -> bool {
    key.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|id| Uuid::parse_str(id).is_ok())
}
