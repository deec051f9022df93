//! Configuration types and loading
//!
//! Precedence: environment > config file > defaults. Secrets (GitHub client
//! secret, token encryption key) are only ever read from the environment.

use core_lib::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub github: GitHubConfig,
    pub store: StoreSection,
    pub limits: LimitsConfig,
    pub oauth: OAuthConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    pub redirect_uri: String,
    pub scope: String,
    /// Origin to use instead of github.com (GitHub Enterprise, stubs).
    pub base_url: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            redirect_uri: github::DEFAULT_REDIRECT_URI.to_string(),
            scope: github::DEFAULT_SCOPE.to_string(),
            base_url: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub db_path: PathBuf,
    pub key_prefix: String,
    pub daily_limit: u32,
    /// Base64 of a 32 byte AES key, from BREEZE_ENCRYPTION_KEY.
    #[serde(skip)]
    pub encryption_key: Option<Secret<String>>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("breeze.db"),
            key_prefix: core_lib::token::DEFAULT_KEY_PREFIX.to_string(),
            daily_limit: core_lib::model::DEFAULT_DAILY_LIMIT,
            encryption_key: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Zero disables the global failsafe.
    pub global_limit: u32,
    pub global_period_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            global_limit: 10000,
            global_period_secs: 60,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub state_ttl_secs: u64,
    pub backend: StateBackend,
    pub redis_url: Option<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl_secs: 600,
            backend: StateBackend::Memory,
            redis_url: None,
        }
    }
}

impl Config {
    /// Load the TOML file at `path` if it exists, overlay the process
    /// environment, then validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                String::new()
            }
            Err(e) => return Err(e.into()),
        };

        let mut config = Self::from_toml(&contents)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Overlay values found through `lookup` (normally `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("GITHUB_CLIENT_ID") {
            self.github.client_id = id;
        }
        if let Some(secret) = lookup("GITHUB_CLIENT_SECRET") {
            self.github.client_secret = Some(Secret::new(secret));
        }
        if let Some(uri) = lookup("GITHUB_REDIRECT_URI") {
            self.github.redirect_uri = uri;
        }
        if let Some(path) = lookup("DB_PATH") {
            self.store.db_path = PathBuf::from(path);
        }
        if let Some(key) = lookup("BREEZE_ENCRYPTION_KEY") {
            self.store.encryption_key = Some(Secret::new(key));
        }
        if let Some(url) = lookup("REDIS_URL") {
            self.oauth.redis_url = Some(url);
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.parse::<u16>().ok()) {
            self.server.listen_addr.set_port(port);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.github.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("GITHUB_CLIENT_ID must be set".into()));
        }

        if self
            .github
            .client_secret
            .as_ref()
            .is_none_or(|s| s.expose().trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "GITHUB_CLIENT_SECRET must be set".into(),
            ));
        }

        if !self.github.redirect_uri.starts_with("http://")
            && !self.github.redirect_uri.starts_with("https://")
        {
            return Err(ConfigError::Invalid(format!(
                "redirect_uri must start with http:// or https://, got: {}",
                self.github.redirect_uri
            )));
        }

        if self.store.encryption_key.is_none() {
            return Err(ConfigError::Invalid(
                "BREEZE_ENCRYPTION_KEY must be set".into(),
            ));
        }

        if self.store.daily_limit == 0 {
            return Err(ConfigError::Invalid(
                "daily_limit must be greater than 0".into(),
            ));
        }

        if self.store.key_prefix.is_empty() || self.store.key_prefix.contains('_') {
            return Err(ConfigError::Invalid(
                "key_prefix must be non-empty and must not contain '_'".into(),
            ));
        }

        if self.oauth.backend == StateBackend::Redis && self.oauth.redis_url.is_none() {
            return Err(ConfigError::Invalid(
                "redis_url is required when oauth.backend = \"redis\"".into(),
            ));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("breeze.toml")
    }
}
