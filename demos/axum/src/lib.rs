//! HTTP surface of the breeze credential service.
//!
//! Browser clients go through `/api/auth/request` and `/api/auth/callback`.
//! CLI clients pass a `callback_port`, catch the redirect on a loopback
//! listener and post the code to `/api/auth/exchange`.
//! Everything under the API-key middleware is metered per credential.

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, SecondsFormat, Utc};
use core_lib::{
    encryption::TokenCipher, AuthError, IdentityProvider, Principal, StateManager, StateStore,
    Validation,
};
use github::{GitHubEndpoints, GitHubProvider};
use ratelimiter::{CredentialValidator, LimiterConfig};
use serde::{Deserialize, Serialize};
use store::{CredentialStore, Database, RedisStateStore, SqliteCredentialStore, StoreConfig};
use tracing::{error, info, warn};
use url::Url;

use crate::config::{Config, StateBackend};

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Shared handles used by every handler.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn CredentialStore>,
    pub validator: Arc<CredentialValidator>,
}

impl AppState {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn CredentialStore>,
        limits: LimiterConfig,
    ) -> Self {
        let validator = Arc::new(CredentialValidator::new(store.clone(), limits));
        Self {
            provider,
            store,
            validator,
        }
    }

    /// Opens the database, connects the state backend and wires the GitHub
    /// provider from a validated [`Config`].
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let encryption_key = config
            .store
            .encryption_key
            .as_ref()
            .context("BREEZE_ENCRYPTION_KEY must be set")?;
        let cipher = TokenCipher::from_base64(encryption_key.expose())
            .context("BREEZE_ENCRYPTION_KEY must be base64 of 32 bytes")?;

        let db = Database::open(&config.store.db_path).with_context(|| {
            format!("failed to open database {}", config.store.db_path.display())
        })?;
        let store = SqliteCredentialStore::new(
            db,
            cipher,
            StoreConfig {
                key_prefix: config.store.key_prefix.clone(),
                daily_limit: config.store.daily_limit,
            },
        )
        .await
        .context("failed to initialize credential store")?;

        let state_ttl = Duration::from_secs(config.oauth.state_ttl_secs);
        let states: Arc<dyn StateStore> = match config.oauth.backend {
            StateBackend::Memory => Arc::new(StateManager::new(state_ttl)),
            StateBackend::Redis => {
                let url = config
                    .oauth
                    .redis_url
                    .as_deref()
                    .context("redis_url is required for the redis state backend")?;
                Arc::new(
                    RedisStateStore::connect(url, state_ttl)
                        .await
                        .context("failed to connect to redis")?,
                )
            }
        };

        let client_secret = config
            .github
            .client_secret
            .clone()
            .context("GITHUB_CLIENT_SECRET must be set")?;
        let mut provider = GitHubProvider::new(config.github.client_id.clone(), client_secret, states)
            .with_redirect_uri(config.github.redirect_uri.clone())
            .with_scope(config.github.scope.clone());
        if let Some(base) = &config.github.base_url {
            provider = provider.with_endpoints(GitHubEndpoints::with_base(base));
        }

        let limits = LimiterConfig {
            global_limit: config.limits.global_limit,
            global_period: Duration::from_secs(config.limits.global_period_secs),
            ..LimiterConfig::default()
        };

        Ok(Self::new(Arc::new(provider), Arc::new(store), limits))
    }
}

/// Builds the router with every route and the API-key middleware.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/user", get(current_user))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .route("/api/auth/request", get(auth_request))
        .route("/api/auth/callback", get(auth_callback))
        .route("/api/auth/exchange", post(auth_exchange))
        .merge(protected)
        .with_state(state)
}

/// Errors surfaced to HTTP clients.
#[derive(Debug)]
pub enum ApiError {
    MissingApiKey,
    Auth(AuthError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingApiKey => StatusCode::UNAUTHORIZED,
            ApiError::Auth(err) => match err {
                AuthError::InvalidCredential => StatusCode::UNAUTHORIZED,
                AuthError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                AuthError::SystemOverloaded => StatusCode::SERVICE_UNAVAILABLE,
                AuthError::InvalidState | AuthError::ExchangeFailed(_) => StatusCode::BAD_REQUEST,
                AuthError::IdentityLookupFailed(_) => StatusCode::BAD_GATEWAY,
                AuthError::PrincipalNotFound(_)
                | AuthError::DuplicateCredential(_)
                | AuthError::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::MissingApiKey => "API key required".to_string(),
            ApiError::Auth(_) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                error!(error = ?self, "request failed");
                "internal server error".to_string()
            }
            ApiError::Auth(err) => err.to_string(),
        };

        let mut response = (status, Json(ErrorBody { error: message })).into_response();
        if let ApiError::Auth(AuthError::RateLimitExceeded {
            limit,
            remaining,
            reset_at,
        }) = self
        {
            response
                .headers_mut()
                .extend(rate_limit_headers(limit, remaining, reset_at));
        }
        response
    }
}

fn rate_limit_headers(limit: u32, remaining: u32, reset_at: DateTime<Utc>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
    if let Ok(reset) = HeaderValue::from_str(&reset_at.to_rfc3339_opts(SecondsFormat::Secs, true)) {
        headers.insert(X_RATELIMIT_RESET, reset);
    }
    headers
}

/// Reads the key from the `api_key` query parameter, falling back to an
/// `Authorization: Bearer` header.
fn extract_api_key(req: &Request) -> Option<String> {
    let from_query = req.uri().query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(name, _)| name == "api_key")
            .map(|(_, value)| value.into_owned())
    });

    from_query
        .or_else(|| {
            req.headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|v| v.trim().to_string())
        })
        .filter(|key| !key.is_empty())
}

async fn require_api_key(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let api_key = extract_api_key(&req).ok_or(ApiError::MissingApiKey)?;

    let validation = state.validator.validate(&api_key).await.map_err(|err| {
        match &err {
            AuthError::InvalidCredential => warn!(path = %req.uri().path(), "rejected unknown API key"),
            AuthError::RateLimitExceeded { limit, .. } => {
                warn!(path = %req.uri().path(), limit, "daily rate limit exceeded")
            }
            _ => {}
        }
        ApiError::from(err)
    })?;

    let headers = rate_limit_headers(validation.limit, validation.remaining(), validation.reset_at);
    req.extensions_mut().insert(validation);

    let mut response = next.run(req).await;
    response.headers_mut().extend(headers);
    Ok(response)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Redirect URI of a CLI client's loopback listener.
pub fn local_callback_uri(port: u16) -> String {
    format!("http://localhost:{port}/callback")
}

fn local_redirect(callback_port: Option<u16>) -> Result<Option<String>, AuthError> {
    match callback_port {
        Some(0) => Err(AuthError::ExchangeFailed("invalid callback_port".to_string())),
        Some(port) => Ok(Some(local_callback_uri(port))),
        None => Ok(None),
    }
}

#[derive(Deserialize)]
struct AuthRequestParams {
    callback_port: Option<u16>,
}

#[derive(Serialize)]
struct AuthUrlResponse {
    url: String,
    state: String,
}

/// With `callback_port`, GitHub sends the browser straight to the CLI's
/// loopback listener instead of back to this service.
async fn auth_request(
    State(state): State<AppState>,
    Query(params): Query<AuthRequestParams>,
) -> Result<Json<AuthUrlResponse>, ApiError> {
    let redirect_uri = local_redirect(params.callback_port)?;
    let (url, oauth_state) = state
        .provider
        .authorize_url(redirect_uri.as_deref())
        .await?;
    info!(local = redirect_uri.is_some(), "issued authorization url");

    Ok(Json(AuthUrlResponse {
        url,
        state: oauth_state,
    }))
}

#[derive(Serialize, Debug)]
pub struct LoginResponse {
    pub api_key: String,
    /// GitHub login of the principal the key belongs to.
    pub github_user: String,
}

/// Runs the whole handshake: code for token, token for identity, identity
/// for a persisted principal and its API key.
pub async fn complete_login(
    state: &AppState,
    code: &str,
    oauth_state: &str,
    redirect_uri: Option<&str>,
) -> Result<LoginResponse, AuthError> {
    let token = state
        .provider
        .exchange_code(code, oauth_state, redirect_uri)
        .await?;
    let identity = state.provider.resolve_identity(&token.access_token).await?;
    let principal = state.store.upsert_principal(&identity).await?;
    let credential = state
        .store
        .get_or_create_credential(principal.external_id)
        .await?;

    info!(
        login = %principal.login,
        external_id = principal.external_id,
        "issued api key"
    );

    Ok(LoginResponse {
        api_key: credential.api_key,
        github_user: principal.login,
    })
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    #[serde(default)]
    state: String,
    error: Option<String>,
    error_description: Option<String>,
    callback_port: Option<u16>,
}

async fn auth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, ApiError> {
    // Hand the browser on to the CLI listener; it finishes via /api/auth/exchange.
    if let Some(local) = local_redirect(params.callback_port)? {
        let forwarded = [
            ("code", params.code.as_deref()),
            ("state", Some(params.state.as_str()).filter(|s| !s.is_empty())),
            ("error", params.error.as_deref()),
            ("error_description", params.error_description.as_deref()),
        ];
        let location = Url::parse_with_params(
            &local,
            forwarded
                .iter()
                .filter_map(|(name, value)| value.map(|v| (*name, v))),
        )
        .map_err(|e| AuthError::ExchangeFailed(format!("invalid callback url: {e}")))?;

        info!(%location, "redirecting to local callback");
        return Ok((StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response());
    }

    if let Some(error) = params.error {
        let reason = params.error_description.unwrap_or(error);
        warn!(%reason, "authorization denied by github");
        return Err(AuthError::ExchangeFailed(reason).into());
    }

    // Browser redirects must carry a state; only /api/auth/exchange may omit it.
    if params.state.is_empty() {
        return Err(AuthError::InvalidState.into());
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AuthError::ExchangeFailed("missing code parameter".to_string()))?;

    let login = complete_login(&state, &code, &params.state, None).await?;
    Ok(Json(login).into_response())
}

#[derive(Deserialize)]
struct ExchangeRequest {
    code: String,
    #[serde(default)]
    state: String,
    callback_port: Option<u16>,
}

async fn auth_exchange(
    State(state): State<AppState>,
    Json(body): Json<ExchangeRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    if body.code.is_empty() {
        return Err(AuthError::ExchangeFailed("missing code parameter".to_string()).into());
    }
    let redirect_uri = local_redirect(body.callback_port)?;
    let login = complete_login(&state, &body.code, &body.state, redirect_uri.as_deref()).await?;
    Ok(Json(login))
}

async fn current_user(Extension(validation): Extension<Validation>) -> Json<Principal> {
    Json(validation.principal)
}
