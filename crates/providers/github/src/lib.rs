use std::sync::Arc;

use core_lib::{AuthError, Identity, IdentityProvider, Secret, StateStore, TokenSet};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

const GITHUB_API_URL: &str = "https://api.github.com/user";
const GITHUB_AUTH_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";

pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/api/auth/callback";
pub const DEFAULT_SCOPE: &str = "user:email";

const USER_AGENT: &str = concat!("breeze/", env!("CARGO_PKG_VERSION"));

/// The three GitHub endpoints the handshake touches.
#[derive(Debug, Clone)]
pub struct GitHubEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub user_url: String,
}

impl Default for GitHubEndpoints {
    fn default() -> Self {
        Self {
            authorize_url: GITHUB_AUTH_URL.to_string(),
            token_url: GITHUB_TOKEN_URL.to_string(),
            user_url: GITHUB_API_URL.to_string(),
        }
    }
}

impl GitHubEndpoints {
    /// Endpoints laid out like github.com under a different origin, e.g. a
    /// GitHub Enterprise host or a stub server.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            authorize_url: format!("{base}/login/oauth/authorize"),
            token_url: format!("{base}/login/oauth/access_token"),
            user_url: format!("{base}/user"),
        }
    }
}

/// Token endpoint reply. GitHub answers form-encoded unless the `Accept`
/// header is honoured, and reports failures as `error`/`error_description`
/// with a 200.
#[derive(Deserialize, Serialize, Debug, Default)]
struct GitHubTokenResponse {
    access_token: Option<String>,
    scope: Option<String>,
    token_type: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl GitHubTokenResponse {
    /// Picks the format from the body itself; proxies and stubs do not
    /// always label it.
    fn parse(body: &str) -> Result<Self, AuthError> {
        let trimmed = body.trim();
        if trimmed.starts_with('{') {
            return serde_json::from_str(trimmed).map_err(|e| {
                AuthError::ExchangeFailed(format!("malformed token response: {e}"))
            });
        }

        let mut response = Self::default();
        for (key, value) in url::form_urlencoded::parse(trimmed.as_bytes()) {
            let value = Some(value.into_owned()).filter(|v| !v.is_empty());
            match key.as_ref() {
                "access_token" => response.access_token = value,
                "scope" => response.scope = value,
                "token_type" => response.token_type = value,
                "error" => response.error = value,
                "error_description" => response.error_description = value,
                _ => {}
            }
        }
        Ok(response)
    }
}

#[derive(Deserialize, Serialize, Debug)]
struct GitHubUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

pub struct GitHubProvider {
    client_id: String,
    client_secret: Secret<String>,
    redirect_uri: String,
    scope: String,
    endpoints: GitHubEndpoints,
    states: Arc<dyn StateStore>,
    client: Client,
}

impl GitHubProvider {
    pub fn new(client_id: String, client_secret: Secret<String>, states: Arc<dyn StateStore>) -> Self {
        GitHubProvider {
            client_id,
            client_secret,
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            endpoints: GitHubEndpoints::default(),
            states,
            client: Client::new(),
        }
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_endpoints(mut self, endpoints: GitHubEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }
}

#[async_trait::async_trait]
impl IdentityProvider for GitHubProvider {
    async fn authorize_url(
        &self,
        redirect_uri: Option<&str>,
    ) -> Result<(String, String), AuthError> {
        let redirect_uri = redirect_uri.unwrap_or(&self.redirect_uri);
        let state = self.states.issue().await?;

        let url = Url::parse_with_params(
            &self.endpoints.authorize_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("state", state.as_str()),
                ("scope", self.scope.as_str()),
            ],
        )
        .map_err(|e| AuthError::ExchangeFailed(format!("invalid authorize url: {e}")))?;

        Ok((url.into(), state))
    }

    async fn exchange_code(
        &self,
        code: &str,
        state: &str,
        redirect_uri: Option<&str>,
    ) -> Result<TokenSet, AuthError> {
        let redirect_uri = redirect_uri.unwrap_or(&self.redirect_uri);

        // The state is spent even if the exchange below fails.
        self.states.consume(state).await.map_err(|err| match err {
            AuthError::InvalidState => AuthError::ExchangeFailed(err.to_string()),
            other => other,
        })?;

        let res = self
            .client
            .post(&self.endpoints.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose().as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| AuthError::ExchangeFailed(format!("token exchange request failed: {e}")))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| AuthError::ExchangeFailed(format!("failed to read response body: {e}")))?;

        let token_response = GitHubTokenResponse::parse(&body)?;

        match token_response.access_token.filter(|t| !t.is_empty()) {
            Some(access_token) => Ok(TokenSet {
                access_token,
                token_type: token_response.token_type,
                scope: token_response.scope,
            }),
            None => {
                let reason = token_response
                    .error_description
                    .or(token_response.error)
                    .unwrap_or_else(|| {
                        if status.is_success() {
                            "no access token received".to_string()
                        } else {
                            format!("github returned status {}", status.as_u16())
                        }
                    });
                debug!(status = status.as_u16(), %reason, "github token exchange rejected");
                Err(AuthError::ExchangeFailed(reason))
            }
        }
    }

    async fn resolve_identity(&self, access_token: &str) -> Result<Identity, AuthError> {
        let res = self
            .client
            .get(&self.endpoints.user_url)
            .header(header::AUTHORIZATION, format!("token {}", access_token))
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| AuthError::IdentityLookupFailed(format!("user info request failed: {e}")))?;

        if !res.status().is_success() {
            return Err(AuthError::IdentityLookupFailed(format!(
                "github API returned status {}",
                res.status().as_u16()
            )));
        }

        let user: GitHubUser = res
            .json()
            .await
            .map_err(|e| AuthError::IdentityLookupFailed(format!("failed to decode user info: {e}")))?;

        debug!(login = %user.login, external_id = user.id, "resolved github identity");

        Ok(Identity {
            external_id: user.id,
            login: user.login,
            name: user.name,
            email: user.email,
            avatar_url: user.avatar_url,
            access_token: access_token.to_string(),
        })
    }
}
