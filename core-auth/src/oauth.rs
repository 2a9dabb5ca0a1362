//! OAuth 2.0 Authorization Code Flow with PKCE
//!
//! Implements RFC 6749 (OAuth 2.0) and RFC 7636 (PKCE) against the token
//! endpoints of the supported providers:
//! - Building authorization URLs with an S256 code challenge
//! - Exchanging authorization codes for a [`TokenBundle`]
//! - Refreshing access tokens
//!
//! Codes, verifiers and tokens are never logged.
//!
//! # Example
//!
//! ```no_run
//! use core_auth::oauth::{OAuthConfig, OAuthFlow};
//! use core_auth::ProviderKind;
//! use std::sync::Arc;
//!
//! # async fn example() -> core_auth::Result<()> {
//! # use bridge_traits::http::HttpClient;
//! # use bridge_traits::time::SystemClock;
//! # let http_client: Arc<dyn HttpClient> = todo!();
//! let config = OAuthConfig::for_provider(
//!     ProviderKind::Dropbox,
//!     "app-key",
//!     Some("app-secret".to_string()),
//!     "http://localhost:8080/callback",
//! );
//!
//! let flow = OAuthFlow::new(config, http_client, Arc::new(SystemClock));
//! let (auth_url, verifier) = flow.authorization_url(None)?;
//! // Send the user to auth_url, then:
//! let bundle = flow.exchange_code("code-from-callback", &verifier).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::{ProviderKind, TokenBundle};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::time::Clock;
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

const MAX_REFRESH_ATTEMPTS: u32 = 3;

/// OAuth 2.0 provider configuration.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub provider: ProviderKind,
    pub client_id: String,
    /// Optional for public (PKCE-only) clients
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub auth_url: String,
    pub token_url: String,
    /// Provider-specific authorization parameters (offline access etc.)
    pub extra_auth_params: Vec<(String, String)>,
}

impl OAuthConfig {
    /// Endpoints, scopes and offline-access parameters for `provider`.
    pub fn for_provider(
        provider: ProviderKind,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        let (auth_url, token_url, scopes, extra): (&str, &str, &[&str], &[(&str, &str)]) =
            match provider {
                ProviderKind::Dropbox => (
                    "https://www.dropbox.com/oauth2/authorize",
                    "https://api.dropboxapi.com/oauth2/token",
                    &[
                        "files.content.write",
                        "files.content.read",
                        "files.metadata.read",
                        "account_info.read",
                    ],
                    &[("token_access_type", "offline")],
                ),
                ProviderKind::GoogleDrive => (
                    "https://accounts.google.com/o/oauth2/v2/auth",
                    "https://oauth2.googleapis.com/token",
                    &["https://www.googleapis.com/auth/drive.file"],
                    &[("access_type", "offline"), ("prompt", "consent")],
                ),
                ProviderKind::OneDrive => (
                    "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
                    "https://login.microsoftonline.com/common/oauth2/v2.0/token",
                    &["Files.ReadWrite", "User.Read", "offline_access"],
                    &[],
                ),
            };

        Self {
            provider,
            client_id: client_id.into(),
            client_secret,
            redirect_uri: redirect_uri.into(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            auth_url: auth_url.to_string(),
            token_url: token_url.to_string(),
            extra_auth_params: extra
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }
}

/// PKCE (Proof Key for Code Exchange) verifier.
///
/// Holds the code verifier and the CSRF state for one authorization attempt.
/// Only the derived challenge is sent to the authorization server.
#[derive(Clone)]
pub struct PkceVerifier {
    verifier: String,
    state: String,
}

impl PkceVerifier {
    /// 32 random bytes of verifier and 16 of state, URL-safe base64 without padding.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();

        let mut verifier_bytes = [0u8; 32];
        rng.fill(&mut verifier_bytes);

        let mut state_bytes = [0u8; 16];
        rng.fill(&mut state_bytes);

        Self {
            verifier: URL_SAFE_NO_PAD.encode(verifier_bytes),
            state: URL_SAFE_NO_PAD.encode(state_bytes),
        }
    }

    /// Rebuild a verifier persisted by the host between redirect and callback.
    pub fn from_parts(verifier: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            verifier: verifier.into(),
            state: state.into(),
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// S256 method: BASE64URL(SHA256(code_verifier))
    pub fn challenge(&self) -> String {
        let hash = Sha256::digest(self.verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hash)
    }

    /// Compare the `state` returned on the callback with the one sent.
    pub fn verify_state(&self, returned: &str) -> Result<()> {
        if returned == self.state {
            Ok(())
        } else {
            Err(AuthError::StateMismatch {
                expected: self.state.clone(),
                actual: returned.to_string(),
            })
        }
    }
}

impl Default for PkceVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PkceVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceVerifier")
            .field("verifier", &"[REDACTED]")
            .field("state", &self.state)
            .finish()
    }
}

/// OAuth 2.0 authorization-code flow for one provider.
pub struct OAuthFlow {
    config: OAuthConfig,
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
}

impl OAuthFlow {
    pub fn new(config: OAuthConfig, http_client: Arc<dyn HttpClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            http_client,
            clock,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.config.provider
    }

    /// Build the URL the user visits to authorize the application.
    ///
    /// A random state is generated when `state` is `None`. The returned
    /// verifier must be kept until the callback arrives.
    #[instrument(skip(self, state), fields(provider = %self.config.provider))]
    pub fn authorization_url(&self, state: Option<&str>) -> Result<(String, PkceVerifier)> {
        let mut verifier = PkceVerifier::new();
        if let Some(state) = state {
            verifier.state = state.to_string();
        }

        let mut url = Url::parse(&self.config.auth_url)
            .map_err(|e| AuthError::Other(format!("Invalid auth URL: {}", e)))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair("redirect_uri", &self.config.redirect_uri);
            query.append_pair("response_type", "code");
            if !self.config.scopes.is_empty() {
                query.append_pair("scope", &self.config.scopes.join(" "));
            }
            query.append_pair("state", verifier.state());
            query.append_pair("code_challenge", &verifier.challenge());
            query.append_pair("code_challenge_method", "S256");
            for (key, value) in &self.config.extra_auth_params {
                query.append_pair(key, value);
            }
        }

        debug!("Built authorization URL");
        Ok((url.to_string(), verifier))
    }

    /// Exchange an authorization code for a token bundle.
    #[instrument(skip(self, code, verifier), fields(provider = %self.config.provider))]
    pub async fn exchange_code(&self, code: &str, verifier: &PkceVerifier) -> Result<TokenBundle> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", verifier.verifier()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        let response = self.post_token_request(&params).await?;

        if !response.is_success() {
            let body = error_body(&response);
            warn!(status = response.status, error = %body, "Token exchange failed");
            return Err(AuthError::InvalidAuthCode(format!(
                "Token endpoint returned {}: {}",
                response.status, body
            )));
        }

        let token_response = parse_token_response(&response)?;
        info!(expires_in = token_response.expires_in, "Exchanged authorization code for tokens");

        let user_id = token_response.user_id();
        Ok(TokenBundle::from_expires_in(
            token_response.access_token,
            token_response.refresh_token,
            token_response.expires_in,
            self.clock.unix_timestamp(),
        )
        .with_user_id(user_id))
    }

    /// Obtain a new access token.
    ///
    /// The previous refresh token is kept when the provider does not rotate
    /// it. Server errors are retried with a short backoff; `invalid_grant`
    /// yields [`AuthError::RefreshRejected`].
    #[instrument(skip(self, refresh_token), fields(provider = %self.config.provider))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenBundle> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let response = self.post_token_request(&params).await?;

            if response.is_success() {
                let token_response = parse_token_response(&response)?;
                info!(expires_in = token_response.expires_in, "Refreshed access token");

                let user_id = token_response.user_id();
                return Ok(TokenBundle::from_expires_in(
                    token_response.access_token,
                    token_response
                        .refresh_token
                        .or_else(|| Some(refresh_token.to_string())),
                    token_response.expires_in,
                    self.clock.unix_timestamp(),
                )
                .with_user_id(user_id));
            }

            let status = response.status;
            let body = error_body(&response);

            if response.is_client_error() {
                let oauth_error = response
                    .json::<OAuthErrorResponse>()
                    .map(|e| e.error)
                    .unwrap_or_default();
                warn!(status, error = %oauth_error, "Token refresh rejected");

                if oauth_error == "invalid_grant" || status == 401 {
                    return Err(AuthError::RefreshRejected(body));
                }
                return Err(AuthError::TokenRefreshFailed(format!(
                    "Token endpoint returned {}: {}",
                    status, body
                )));
            }

            if attempts >= MAX_REFRESH_ATTEMPTS {
                return Err(AuthError::TokenRefreshFailed(format!(
                    "Token refresh failed after {} attempts. Last error: {} - {}",
                    attempts, status, body
                )));
            }

            let delay = Duration::from_millis(100 * 2u64.pow(attempts - 1));
            warn!(
                status,
                attempts,
                delay_ms = delay.as_millis() as u64,
                "Token refresh failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn post_token_request(&self, params: &[(&str, &str)]) -> Result<HttpResponse> {
        let request = HttpRequest::new(HttpMethod::Post, self.config.token_url.clone())
            .header("Accept", "application/json")
            .form(&params)
            .map_err(|e| AuthError::Other(format!("Failed to encode token request: {}", e)))?;

        self.http_client
            .execute(request)
            .await
            .map_err(|e| AuthError::Network(e.to_string()))
    }
}

fn error_body(response: &HttpResponse) -> String {
    response
        .text()
        .unwrap_or_else(|_| "Unable to read error response".to_string())
}

fn parse_token_response(response: &HttpResponse) -> Result<TokenResponse> {
    let token_response: TokenResponse = response
        .json()
        .map_err(|e| AuthError::Other(format!("Failed to parse token response: {}", e)))?;
    if token_response.access_token.is_empty() {
        return Err(AuthError::InvalidToken(
            "token endpoint returned an empty access token".to_string(),
        ));
    }
    Ok(token_response)
}

/// JSON body of a successful token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    /// Dropbox
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default)]
    uid: Option<String>,
}

impl TokenResponse {
    fn user_id(&self) -> Option<String> {
        self.account_id.clone().or_else(|| self.uid.clone())
    }
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    #[serde(default)]
    error: String,
}

fn default_expires_in() -> i64 {
    3600
}
