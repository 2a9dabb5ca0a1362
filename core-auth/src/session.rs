//! # Provider Session
//!
//! [`AuthSession`] owns the in-memory working copy of one provider's
//! [`TokenBundle`]. Storage adapters borrow access tokens from it and ask it
//! to refresh when a request comes back `401`.
//!
//! ## Refresh protocol
//!
//! - Refreshes are serialized per session by an async mutex.
//! - A caller passes the token that failed (`stale_token`). If another caller
//!   already replaced it while this one waited on the lock, the new token is
//!   returned without a second network round-trip.
//! - A successful refresh is persisted before it is returned, so the token
//!   handed out is always the one stored.
//! - A refresh token rejected by the provider deletes the stored bundle.

use crate::credential_store::CredentialStore;
use crate::error::{AuthError, Result};
use crate::oauth::{OAuthFlow, PkceVerifier};
use crate::types::{AuthState, ProviderKind, TokenBundle};
use bridge_traits::time::Clock;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use core_runtime::logging::redact_if_sensitive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

/// Tokens expiring within this window are refreshed proactively.
pub const TOKEN_REFRESH_BUFFER: Duration = Duration::from_secs(60);

const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AuthSession {
    provider: ProviderKind,
    store: CredentialStore,
    flow: OAuthFlow,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    current: RwLock<Option<TokenBundle>>,
    refresh_lock: Mutex<()>,
}

impl AuthSession {
    /// Load the stored bundle for the flow's provider.
    ///
    /// A missing bundle yields a session with no credentials; requests then
    /// fail with [`AuthError::NotAuthenticated`] without touching the network.
    pub async fn load(store: CredentialStore, flow: OAuthFlow, clock: Arc<dyn Clock>) -> Result<Self> {
        let provider = flow.provider();
        let bundle = store.load(provider).await?;

        match &bundle {
            Some(b) => info!(provider = %provider, expires_at = b.expires_at, "Loaded stored credentials"),
            None => info!(provider = %provider, "No stored credentials; sign-in required"),
        }

        Ok(Self {
            provider,
            store,
            flow,
            clock,
            event_bus: None,
            current: RwLock::new(bundle),
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub async fn state(&self) -> AuthState {
        match self.current.read().await.as_ref() {
            Some(bundle) => AuthState::SignedIn {
                user_id: bundle.user_id.clone(),
                expires_at: bundle.expires_at,
            },
            None => AuthState::SignedOut,
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// The current access token, as loaded or last refreshed.
    pub async fn access_token(&self) -> Result<String> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|b| b.access_token.clone())
            .ok_or(AuthError::NotAuthenticated)
    }

    /// The current access token, refreshed first when it expires within
    /// [`TOKEN_REFRESH_BUFFER`].
    pub async fn valid_access_token(&self) -> Result<String> {
        let (token, expiring) = {
            let current = self.current.read().await;
            let bundle = current.as_ref().ok_or(AuthError::NotAuthenticated)?;
            let expiring = bundle.expires_within(
                self.clock.unix_timestamp(),
                TOKEN_REFRESH_BUFFER.as_secs() as i64,
            );
            (bundle.access_token.clone(), expiring && bundle.can_refresh())
        };

        if expiring {
            debug!(provider = %self.provider, "Access token expiring soon, refreshing");
            self.refresh(&token).await
        } else {
            Ok(token)
        }
    }

    /// Replace `stale_token` with a fresh access token.
    #[instrument(skip(self, stale_token), fields(provider = %self.provider))]
    pub async fn refresh(&self, stale_token: &str) -> Result<String> {
        let _guard = self.refresh_lock.lock().await;

        let bundle = self
            .current
            .read()
            .await
            .clone()
            .ok_or(AuthError::NotAuthenticated)?;

        if bundle.access_token != stale_token {
            debug!("Token already refreshed by a concurrent caller");
            return Ok(bundle.access_token);
        }

        let refresh_token = bundle.refresh_token.clone().filter(|t| !t.is_empty()).ok_or_else(|| {
            warn!("No refresh token available");
            AuthError::TokenRefreshFailed("no refresh token available".to_string())
        })?;

        let refreshed = match timeout(DEFAULT_REFRESH_TIMEOUT, self.flow.refresh(&refresh_token)).await {
            Ok(Ok(refreshed)) => refreshed,
            Ok(Err(AuthError::RefreshRejected(reason))) => {
                error!("Refresh token rejected; discarding stored credentials");
                self.forget().await;
                self.emit(AuthEvent::AuthError {
                    provider: self.provider.as_str().to_string(),
                    message: "Refresh token rejected, sign in again".to_string(),
                    recoverable: false,
                });
                return Err(AuthError::RefreshRejected(reason));
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Token refresh failed");
                self.emit(AuthEvent::AuthError {
                    provider: self.provider.as_str().to_string(),
                    message: format!("Token refresh failed: {}", e),
                    recoverable: true,
                });
                return Err(e);
            }
            Err(_) => {
                warn!("Token refresh timed out");
                return Err(AuthError::Network("token refresh timed out".to_string()));
            }
        };

        let user_id = refreshed.user_id.clone().or(bundle.user_id);
        let refreshed = refreshed.with_user_id(user_id);

        self.store.save(self.provider, &refreshed).await?;
        let token = refreshed.access_token.clone();
        let expires_at = refreshed.expires_at;
        *self.current.write().await = Some(refreshed);

        self.emit(AuthEvent::TokenRefreshed {
            provider: self.provider.as_str().to_string(),
            expires_at,
        });
        info!(expires_at, "Access token refreshed and persisted");
        Ok(token)
    }

    /// Start an authorization attempt; the host opens the returned URL.
    pub fn begin_sign_in(&self) -> Result<(String, PkceVerifier)> {
        self.flow.authorization_url(None)
    }

    /// Exchange the callback code and persist the resulting bundle.
    #[instrument(skip(self, code, verifier), fields(provider = %self.provider))]
    pub async fn complete_sign_in(
        &self,
        code: &str,
        verifier: &PkceVerifier,
        user_id: Option<String>,
    ) -> Result<AuthState> {
        let bundle = self.flow.exchange_code(code, verifier).await.map_err(|e| {
            self.emit(AuthEvent::AuthError {
                provider: self.provider.as_str().to_string(),
                message: format!("Sign-in failed: {}", e),
                recoverable: true,
            });
            e
        })?;
        let user_id = user_id.or_else(|| bundle.user_id.clone());
        let bundle = bundle.with_user_id(user_id.clone());

        let _guard = self.refresh_lock.lock().await;
        self.store.save(self.provider, &bundle).await?;
        let state = AuthState::SignedIn {
            user_id: user_id.clone(),
            expires_at: bundle.expires_at,
        };
        *self.current.write().await = Some(bundle);

        info!(
            user = %redact_if_sensitive("user_id", user_id.as_deref().unwrap_or("unknown")),
            "Signed in"
        );
        self.emit(AuthEvent::SignedIn {
            provider: self.provider.as_str().to_string(),
            user_id,
        });
        Ok(state)
    }

    /// Delete stored credentials and clear the working copy.
    pub async fn sign_out(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        self.store.delete(self.provider).await?;
        *self.current.write().await = None;

        self.emit(AuthEvent::SignedOut {
            provider: self.provider.as_str().to_string(),
        });
        info!(provider = %self.provider, "Signed out");
        Ok(())
    }

    async fn forget(&self) {
        *self.current.write().await = None;
        if let Err(e) = self.store.delete(self.provider).await {
            warn!(error = %e, "Failed to delete rejected credentials");
        }
        self.emit(AuthEvent::SignedOut {
            provider: self.provider.as_str().to_string(),
        });
    }

    fn emit(&self, event: AuthEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Auth(event));
        }
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}
