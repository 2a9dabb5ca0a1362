//! Bearer-authenticated HTTP shared by the storage adapters.

use crate::session::AuthSession;
use bridge_traits::error::{StorageError, StorageResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use std::sync::Arc;
use tracing::{debug, warn};

/// Sends requests with the session's current access token. A `401` triggers
/// exactly one refresh and one replay; a second `401` is returned to the
/// caller unchanged.
#[derive(Clone)]
pub struct AuthorizedHttp {
    http: Arc<dyn HttpClient>,
    session: Arc<AuthSession>,
}

impl AuthorizedHttp {
    pub fn new(http: Arc<dyn HttpClient>, session: Arc<AuthSession>) -> Self {
        Self { http, session }
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    /// `build` is called once per attempt with the token to use.
    pub async fn send<F>(&self, build: F) -> StorageResult<HttpResponse>
    where
        F: Fn(&str) -> HttpRequest + Send + Sync,
    {
        let token = self.session.valid_access_token().await?;
        let response = self.execute(build(&token)).await?;
        if response.status != 401 {
            return Ok(response);
        }

        debug!(provider = %self.session.provider(), "Access token rejected, refreshing once");
        let fresh = self.session.refresh(&token).await?;
        let replay = self.execute(build(&fresh)).await?;
        if replay.status == 401 {
            warn!(provider = %self.session.provider(), "Request still unauthorized after refresh");
        }
        Ok(replay)
    }

    /// Unauthenticated request, e.g. a pre-signed upload session URL.
    pub async fn send_anonymous(&self, request: HttpRequest) -> StorageResult<HttpResponse> {
        self.execute(request).await
    }

    /// Force a refresh of the current token.
    pub async fn refresh_token(&self) -> StorageResult<String> {
        let current = self.session.access_token().await?;
        Ok(self.session.refresh(&current).await?)
    }

    async fn execute(&self, request: HttpRequest) -> StorageResult<HttpResponse> {
        self.http
            .execute(request)
            .await
            .map_err(|e| StorageError::Transient(e.to_string()))
    }
}

impl std::fmt::Debug for AuthorizedHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedHttp")
            .field("provider", &self.session.provider())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential_store::CredentialStore;
    use crate::oauth::{OAuthConfig, OAuthFlow};
    use crate::types::{ProviderKind, TokenBundle};
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::HttpMethod;
    use bridge_traits::storage::SecureStore;
    use bridge_traits::time::{Clock, FixedClock};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    const NOW: i64 = 1_700_000_000;
    const TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";

    #[derive(Default)]
    struct MemoryStore {
        secrets: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl SecureStore for MemoryStore {
        async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
            self.secrets.lock().await.insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
            Ok(self.secrets.lock().await.get(key).cloned())
        }

        async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
            self.secrets.lock().await.remove(key);
            Ok(())
        }
    }

    /// API that accepts only `fresh-token`; the token endpoint issues it.
    #[derive(Default)]
    struct Api {
        seen: Mutex<Vec<(String, Option<String>)>>,
        always_unauthorized: bool,
        offline: bool,
    }

    #[async_trait]
    impl HttpClient for Api {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            let auth = request.headers.get("Authorization").cloned();
            self.seen.lock().await.push((request.url.clone(), auth.clone()));
            if self.offline {
                return Err(BridgeError::Network("connection refused".into()));
            }
            if request.url == TOKEN_URL {
                return Ok(HttpResponse::new(
                    200,
                    r#"{"access_token":"fresh-token","expires_in":14400}"#,
                ));
            }
            if !self.always_unauthorized && auth.as_deref() == Some("Bearer fresh-token") {
                Ok(HttpResponse::new(200, "ok"))
            } else {
                Ok(HttpResponse::new(401, r#"{"error_summary":"expired_access_token/"}"#))
            }
        }
    }

    async fn client(api: Arc<Api>, stored: Option<TokenBundle>) -> AuthorizedHttp {
        let store = CredentialStore::new(Arc::new(MemoryStore::default()), "app");
        if let Some(bundle) = stored {
            store.save(ProviderKind::Dropbox, &bundle).await.unwrap();
        }
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(NOW));
        let config =
            OAuthConfig::for_provider(ProviderKind::Dropbox, "key", None, "http://localhost");
        let flow = OAuthFlow::new(config, api.clone(), clock.clone());
        let session = AuthSession::load(store, flow, clock).await.unwrap();
        AuthorizedHttp::new(api, Arc::new(session))
    }

    fn bundle() -> TokenBundle {
        TokenBundle {
            access_token: "stale-token".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: NOW + 3600,
            user_id: None,
        }
    }

    fn get(token: &str) -> HttpRequest {
        HttpRequest::new(HttpMethod::Get, "https://api.example.com/files").bearer_token(token)
    }

    #[tokio::test]
    async fn test_401_refreshes_and_replays_once() {
        let api = Arc::new(Api::default());
        let http = client(api.clone(), Some(bundle())).await;

        let response = http.send(get).await.unwrap();

        assert_eq!(response.status, 200);
        let seen = api.seen.lock().await.clone();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].1.as_deref(), Some("Bearer stale-token"));
        assert_eq!(seen[1].0, TOKEN_URL);
        assert_eq!(seen[2].1.as_deref(), Some("Bearer fresh-token"));
        assert_eq!(http.session().access_token().await.unwrap(), "fresh-token");
    }

    #[tokio::test]
    async fn test_second_401_is_returned() {
        let api = Arc::new(Api {
            always_unauthorized: true,
            ..Api::default()
        });
        let http = client(api.clone(), Some(bundle())).await;

        let response = http.send(get).await.unwrap();

        assert_eq!(response.status, 401);
        // original, token endpoint, one replay
        assert_eq!(api.seen.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn test_signed_out_is_unauthorized_without_network() {
        let api = Arc::new(Api::default());
        let http = client(api.clone(), None).await;

        let result = http.send(get).await;

        assert!(matches!(result, Err(StorageError::Unauthorized(_))));
        assert!(api.seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_is_transient() {
        let api = Arc::new(Api {
            offline: true,
            ..Api::default()
        });
        let http = client(api, Some(bundle())).await;

        assert!(matches!(http.send(get).await, Err(StorageError::Transient(_))));
    }

    #[tokio::test]
    async fn test_forced_refresh() {
        let api = Arc::new(Api::default());
        let http = client(api, Some(bundle())).await;

        assert_eq!(http.refresh_token().await.unwrap(), "fresh-token");
    }
}
