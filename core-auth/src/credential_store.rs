//! Secure Credential Storage
//!
//! Persists one [`TokenBundle`] per (application, provider) pair through the
//! host's [`SecureStore`] (Keychain, Credential Manager, Secret Service).
//!
//! - Bundles are serialized to JSON and stored as a single opaque secret
//! - Token values are never logged
//! - A corrupted secret is erased and reported as absent
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{CredentialStore, ProviderKind, TokenBundle};
//! use std::sync::Arc;
//! # use bridge_traits::storage::SecureStore;
//! # async fn example(secure_store: Arc<dyn SecureStore>) -> core_auth::Result<()> {
//! let store = CredentialStore::new(secure_store, "com.christopherspenn.purse");
//!
//! let bundle = TokenBundle::from_expires_in("access", Some("refresh".into()), 3600, 0);
//! store.save(ProviderKind::Dropbox, &bundle).await?;
//!
//! let loaded = store.load(ProviderKind::Dropbox).await?;
//! store.delete(ProviderKind::Dropbox).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::{ProviderKind, TokenBundle};
use bridge_traits::storage::SecureStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Secure storage for provider token bundles.
///
/// Failure to reach the secret store surfaces as
/// [`AuthError::SecureStorageUnavailable`] and is never retried.
#[derive(Clone)]
pub struct CredentialStore {
    secure_store: Arc<dyn SecureStore>,
    app_id: String,
}

impl CredentialStore {
    pub fn new(secure_store: Arc<dyn SecureStore>, app_id: impl Into<String>) -> Self {
        Self {
            secure_store,
            app_id: app_id.into(),
        }
    }

    /// Secret key for `provider`, e.g. `com.christopherspenn.purse_Dropbox`.
    pub fn storage_key(&self, provider: ProviderKind) -> String {
        format!("{}_{}", self.app_id, provider.as_str())
    }

    /// Store the bundle, overwriting any previous one.
    pub async fn save(&self, provider: ProviderKind, bundle: &TokenBundle) -> Result<()> {
        if bundle.access_token.trim().is_empty() {
            warn!(provider = %provider, "Refusing to store bundle without access token");
            return Err(AuthError::InvalidToken(
                "access token missing from token bundle".to_string(),
            ));
        }

        let json = serde_json::to_vec(bundle)
            .map_err(|e| AuthError::Other(format!("Failed to serialize tokens: {}", e)))?;

        self.secure_store
            .set_secret(&self.storage_key(provider), &json)
            .await
            .map_err(|e| {
                warn!(provider = %provider, error = %e, "Failed to store tokens in secure storage");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        info!(
            provider = %provider,
            has_refresh_token = bundle.can_refresh(),
            expires_at = bundle.expires_at,
            "Tokens stored securely"
        );
        Ok(())
    }

    /// Load the bundle for `provider`.
    ///
    /// Returns `Ok(None)` when nothing is stored or the stored blob could not
    /// be decoded (it is deleted in that case).
    pub async fn load(&self, provider: ProviderKind) -> Result<Option<TokenBundle>> {
        let key = self.storage_key(provider);

        let data = self.secure_store.get_secret(&key).await.map_err(|e| {
            warn!(provider = %provider, error = %e, "Failed to read tokens from secure storage");
            AuthError::SecureStorageUnavailable(e.to_string())
        })?;

        let Some(data) = data else {
            debug!(provider = %provider, "No tokens found in storage");
            return Ok(None);
        };

        match serde_json::from_slice::<TokenBundle>(&data) {
            Ok(bundle) if !bundle.access_token.is_empty() => {
                debug!(
                    provider = %provider,
                    expires_at = bundle.expires_at,
                    "Tokens loaded from secure storage"
                );
                Ok(Some(bundle))
            }
            Ok(_) => {
                warn!(provider = %provider, "Stored bundle has no access token, discarding");
                self.discard_corrupted(&key, provider).await;
                Ok(None)
            }
            Err(e) => {
                warn!(
                    provider = %provider,
                    error = %e,
                    "Failed to deserialize tokens, they may be corrupted"
                );
                self.discard_corrupted(&key, provider).await;
                Ok(None)
            }
        }
    }

    /// Erase the bundle. Succeeds when nothing is stored.
    pub async fn delete(&self, provider: ProviderKind) -> Result<()> {
        self.secure_store
            .delete_secret(&self.storage_key(provider))
            .await
            .map_err(|e| {
                warn!(provider = %provider, error = %e, "Failed to delete tokens from secure storage");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        info!(provider = %provider, "Tokens deleted");
        Ok(())
    }

    pub async fn has_credentials(&self, provider: ProviderKind) -> Result<bool> {
        self.secure_store
            .has_secret(&self.storage_key(provider))
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))
    }

    async fn discard_corrupted(&self, key: &str, provider: ProviderKind) {
        if let Err(e) = self.secure_store.delete_secret(key).await {
            warn!(provider = %provider, error = %e, "Failed to delete corrupted token data");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MockSecureStore {
        storage: Mutex<HashMap<String, Vec<u8>>>,
        unavailable: AtomicBool,
    }

    impl MockSecureStore {
        fn check(&self) -> BridgeResult<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                Err(BridgeError::NotAvailable("keychain locked".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait::async_trait]
    impl SecureStore for MockSecureStore {
        async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
            self.check()?;
            self.storage.lock().await.insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
            self.check()?;
            Ok(self.storage.lock().await.get(key).cloned())
        }

        async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
            self.check()?;
            self.storage.lock().await.remove(key);
            Ok(())
        }
    }

    fn bundle() -> TokenBundle {
        TokenBundle::from_expires_in("access_123", Some("refresh_456".into()), 3600, 1_700_000_000)
            .with_user_id(Some("dbid:42".into()))
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let secure = Arc::new(MockSecureStore::default());
        let store = CredentialStore::new(secure.clone(), "com.example.app");

        store.save(ProviderKind::Dropbox, &bundle()).await.unwrap();
        let loaded = store.load(ProviderKind::Dropbox).await.unwrap();

        assert_eq!(loaded, Some(bundle()));
        assert!(secure
            .storage
            .lock()
            .await
            .contains_key("com.example.app_Dropbox"));
    }

    #[tokio::test]
    async fn test_providers_are_isolated() {
        let store = CredentialStore::new(Arc::new(MockSecureStore::default()), "app");

        store.save(ProviderKind::OneDrive, &bundle()).await.unwrap();

        assert!(store.load(ProviderKind::GoogleDrive).await.unwrap().is_none());
        assert!(store.has_credentials(ProviderKind::OneDrive).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = CredentialStore::new(Arc::new(MockSecureStore::default()), "app");

        store.save(ProviderKind::Dropbox, &bundle()).await.unwrap();
        let mut newer = bundle();
        newer.access_token = "access_789".to_string();
        store.save(ProviderKind::Dropbox, &newer).await.unwrap();

        let loaded = store.load(ProviderKind::Dropbox).await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "access_789");
    }

    #[tokio::test]
    async fn test_empty_access_token_rejected() {
        let store = CredentialStore::new(Arc::new(MockSecureStore::default()), "app");
        let mut empty = bundle();
        empty.access_token = String::new();

        let result = store.save(ProviderKind::Dropbox, &empty).await;
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn test_corrupted_bundle_is_deleted() {
        let secure = Arc::new(MockSecureStore::default());
        secure
            .storage
            .lock()
            .await
            .insert("app_GoogleDrive".to_string(), b"not json".to_vec());
        let store = CredentialStore::new(secure.clone(), "app");

        let loaded = store.load(ProviderKind::GoogleDrive).await.unwrap();

        assert!(loaded.is_none());
        assert!(secure.storage.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_succeeds() {
        let store = CredentialStore::new(Arc::new(MockSecureStore::default()), "app");
        store.delete(ProviderKind::OneDrive).await.unwrap();
        assert!(store.load(ProviderKind::OneDrive).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_store_is_fatal() {
        let secure = Arc::new(MockSecureStore::default());
        secure.unavailable.store(true, Ordering::SeqCst);
        let store = CredentialStore::new(secure, "app");

        assert!(matches!(
            store.load(ProviderKind::Dropbox).await,
            Err(AuthError::SecureStorageUnavailable(_))
        ));
        assert!(matches!(
            store.save(ProviderKind::Dropbox, &bundle()).await,
            Err(AuthError::SecureStorageUnavailable(_))
        ));
    }
}
