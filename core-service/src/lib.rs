//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, filesystem,
//! secure storage, clock) into the sync core: credentials, the selected
//! storage provider and the orchestrator. Desktop apps typically enable the
//! `desktop-shims` feature (which depends on `bridge-desktop`) and call
//! [`bootstrap_desktop`].

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::{
    http::HttpClient,
    storage::{FileSystemAccess, SecureStore, StorageAdapter},
    time::Clock,
};
use chrono::{DateTime, Utc};
use core_auth::{AuthSession, AuthState, CredentialStore, OAuthConfig, OAuthFlow, PkceVerifier};
use core_runtime::{config::CoreConfig, events::EventBus, EventStream};
use core_sync::{CancellationToken, SyncOrchestrator, SyncReport};
use provider_dropbox::DropboxConnector;
use provider_google_drive::GoogleDriveConnector;
use provider_onedrive::OneDriveConnector;
use tracing::{info, instrument};

pub use core_auth::ProviderKind;

const EVENT_BUS_CAPACITY: usize = 256;

/// Provider selection and OAuth client registration on top of [`CoreConfig`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub core: CoreConfig,
    pub provider: ProviderKind,
    pub client_id: String,
    /// Only needed for confidential clients (Google desktop apps)
    pub client_secret: Option<String>,
    pub redirect_uri: String,
}

impl ServiceConfig {
    pub fn new(
        core: CoreConfig,
        provider: ProviderKind,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            core,
            provider,
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
        }
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.core.validate()?;
        if self.client_id.trim().is_empty() {
            return Err(core_runtime::Error::Config("client_id cannot be empty".into()).into());
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(core_runtime::Error::Config("redirect_uri cannot be empty".into()).into());
        }
        Ok(())
    }
}

/// Aggregated handle to all bridge dependencies the core requires.
pub struct CoreDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub filesystem: Arc<dyn FileSystemAccess>,
    pub secure_store: Arc<dyn SecureStore>,
    pub clock: Arc<dyn Clock>,
    pub event_bus: EventBus,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        filesystem: Arc<dyn FileSystemAccess>,
        secure_store: Arc<dyn SecureStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http_client,
            filesystem,
            secure_store,
            clock,
            event_bus: EventBus::new(EVENT_BUS_CAPACITY),
        }
    }

    /// Share an existing bus, e.g. one the host subscribed to already.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }
}

/// Storage adapter for `provider`, rooted at `remote_root`.
pub fn build_storage_adapter(
    provider: ProviderKind,
    http_client: Arc<dyn HttpClient>,
    session: Arc<AuthSession>,
    remote_root: &str,
) -> Arc<dyn StorageAdapter> {
    match provider {
        ProviderKind::Dropbox => Arc::new(DropboxConnector::new(http_client, session, remote_root)),
        ProviderKind::GoogleDrive => {
            Arc::new(GoogleDriveConnector::new(http_client, session, remote_root))
        }
        ProviderKind::OneDrive => {
            Arc::new(OneDriveConnector::new(http_client, session, remote_root))
        }
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    config: Arc<ServiceConfig>,
    session: Arc<AuthSession>,
    adapter: Arc<dyn StorageAdapter>,
    orchestrator: Arc<SyncOrchestrator>,
    event_bus: EventBus,
}

impl CoreService {
    /// Load stored credentials and wire the adapter and orchestrator for the
    /// configured provider.
    pub async fn new(config: ServiceConfig, deps: CoreDependencies) -> Result<Self> {
        config.validate()?;

        let store = CredentialStore::new(deps.secure_store.clone(), config.core.app_id.clone());
        let oauth = OAuthConfig::for_provider(
            config.provider,
            config.client_id.clone(),
            config.client_secret.clone(),
            config.redirect_uri.clone(),
        );
        let flow = OAuthFlow::new(oauth, deps.http_client.clone(), deps.clock.clone());
        let session = Arc::new(
            AuthSession::load(store, flow, deps.clock.clone())
                .await?
                .with_event_bus(deps.event_bus.clone()),
        );

        let adapter = build_storage_adapter(
            config.provider,
            deps.http_client.clone(),
            session.clone(),
            &config.core.remote_root,
        );
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::new(config.core.clone()),
            adapter.clone(),
            deps.filesystem.clone(),
            deps.clock.clone(),
            deps.event_bus.clone(),
        ));

        info!(
            provider = %config.provider,
            remote_root = %config.core.remote_root,
            "Core service initialized"
        );
        Ok(Self {
            config: Arc::new(config),
            session,
            adapter,
            orchestrator,
            event_bus: deps.event_bus,
        })
    }

    pub fn provider(&self) -> ProviderKind {
        self.config.provider
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn storage_adapter(&self) -> Arc<dyn StorageAdapter> {
        Arc::clone(&self.adapter)
    }

    pub async fn auth_state(&self) -> AuthState {
        self.session.state().await
    }

    /// Authorization URL for the host to open, plus the verifier to hand
    /// back to [`complete_sign_in`](Self::complete_sign_in).
    pub fn begin_sign_in(&self) -> Result<(String, PkceVerifier)> {
        Ok(self.session.begin_sign_in()?)
    }

    pub async fn complete_sign_in(&self, code: &str, verifier: &PkceVerifier) -> Result<AuthState> {
        Ok(self.session.complete_sign_in(code, verifier, None).await?)
    }

    pub async fn sign_out(&self) -> Result<()> {
        Ok(self.session.sign_out().await?)
    }

    /// Run one sync. Fails fast without touching the network when signed out.
    #[instrument(skip(self, cancel), fields(provider = %self.config.provider))]
    pub async fn sync_now(&self, cancel: CancellationToken) -> Result<SyncReport> {
        if !self.session.is_authenticated().await {
            return Err(core_auth::AuthError::NotAuthenticated.into());
        }
        Ok(self.orchestrator.sync_now(cancel).await?)
    }

    pub fn is_syncing(&self) -> bool {
        self.orchestrator.is_running()
    }

    pub async fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.orchestrator.last_sync_at().await
    }

    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }
}

/// Convenience bootstrapper for desktop hosts: installs logging and builds
/// the reqwest, tokio filesystem, keyring and system clock bridges.
///
/// ```no_run
/// # async fn example() -> core_service::Result<()> {
/// use core_runtime::config::CoreConfig;
/// use core_service::{bootstrap_desktop, ProviderKind, ServiceConfig};
///
/// let core = CoreConfig::builder().sync_root("/home/me/Purse").build()?;
/// let config = ServiceConfig::new(core, ProviderKind::Dropbox, "app-key", "http://localhost:8765");
/// let service = bootstrap_desktop(config).await?;
/// let (url, verifier) = service.begin_sign_in()?;
/// # Ok(())
/// # }
/// ```
#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub async fn bootstrap_desktop(config: ServiceConfig) -> Result<CoreService> {
    use bridge_desktop::{KeyringSecureStore, ReqwestHttpClient, TokioFileSystem};
    use bridge_traits::time::SystemClock;

    match core_runtime::init_logging(config.core.logging.clone()) {
        Ok(()) => {}
        // A host that installed its own subscriber keeps it.
        Err(core_runtime::Error::LoggingInstalled(reason)) => {
            tracing::debug!(reason = %reason, "Keeping existing subscriber");
        }
        Err(e) => return Err(e.into()),
    }

    let http = ReqwestHttpClient::new()
        .map_err(|e| CoreError::InitializationFailed(format!("HTTP client: {}", e)))?;
    let deps = CoreDependencies::new(
        Arc::new(http),
        Arc::new(TokioFileSystem::new()),
        Arc::new(KeyringSecureStore::with_service_name(config.core.app_id.clone())),
        Arc::new(SystemClock),
    );
    CoreService::new(config, deps).await
}
