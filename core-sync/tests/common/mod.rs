//! Shared fixtures: an in-memory storage adapter and a tempdir-backed setup.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::{BridgeError, Result as BridgeResult, StorageError, StorageResult};
use bridge_traits::storage::{
    join_relative, normalize_relative, DeleteOutcome, FileSystemAccess, RemoteListing,
    RemoteObjectMetadata, StorageAdapter,
};
use bridge_traits::time::{Clock, FixedClock};
use bytes::Bytes;
use core_runtime::config::{CoreConfig, RetryConfig};
use core_runtime::events::EventBus;
use core_sync::SyncOrchestrator;
use futures::StreamExt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

pub const T0: i64 = 1_700_000_000;

#[derive(Clone)]
pub struct RemoteFile {
    pub content: Bytes,
    pub modified_at: i64,
}

#[derive(Default)]
pub struct InMemoryAdapter {
    files: Mutex<BTreeMap<String, RemoteFile>>,
    folders: Mutex<BTreeSet<String>>,
    /// Injected error per path and how many more calls it applies to
    failures: Mutex<HashMap<String, (StorageError, usize)>>,
    list_failure: Mutex<Option<StorageError>>,
    /// Error yielded after the first listed file, for this many listings
    page_failure: Mutex<Option<(StorageError, usize)>>,
    uploads: Mutex<Vec<String>>,
    gate: Mutex<Option<Arc<Notify>>>,
    upload_gate: Mutex<Option<UploadGate>>,
}

/// Holds one upload of `path` until `release` fires; `started` fires on entry.
pub struct UploadGate {
    pub path: String,
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl InMemoryAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, path: &str, content: &str, modified_at: i64) {
        self.files.lock().unwrap().insert(
            path.to_string(),
            RemoteFile {
                content: Bytes::from(content.to_string()),
                modified_at,
            },
        );
    }

    pub fn get(&self, path: &str) -> Option<RemoteFile> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn fail_on(&self, path: &str, error: StorageError) {
        self.fail_times(path, error, usize::MAX);
    }

    /// Fail the next `times` calls touching `path`, then behave normally.
    pub fn fail_times(&self, path: &str, error: StorageError, times: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(path.to_string(), (error, times));
    }

    /// The next `times` listings yield `error` right after the first file.
    pub fn fail_listing_after_first_file(&self, error: StorageError, times: usize) {
        *self.page_failure.lock().unwrap() = Some((error, times));
    }

    /// Hold the upload of `path`; returns `(started, release)`.
    pub fn gate_upload(&self, path: &str) -> (Arc<Notify>, Arc<Notify>) {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.upload_gate.lock().unwrap() = Some(UploadGate {
            path: path.to_string(),
            started: started.clone(),
            release: release.clone(),
        });
        (started, release)
    }

    pub fn fail_listing(&self, error: StorageError) {
        *self.list_failure.lock().unwrap() = Some(error);
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn has_folder(&self, path: &str) -> bool {
        self.folders.lock().unwrap().contains(path)
    }

    /// Block `ensure_folder` until the returned notify fires.
    pub fn install_gate(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(notify.clone());
        notify
    }

    /// Let a gated `ensure_folder` through and stop gating later calls.
    pub fn release_gate(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.notify_one();
        }
    }

    fn injected_failure(&self, path: &str) -> Option<StorageError> {
        let mut failures = self.failures.lock().unwrap();
        let (error, remaining) = failures.get_mut(path)?;
        if *remaining == 0 {
            return None;
        }
        *remaining = remaining.saturating_sub(1);
        Some(error.clone())
    }

    fn metadata_for(path: &str, file: &RemoteFile) -> RemoteObjectMetadata {
        RemoteObjectMetadata {
            id: format!("id:{}", path),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            path: path.to_string(),
            revision: format!("rev-{}", file.modified_at),
            size: file.content.len() as u64,
            modified_at: file.modified_at,
            is_folder: false,
            is_deleted: false,
        }
    }
}

#[async_trait]
impl StorageAdapter for InMemoryAdapter {
    fn provider_name(&self) -> &'static str {
        "InMemory"
    }

    fn root(&self) -> &str {
        "/Apps/Purse"
    }

    fn list_all<'a>(&'a self, _path: &'a str) -> RemoteListing<'a> {
        if let Some(error) = self.list_failure.lock().unwrap().clone() {
            return futures::stream::iter(vec![Err(error)]).boxed();
        }
        let mut items: Vec<StorageResult<RemoteObjectMetadata>> = self
            .folders
            .lock()
            .unwrap()
            .iter()
            .filter(|f| !f.is_empty())
            .map(|f| {
                Ok(RemoteObjectMetadata {
                    id: format!("id:{}", f),
                    name: f.clone(),
                    path: f.clone(),
                    revision: String::new(),
                    size: 0,
                    modified_at: 0,
                    is_folder: true,
                    is_deleted: false,
                })
            })
            .collect();
        let mut files: Vec<StorageResult<RemoteObjectMetadata>> = self
            .files
            .lock()
            .unwrap()
            .iter()
            .map(|(p, f)| Ok(Self::metadata_for(p, f)))
            .collect();
        let mut page_failure = self.page_failure.lock().unwrap();
        if let Some((error, remaining)) = page_failure.as_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                // The listing ends at the failed page, like the real adapters.
                files.truncate(1);
                files.push(Err(error.clone()));
            }
        }
        items.extend(files);
        futures::stream::iter(items).boxed()
    }

    async fn download(&self, path: &str) -> StorageResult<Bytes> {
        if let Some(error) = self.injected_failure(path) {
            return Err(error);
        }
        self.get(path)
            .map(|f| f.content)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn upload(
        &self,
        content: Bytes,
        folder: &str,
        name: &str,
        modified_at: Option<i64>,
    ) -> StorageResult<RemoteObjectMetadata> {
        let path = join_relative(folder, name);
        let gate = {
            let mut slot = self.upload_gate.lock().unwrap();
            match slot.as_ref() {
                Some(gate) if gate.path == path => slot.take(),
                _ => None,
            }
        };
        if let Some(gate) = gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }
        if let Some(error) = self.injected_failure(&path) {
            return Err(error);
        }
        let file = RemoteFile {
            content,
            modified_at: modified_at.unwrap_or(T0),
        };
        self.files.lock().unwrap().insert(path.clone(), file.clone());
        self.uploads.lock().unwrap().push(path.clone());
        Ok(Self::metadata_for(&path, &file))
    }

    async fn delete(&self, path: &str) -> StorageResult<DeleteOutcome> {
        Ok(match self.files.lock().unwrap().remove(path) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }

    async fn get_metadata(&self, path: &str) -> StorageResult<Option<RemoteObjectMetadata>> {
        if let Some(error) = self.injected_failure(path) {
            return Err(error);
        }
        Ok(self.get(path).map(|f| Self::metadata_for(path, &f)))
    }

    async fn ensure_folder(&self, path: &str) -> StorageResult<()> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.folders.lock().unwrap().insert(normalize_relative(path));
        Ok(())
    }

    async fn refresh_token(&self) -> StorageResult<String> {
        Ok("token".to_string())
    }
}

/// Local filesystem whose `set_modified` always fails.
pub struct StampFailingFs {
    pub inner: Arc<TokioFileSystem>,
}

#[async_trait]
impl FileSystemAccess for StampFailingFs {
    async fn exists(&self, path: &Path) -> BridgeResult<bool> {
        self.inner.exists(path).await
    }

    async fn metadata(&self, path: &Path) -> BridgeResult<bridge_traits::storage::FileMetadata> {
        self.inner.metadata(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> BridgeResult<()> {
        self.inner.create_dir_all(path).await
    }

    async fn read_file(&self, path: &Path) -> BridgeResult<Bytes> {
        self.inner.read_file(path).await
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> BridgeResult<()> {
        self.inner.write_file(path, data).await
    }

    async fn append_file(&self, path: &Path, data: Bytes) -> BridgeResult<()> {
        self.inner.append_file(path, data).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> BridgeResult<()> {
        self.inner.rename(from, to).await
    }

    async fn set_modified(&self, _path: &Path, _unix_seconds: i64) -> BridgeResult<()> {
        Err(BridgeError::OperationFailed("utimes not permitted".to_string()))
    }

    async fn delete_file(&self, path: &Path) -> BridgeResult<()> {
        self.inner.delete_file(path).await
    }

    async fn list_directory(&self, path: &Path) -> BridgeResult<Vec<PathBuf>> {
        self.inner.list_directory(path).await
    }
}

/// Route this thread's `tracing` output into a buffer until the guard drops.
pub fn capture_logs() -> (Arc<Mutex<Vec<u8>>>, tracing::subscriber::DefaultGuard) {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || CapturedWriter(sink.clone()))
        .finish();
    (buffer, tracing::subscriber::set_default(subscriber))
}

pub fn captured_text(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8_lossy(&buffer.lock().unwrap()).into_owned()
}

struct CapturedWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CapturedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub fs: Arc<TokioFileSystem>,
    pub adapter: Arc<InMemoryAdapter>,
    pub clock: Arc<FixedClock>,
    pub event_bus: EventBus,
    pub config: Arc<CoreConfig>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|builder| builder)
    }

    pub fn with_config(
        customize: impl FnOnce(core_runtime::CoreConfigBuilder) -> core_runtime::CoreConfigBuilder,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let builder = CoreConfig::builder()
            .sync_root(dir.path().join("Purse"))
            .data_dir(dir.path().join("data"))
            .retry(RetryConfig {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: false,
                rate_limit_floor: Duration::from_millis(1),
            });
        let config = Arc::new(customize(builder).build().unwrap());

        Self {
            dir,
            fs: Arc::new(TokioFileSystem::new()),
            adapter: InMemoryAdapter::new(),
            clock: Arc::new(FixedClock::new(T0 + 10_000)),
            event_bus: EventBus::new(256),
            config,
        }
    }

    pub fn orchestrator(&self) -> SyncOrchestrator {
        SyncOrchestrator::new(
            self.config.clone(),
            self.adapter.clone(),
            self.fs.clone(),
            self.clock.clone(),
            self.event_bus.clone(),
        )
    }

    pub fn orchestrator_with_fs(&self, fs: Arc<dyn FileSystemAccess>) -> SyncOrchestrator {
        SyncOrchestrator::new(
            self.config.clone(),
            self.adapter.clone(),
            fs,
            self.clock.clone(),
            self.event_bus.clone(),
        )
    }

    pub fn local_path(&self, relative: &str) -> std::path::PathBuf {
        relative
            .split('/')
            .fold(self.config.sync_root.clone(), |acc, s| acc.join(s))
    }

    pub async fn write_local(&self, relative: &str, content: &str, modified_at: i64) {
        let path = self.local_path(relative);
        self.fs
            .write_file(&path, Bytes::from(content.to_string()))
            .await
            .unwrap();
        self.fs.set_modified(&path, modified_at).await.unwrap();
    }

    pub async fn read_local(&self, relative: &str) -> Option<(String, i64)> {
        let path = self.local_path(relative);
        if !self.fs.exists(&path).await.unwrap() {
            return None;
        }
        let content = self.fs.read_file(&path).await.unwrap();
        let meta = self.fs.metadata(&path).await.unwrap();
        Some((
            String::from_utf8(content.to_vec()).unwrap(),
            meta.modified_at.unwrap(),
        ))
    }

    pub fn clock_now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    pub fn log_path(&self) -> std::path::PathBuf {
        self.config.conflict_log_path()
    }

    pub async fn log_text(&self) -> String {
        let path: &Path = &self.log_path();
        String::from_utf8(self.fs.read_file(path).await.unwrap().to_vec()).unwrap()
    }
}
