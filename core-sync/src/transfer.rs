//! Single-file upload and download primitives shared by the document batch
//! and the settings flow.

use crate::retry::RetryPolicy;
use crate::scanner::join_local;
use bridge_traits::error::StorageError;
use bridge_traits::storage::{split_relative, FileSystemAccess, StorageAdapter};
use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Why a single action failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    Remote(StorageError),
    Local(String),
}

impl ActionError {
    /// Fatal remote errors stop the rest of the batch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ActionError::Remote(StorageError::Fatal(_)))
    }

    /// Short reason recorded in the report.
    pub fn reason(&self) -> String {
        match self {
            ActionError::Remote(StorageError::Unauthorized(msg)) => format!("AuthFailure: {}", msg),
            ActionError::Remote(StorageError::NotFound(msg)) => format!("NotFound: {}", msg),
            ActionError::Remote(StorageError::RateLimited { .. }) => {
                "RetriesExhausted: rate limited".to_string()
            }
            ActionError::Remote(StorageError::Transient(msg)) => {
                format!("RetriesExhausted: {}", msg)
            }
            ActionError::Remote(StorageError::Fatal(msg)) => format!("Fatal: {}", msg),
            ActionError::Local(msg) => format!("LocalIo: {}", msg),
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason())
    }
}

pub(crate) struct Transfers {
    adapter: Arc<dyn StorageAdapter>,
    fs: Arc<dyn FileSystemAccess>,
    pub(crate) retry: RetryPolicy,
    local_root: PathBuf,
}

impl Transfers {
    pub(crate) fn new(
        adapter: Arc<dyn StorageAdapter>,
        fs: Arc<dyn FileSystemAccess>,
        retry: RetryPolicy,
        local_root: PathBuf,
    ) -> Self {
        Self {
            adapter,
            fs,
            retry,
            local_root,
        }
    }

    pub(crate) fn local_path(&self, relative: &str) -> PathBuf {
        join_local(&self.local_root, relative)
    }

    /// Upload the local file at `relative`, then pin the local modification
    /// time to what the provider recorded.
    #[instrument(skip(self))]
    pub(crate) async fn upload(&self, relative: &str) -> Result<(), ActionError> {
        let local = self.local_path(relative);
        let content = self
            .fs
            .read_file(&local)
            .await
            .map_err(|e| ActionError::Local(e.to_string()))?;
        let local_mtime = self
            .fs
            .metadata(&local)
            .await
            .map_err(|e| ActionError::Local(e.to_string()))?
            .modified_at;

        let (folder, name) = split_relative(relative);
        let uploaded = self
            .retry
            .execute("upload", || {
                self.adapter
                    .upload(content.clone(), &folder, &name, local_mtime)
            })
            .await
            .map_err(ActionError::Remote)?;

        if local_mtime != Some(uploaded.modified_at) {
            if let Err(e) = self.fs.set_modified(&local, uploaded.modified_at).await {
                warn!(error = %e, "Could not align local modification time");
            }
        }
        debug!(size = uploaded.size, revision = %uploaded.revision, "Uploaded");
        Ok(())
    }

    /// Download `relative` and atomically replace the local copy, stamping it
    /// with the remote modification time.
    #[instrument(skip(self))]
    pub(crate) async fn download(
        &self,
        relative: &str,
        remote_modified_at: i64,
    ) -> Result<(), ActionError> {
        let content: Bytes = self
            .retry
            .execute("download", || self.adapter.download(relative))
            .await
            .map_err(ActionError::Remote)?;

        let target = self.local_path(relative);
        let temp = temp_sibling(&target);

        let write = async {
            self.fs.write_file(&temp, content).await?;
            self.fs.rename(&temp, &target).await
        };
        if let Err(e) = write.await {
            if self.fs.exists(&temp).await.unwrap_or(false) {
                let _ = self.fs.delete_file(&temp).await;
            }
            return Err(ActionError::Local(e.to_string()));
        }
        // Content is already in place at this point.
        if let Err(e) = self.fs.set_modified(&target, remote_modified_at).await {
            warn!(error = %e, "Could not stamp remote modification time");
        }
        Ok(())
    }
}

/// `dir/.name.tmp`; hidden so a concurrent scan never picks it up.
fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.tmp", name))
}
