//! # Local / Remote State Scanners
//!
//! Both scanners produce a [`StateMap`]: relative document path to
//! [`FileState`]. Unreadable local entries are logged and skipped so one bad
//! file never blocks reconciliation of the rest; a failed remote listing
//! fails the scan, since a truncated listing is indistinguishable from
//! missing files.

use crate::error::{Result, SyncError};
use bridge_traits::error::StorageResult;
use bridge_traits::storage::{
    normalize_relative, FileSystemAccess, RemoteObjectMetadata, StorageAdapter,
};
use core_runtime::config::CoreConfig;
use core_runtime::logging::strip_path;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// One document as seen by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    /// Relative to the sync root, `/`-separated
    pub path: String,
    /// Unix epoch seconds (UTC)
    pub modified_at: i64,
    /// Diagnostic only
    pub size: u64,
}

impl FileState {
    pub fn new(path: impl Into<String>, modified_at: i64, size: u64) -> Self {
        Self {
            path: path.into(),
            modified_at,
            size,
        }
    }
}

/// Sorted by path, so iteration order is deterministic.
pub type StateMap = BTreeMap<String, FileState>;

/// Which entries count as documents.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    extensions: Vec<String>,
    config_dir_name: String,
}

impl ScanFilter {
    pub fn new<I, S>(extensions: I, config_dir_name: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            config_dir_name: config_dir_name.into(),
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(&config.document_extensions, config.config_dir_name.clone())
    }

    pub fn is_hidden(name: &str) -> bool {
        name.starts_with('.')
    }

    pub fn is_document_name(&self, name: &str) -> bool {
        if Self::is_hidden(name) {
            return false;
        }
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            }
            _ => false,
        }
    }

    /// A relative path is a document when no segment is hidden or the
    /// config directory, and the last segment has a document extension.
    pub fn accepts_relative(&self, path: &str) -> bool {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((name, parents)) = segments.split_last() else {
            return false;
        };
        if parents
            .iter()
            .any(|p| Self::is_hidden(p) || *p == self.config_dir_name)
        {
            return false;
        }
        self.is_document_name(name)
    }
}

/// Walks the local sync root through the filesystem bridge.
pub struct LocalScanner {
    fs: Arc<dyn FileSystemAccess>,
    root: PathBuf,
    filter: ScanFilter,
}

impl LocalScanner {
    pub fn new(fs: Arc<dyn FileSystemAccess>, root: impl Into<PathBuf>, filter: ScanFilter) -> Self {
        Self {
            fs,
            root: root.into(),
            filter,
        }
    }

    /// Scan the whole tree. Fails only if the root itself cannot be listed.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn scan(&self) -> Result<StateMap> {
        let mut states = StateMap::new();

        if !self.fs.exists(&self.root).await? {
            info!("Sync root does not exist yet, creating it");
            self.fs.create_dir_all(&self.root).await?;
            return Ok(states);
        }

        let root_entries = self
            .fs
            .list_directory(&self.root)
            .await
            .map_err(|e| SyncError::LocalScan(e.to_string()))?;

        let mut pending: Vec<(Vec<PathBuf>, String)> = vec![(root_entries, String::new())];

        while let Some((entries, prefix)) = pending.pop() {
            for entry in entries {
                let Some(name) = entry.file_name().and_then(|n| n.to_str()).map(str::to_string)
                else {
                    warn!(entry = ?entry, "Skipping entry with non UTF-8 name");
                    continue;
                };
                if ScanFilter::is_hidden(&name) {
                    continue;
                }

                let relative = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", prefix, name)
                };

                let metadata = match self.fs.metadata(&entry).await {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        warn!(file = %strip_path(&relative), error = %e, "Skipping unreadable entry");
                        continue;
                    }
                };

                if metadata.is_directory {
                    match self.fs.list_directory(&entry).await {
                        Ok(children) => pending.push((children, relative)),
                        Err(e) => warn!(dir = %relative, error = %e, "Skipping unreadable directory"),
                    }
                    continue;
                }

                if !self.filter.is_document_name(&name) {
                    continue;
                }

                let Some(modified_at) = metadata.modified_at else {
                    warn!(path = %relative, "Skipping file without modification time");
                    continue;
                };

                states.insert(
                    relative.clone(),
                    FileState::new(relative, modified_at, metadata.size),
                );
            }
        }

        debug!(count = states.len(), "Local scan complete");
        Ok(states)
    }

    /// Absolute local path of a relative document path.
    pub fn absolute_path(&self, relative: &str) -> PathBuf {
        join_local(&self.root, relative)
    }
}

pub(crate) fn join_local(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(root.to_path_buf(), |acc, segment| acc.join(segment))
}

/// Folds a storage adapter's listing into a [`StateMap`].
pub struct RemoteScanner {
    adapter: Arc<dyn StorageAdapter>,
    filter: ScanFilter,
}

impl RemoteScanner {
    pub fn new(adapter: Arc<dyn StorageAdapter>, filter: ScanFilter) -> Self {
        Self { adapter, filter }
    }

    /// Scan the adapter root.
    ///
    /// Any error in the listing fails the whole scan: adapters end the
    /// stream at a failed page, so the remaining entries were never seen and
    /// a partial map would read as "missing remotely". Listings are not
    /// resumable, the caller retries the scan from scratch. Entries that
    /// cannot be converted are dropped by the adapters themselves.
    #[instrument(skip(self), fields(provider = self.adapter.provider_name()))]
    pub async fn scan(&self) -> StorageResult<StateMap> {
        let mut states = StateMap::new();
        let mut listing = self.adapter.list_all("");

        while let Some(item) = listing.next().await {
            match item {
                Ok(metadata) => {
                    if let Some(state) = self.to_state(&metadata) {
                        states.insert(state.path.clone(), state);
                    }
                }
                Err(e) => {
                    warn!(error = %e, listed = states.len(), "Remote listing failed");
                    return Err(e);
                }
            }
        }

        debug!(count = states.len(), "Remote scan complete");
        Ok(states)
    }

    fn to_state(&self, metadata: &RemoteObjectMetadata) -> Option<FileState> {
        if metadata.is_folder || metadata.is_deleted {
            return None;
        }
        let relative = normalize_relative(&metadata.path);
        if !self.filter.accepts_relative(&relative) {
            return None;
        }
        Some(FileState::new(relative, metadata.modified_at, metadata.size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_document_names() {
        let filter = ScanFilter::new(["md"], ".purse_config");

        assert!(filter.is_document_name("a.md"));
        assert!(filter.is_document_name("Notes.MD"));
        assert!(!filter.is_document_name("a.txt"));
        assert!(!filter.is_document_name(".hidden.md"));
        assert!(!filter.is_document_name("md"));
    }

    #[test]
    fn test_filter_relative_paths() {
        let filter = ScanFilter::new(["md"], ".purse_config");

        assert!(filter.accepts_relative("a.md"));
        assert!(filter.accepts_relative("journal/2024/jan.md"));
        assert!(!filter.accepts_relative(".purse_config/settings.yml"));
        assert!(!filter.accepts_relative(".purse_config/notes.md"));
        assert!(!filter.accepts_relative(".git/readme.md"));
        assert!(!filter.accepts_relative(""));
    }

    #[test]
    fn test_join_local() {
        let root = Path::new("/home/me/Purse");
        assert_eq!(
            join_local(root, "journal/a.md"),
            PathBuf::from("/home/me/Purse/journal/a.md")
        );
        assert_eq!(join_local(root, ""), PathBuf::from("/home/me/Purse"));
    }
}
