//! Storage and File System Abstractions
//!
//! Provides platform-agnostic traits for local file I/O, secure credential
//! storage, and the remote [`StorageAdapter`] capability every cloud
//! provider implements.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, StorageResult};

/// File metadata information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    /// Last write, seconds since the Unix epoch (UTC).
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// File system access trait
///
/// Abstracts local file I/O so the sync core can be exercised against
/// temporary directories in tests and sandboxed directories on hosts.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn save(fs: &dyn FileSystemAccess, root: &Path, data: Bytes) -> Result<()> {
///     fs.create_dir_all(root).await?;
///     fs.write_file(&root.join("a.md"), data).await
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents into memory
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file, creating it if it doesn't exist
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Append data to an existing file or create it
    async fn append_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Atomically move `from` over `to`
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Pin the modification time of a file (seconds since epoch, UTC)
    async fn set_modified(&self, path: &Path, unix_seconds: i64) -> Result<()>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// List all entries in a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;
}

/// Secure credential storage trait
///
/// Abstracts secure storage mechanisms:
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service / libsecret
///
/// # Security Requirements
///
/// Implementations MUST:
/// - Use platform-provided secure storage when available
/// - Never log or expose sensitive data
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Store a secret value, overwriting any previous value
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve a secret value
    ///
    /// # Returns
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a secret. Deleting a missing key succeeds.
    async fn delete_secret(&self, key: &str) -> Result<()>;

    /// Check if a secret exists without retrieving it
    async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(self.get_secret(key).await?.is_some())
    }
}

/// Provider-returned descriptor of one remote object, normalized so that no
/// other component ever sees provider-specific formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObjectMetadata {
    /// Opaque provider id
    pub id: String,
    /// Display name (last path segment)
    pub name: String,
    /// Path relative to the adapter root, `/`-separated, no leading slash
    pub path: String,
    /// Provider-specific revision tag
    pub revision: String,
    pub size: u64,
    /// Seconds since the Unix epoch, UTC
    pub modified_at: i64,
    pub is_folder: bool,
    pub is_deleted: bool,
}

/// Result of a remote delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Lazy, finite listing of remote objects. Pages are fetched on demand.
pub type RemoteListing<'a> = BoxStream<'a, StorageResult<RemoteObjectMetadata>>;

/// Uniform capability interface over one remote backend.
///
/// All paths are relative to the adapter's configured root; `""` denotes the
/// root itself. Implementations resolve absolute provider paths internally
/// and normalize timestamps to UTC seconds.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Stable provider name, e.g. `"Dropbox"`
    fn provider_name(&self) -> &'static str;

    /// Absolute remote root this adapter is bound to
    fn root(&self) -> &str;

    /// Recursively list everything below `path`. Restartable from scratch only.
    fn list_all<'a>(&'a self, path: &'a str) -> RemoteListing<'a>;

    async fn download(&self, path: &str) -> StorageResult<Bytes>;

    /// Upload `content` as `folder/name`, overwriting. `modified_at` asks the
    /// provider to record the given client modification time.
    async fn upload(
        &self,
        content: Bytes,
        folder: &str,
        name: &str,
        modified_at: Option<i64>,
    ) -> StorageResult<RemoteObjectMetadata>;

    async fn delete(&self, path: &str) -> StorageResult<DeleteOutcome>;

    /// `Ok(None)` when the object does not exist
    async fn get_metadata(&self, path: &str) -> StorageResult<Option<RemoteObjectMetadata>>;

    /// Create `path` and any missing parents. Succeeds if it already exists.
    async fn ensure_folder(&self, path: &str) -> StorageResult<()>;

    /// Refresh credentials; returns the access token the adapter will use next.
    async fn refresh_token(&self) -> StorageResult<String>;
}

/// Normalize a root-relative path: `/` separators, no leading/trailing
/// slash, `.` segments removed.
pub fn normalize_relative(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join the adapter root with a root-relative path.
///
/// `full_remote_path("/Apps/Purse", "notes/a.md")` is `/Apps/Purse/notes/a.md`;
/// an empty relative path yields the root itself.
pub fn full_remote_path(root: &str, relative: &str) -> String {
    let mut clean_root = root.trim().to_string();
    if !clean_root.starts_with('/') {
        clean_root.insert(0, '/');
    }
    if clean_root != "/" {
        clean_root = clean_root.trim_end_matches('/').to_string();
    }
    let clean_relative = normalize_relative(relative);

    match (clean_root.as_str(), clean_relative.is_empty()) {
        (_, true) => clean_root,
        ("/", false) => format!("/{}", clean_relative),
        (_, false) => format!("{}/{}", clean_root, clean_relative),
    }
}

/// Join a folder and a name into a root-relative path.
pub fn join_relative(folder: &str, name: &str) -> String {
    let folder = normalize_relative(folder);
    if folder.is_empty() {
        normalize_relative(name)
    } else {
        format!("{}/{}", folder, normalize_relative(name))
    }
}

/// Split a root-relative path into `(parent_folder, name)`.
pub fn split_relative(path: &str) -> (String, String) {
    let normalized = normalize_relative(path);
    match normalized.rsplit_once('/') {
        Some((parent, name)) => (parent.to_string(), name.to_string()),
        None => (String::new(), normalized),
    }
}

/// Strip the adapter root from an absolute provider path, case-insensitively
/// (Dropbox and OneDrive paths are case-insensitive). Returns `None` for
/// paths outside the root.
pub fn relative_to_root(root: &str, absolute: &str) -> Option<String> {
    let root = full_remote_path(root, "");
    let absolute = full_remote_path(absolute, "");
    if root == "/" {
        return Some(normalize_relative(&absolute));
    }
    if absolute.eq_ignore_ascii_case(&root) {
        return Some(String::new());
    }
    let prefix_len = root.len();
    if absolute.len() > prefix_len
        && absolute.is_char_boundary(prefix_len)
        && absolute[..prefix_len].eq_ignore_ascii_case(&root)
        && absolute.as_bytes()[prefix_len] == b'/'
    {
        Some(normalize_relative(&absolute[prefix_len + 1..]))
    } else {
        None
    }
}
