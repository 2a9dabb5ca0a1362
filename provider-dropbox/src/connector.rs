//! Dropbox API connector implementation
//!
//! Implements the `StorageAdapter` trait for Dropbox API v2.

use async_trait::async_trait;
use bridge_traits::error::{StorageError, StorageResult};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::storage::{
    full_remote_path, join_relative, relative_to_root, DeleteOutcome, RemoteListing,
    RemoteObjectMetadata, StorageAdapter,
};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use core_auth::{AuthSession, AuthorizedHttp};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::DropboxError;
use crate::types::{
    CreateFolderArg, FileMetadata, ListFolderArg, ListFolderContinueArg, ListFolderResult,
    Metadata, PathArg, UploadArg,
};

/// RPC endpoints
const API_BASE: &str = "https://api.dropboxapi.com/2";

/// Content upload/download endpoints
const CONTENT_BASE: &str = "https://content.dropboxapi.com/2";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

/// Single-request upload limit; larger files need an upload session.
const MAX_SIMPLE_UPLOAD: usize = 150 * 1024 * 1024;

/// Dropbox API connector
///
/// Paths handed to the adapter are relative to `root`; Dropbox addresses the
/// account root as `""` rather than `/`.
///
/// # Example
///
/// ```ignore
/// use provider_dropbox::DropboxConnector;
/// use bridge_traits::storage::StorageAdapter;
///
/// let connector = DropboxConnector::new(http_client, session, "/Apps/Purse");
/// let bytes = connector.download("journal/a.md").await?;
/// ```
pub struct DropboxConnector {
    http: AuthorizedHttp,
    root: String,
}

enum Page {
    First,
    Next(String),
    Done,
}

impl DropboxConnector {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        session: Arc<AuthSession>,
        root: impl Into<String>,
    ) -> Self {
        Self {
            http: AuthorizedHttp::new(http_client, session),
            root: full_remote_path(&root.into(), ""),
        }
    }

    fn api_path(&self, relative: &str) -> String {
        let path = full_remote_path(&self.root, relative);
        if path == "/" {
            String::new()
        } else {
            path
        }
    }

    fn parse_timestamp(rfc3339: &str) -> Option<i64> {
        DateTime::parse_from_rfc3339(rfc3339)
            .ok()
            .map(|dt| dt.with_timezone(&Utc).timestamp())
    }

    fn format_timestamp(unix_seconds: i64) -> Option<String> {
        Utc.timestamp_opt(unix_seconds, 0)
            .single()
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
    }

    fn convert_file(&self, file: FileMetadata) -> Option<RemoteObjectMetadata> {
        let absolute = file.path_display.as_deref().or(file.path_lower.as_deref())?;
        let path = relative_to_root(&self.root, absolute)?;
        // client_modified is what we set on upload; the server time would
        // always be newer than the local copy.
        let modified_at = Self::parse_timestamp(&file.client_modified)
            .or_else(|| Self::parse_timestamp(&file.server_modified));
        let Some(modified_at) = modified_at else {
            warn!(path = %path, "Skipping entry with unparsable timestamps");
            return None;
        };
        Some(RemoteObjectMetadata {
            id: file.id,
            name: file.name,
            path,
            revision: file.rev,
            size: file.size,
            modified_at,
            is_folder: false,
            is_deleted: false,
        })
    }

    fn convert(&self, metadata: Metadata) -> Option<RemoteObjectMetadata> {
        match metadata {
            Metadata::File(file) => self.convert_file(file),
            other => {
                let path = relative_to_root(&self.root, other.path_display()?)?;
                if path.is_empty() {
                    return None;
                }
                let (id, name, is_folder, is_deleted) = match other {
                    Metadata::Folder(f) => (f.id, f.name, true, false),
                    Metadata::Deleted(d) => (String::new(), d.name, false, true),
                    Metadata::File(_) => return None,
                };
                Some(RemoteObjectMetadata {
                    id,
                    name,
                    path,
                    revision: String::new(),
                    size: 0,
                    modified_at: 0,
                    is_folder,
                    is_deleted,
                })
            }
        }
    }

    /// JSON for the `Dropbox-API-Arg` header. Header values must be ASCII,
    /// so everything else is `\u` escaped.
    fn header_arg<T: Serialize>(arg: &T) -> StorageResult<String> {
        let json = serde_json::to_string(arg)
            .map_err(|e| StorageError::Fatal(format!("Failed to encode argument: {}", e)))?;
        let mut out = String::with_capacity(json.len());
        for c in json.chars() {
            if c.is_ascii() {
                out.push(c);
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{:04x}", unit));
                }
            }
        }
        Ok(out)
    }

    async fn rpc<T: Serialize + Sync>(&self, endpoint: &str, arg: &T) -> StorageResult<HttpResponse> {
        let body = Bytes::from(
            serde_json::to_vec(arg)
                .map_err(|e| StorageError::Fatal(format!("Failed to encode argument: {}", e)))?,
        );
        let url = format!("{}/{}", API_BASE, endpoint);
        self.http
            .send(|token| {
                HttpRequest::new(HttpMethod::Post, url.clone())
                    .bearer_token(token)
                    .header("Content-Type", "application/json")
                    .body(body.clone())
                    .timeout(REQUEST_TIMEOUT)
            })
            .await
    }

    fn check(response: HttpResponse) -> Result<HttpResponse, DropboxError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(DropboxError::from_response(&response))
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(response: &HttpResponse) -> StorageResult<T> {
        serde_json::from_slice(&response.body).map_err(|e| {
            StorageError::from(DropboxError::ParseError(format!(
                "Failed to parse response: {}",
                e
            )))
        })
    }

    async fn list_page(&self, page: Page, path: &str) -> StorageResult<ListFolderResult> {
        let response = match page {
            Page::First => {
                let api_path = self.api_path(path);
                let arg = ListFolderArg {
                    path: &api_path,
                    recursive: true,
                    include_deleted: false,
                };
                self.rpc("files/list_folder", &arg).await?
            }
            Page::Next(cursor) => {
                let arg = ListFolderContinueArg { cursor: &cursor };
                self.rpc("files/list_folder/continue", &arg).await?
            }
            Page::Done => {
                return Err(StorageError::Fatal("listing already finished".to_string()))
            }
        };
        let response = Self::check(response)?;
        Self::parse(&response)
    }
}

#[async_trait]
impl StorageAdapter for DropboxConnector {
    fn provider_name(&self) -> &'static str {
        "Dropbox"
    }

    fn root(&self) -> &str {
        &self.root
    }

    fn list_all<'a>(&'a self, path: &'a str) -> RemoteListing<'a> {
        stream::unfold(Page::First, move |page| async move {
            if matches!(page, Page::Done) {
                return None;
            }
            match self.list_page(page, path).await {
                Ok(result) => {
                    debug!(entries = result.entries.len(), has_more = result.has_more, "Listed page");
                    let next = if result.has_more {
                        Page::Next(result.cursor)
                    } else {
                        Page::Done
                    };
                    let items: Vec<StorageResult<RemoteObjectMetadata>> = result
                        .entries
                        .into_iter()
                        .filter_map(|entry| self.convert(entry))
                        .map(Ok)
                        .collect();
                    Some((items, next))
                }
                Err(e) => Some((vec![Err(e)], Page::Done)),
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }

    #[instrument(skip(self))]
    async fn download(&self, path: &str) -> StorageResult<Bytes> {
        let api_path = self.api_path(path);
        let arg = Self::header_arg(&PathArg { path: &api_path })?;
        let url = format!("{}/files/download", CONTENT_BASE);

        let response = self
            .http
            .send(|token| {
                HttpRequest::new(HttpMethod::Post, url.clone())
                    .bearer_token(token)
                    .header("Dropbox-API-Arg", arg.clone())
                    .timeout(TRANSFER_TIMEOUT)
            })
            .await?;
        let response = Self::check(response)?;
        info!(size = response.body.len(), "Downloaded");
        Ok(response.body)
    }

    #[instrument(skip(self, content), fields(size = content.len()))]
    async fn upload(
        &self,
        content: Bytes,
        folder: &str,
        name: &str,
        modified_at: Option<i64>,
    ) -> StorageResult<RemoteObjectMetadata> {
        if content.len() > MAX_SIMPLE_UPLOAD {
            return Err(StorageError::Fatal(format!(
                "{} bytes exceeds the single-request upload limit",
                content.len()
            )));
        }
        let relative = join_relative(folder, name);
        let api_path = self.api_path(&relative);
        let arg = Self::header_arg(&UploadArg {
            path: &api_path,
            mode: "overwrite",
            autorename: false,
            mute: true,
            client_modified: modified_at.and_then(Self::format_timestamp),
        })?;
        let url = format!("{}/files/upload", CONTENT_BASE);

        let response = self
            .http
            .send(|token| {
                HttpRequest::new(HttpMethod::Post, url.clone())
                    .bearer_token(token)
                    .header("Dropbox-API-Arg", arg.clone())
                    .header("Content-Type", "application/octet-stream")
                    .body(content.clone())
                    .timeout(TRANSFER_TIMEOUT)
            })
            .await?;
        let response = Self::check(response)?;
        let file: FileMetadata = Self::parse(&response)?;

        self.convert_file(file).ok_or_else(|| {
            StorageError::Fatal(format!("Upload result for {} is outside the root", relative))
        })
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str) -> StorageResult<DeleteOutcome> {
        let api_path = self.api_path(path);
        let response = self.rpc("files/delete_v2", &PathArg { path: &api_path }).await?;
        match Self::check(response) {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(e) if e.is_not_found() => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn get_metadata(&self, path: &str) -> StorageResult<Option<RemoteObjectMetadata>> {
        let api_path = self.api_path(path);
        if api_path.is_empty() {
            // The account root has no metadata entry
            return Ok(Some(RemoteObjectMetadata {
                id: String::new(),
                name: String::new(),
                path: String::new(),
                revision: String::new(),
                size: 0,
                modified_at: 0,
                is_folder: true,
                is_deleted: false,
            }));
        }
        let response = self.rpc("files/get_metadata", &PathArg { path: &api_path }).await?;
        match Self::check(response) {
            Ok(response) => {
                let metadata: Metadata = Self::parse(&response)?;
                Ok(self.convert(metadata))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn ensure_folder(&self, path: &str) -> StorageResult<()> {
        let api_path = self.api_path(path);
        if api_path.is_empty() {
            return Ok(());
        }
        let arg = CreateFolderArg {
            path: &api_path,
            autorename: false,
        };
        let response = self.rpc("files/create_folder_v2", &arg).await?;
        match Self::check(response) {
            Ok(_) => {
                debug!("Created folder");
                Ok(())
            }
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh_token(&self) -> StorageResult<String> {
        self.http.refresh_token().await
    }
}
