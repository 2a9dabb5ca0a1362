//! OneDrive connector implementation
//!
//! Implements the `StorageAdapter` trait for Microsoft Graph v1.0, addressing
//! items by path (`/me/drive/root:/{path}:`).

use async_trait::async_trait;
use bridge_traits::error::{StorageError, StorageResult};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::storage::{
    full_remote_path, join_relative, normalize_relative, DeleteOutcome,
    RemoteListing, RemoteObjectMetadata, StorageAdapter,
};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use core_auth::{AuthSession, AuthorizedHttp};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::OneDriveError;
use crate::types::{
    ChildrenPage, CreateFolderRequest, DriveItem, EmptyFacet, FileSystemInfo, UpdateItemRequest,
    UploadSession, UploadSessionItem, UploadSessionRequest,
};

const GRAPH_DRIVE: &str = "https://graph.microsoft.com/v1.0/me/drive";

/// Largest body accepted by a simple `PUT .../content`
const SIMPLE_UPLOAD_MAX: usize = 4 * 1024 * 1024;

/// Upload session fragments must be multiples of 320 KiB
const UPLOAD_CHUNK_SIZE: usize = 12 * 320 * 1024;

const CHILDREN_PAGE_SIZE: u32 = 200;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

/// OneDrive (Microsoft Graph) connector
///
/// # Example
///
/// ```ignore
/// use provider_onedrive::OneDriveConnector;
/// use bridge_traits::storage::StorageAdapter;
///
/// let connector = OneDriveConnector::new(http_client, session, "/Apps/Purse");
/// let meta = connector.get_metadata("journal/a.md").await?;
/// ```
pub struct OneDriveConnector {
    http: AuthorizedHttp,
    root: String,
}

/// Breadth-first listing state: folders still to list and the next page of
/// the folder currently being listed.
struct Walk {
    pending: VecDeque<String>,
    next: Option<(String, String)>,
}

impl OneDriveConnector {
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

    /// Graph addressing for a root-relative path; `suffix` is appended after
    /// the closing colon (`/content`, `/children`, ...).
    fn item_url(&self, relative: &str, suffix: &str) -> String {
        Self::drive_url(&full_remote_path(&self.root, relative), suffix)
    }

    fn drive_url(absolute: &str, suffix: &str) -> String {
        if absolute.trim_matches('/').is_empty() {
            return format!("{}/root{}", GRAPH_DRIVE, suffix);
        }
        let encoded: Vec<String> = absolute
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/root:{}:{}", GRAPH_DRIVE, encoded.join("/"), suffix)
    }

    fn children_url(&self, relative: &str) -> String {
        format!(
            "{}?$top={}",
            self.item_url(relative, "/children"),
            CHILDREN_PAGE_SIZE
        )
    }

    /// Graph reports fractional seconds; they are truncated.
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

    fn convert_item(item: DriveItem, path: String) -> RemoteObjectMetadata {
        RemoteObjectMetadata {
            modified_at: item
                .modified_time()
                .and_then(Self::parse_timestamp)
                .unwrap_or_default(),
            is_folder: item.is_folder(),
            is_deleted: item.deleted.is_some(),
            size: item.size.unwrap_or(0),
            revision: item.e_tag.unwrap_or_default(),
            id: item.id,
            name: item.name,
            path,
        }
    }

    fn encode_json<T: Serialize>(value: &T) -> StorageResult<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| StorageError::Fatal(format!("Failed to encode request: {}", e)))
    }

    fn parse<T: serde::de::DeserializeOwned>(response: &HttpResponse) -> StorageResult<T> {
        serde_json::from_slice(&response.body).map_err(|e| {
            OneDriveError::ParseError(format!("Failed to parse response: {}", e)).into()
        })
    }

    async fn send(
        &self,
        method: HttpMethod,
        url: String,
        body: Option<(&str, Bytes)>,
        timeout: Duration,
    ) -> StorageResult<HttpResponse> {
        self.http
            .send(|token| {
                let mut request = HttpRequest::new(method, url.clone())
                    .bearer_token(token)
                    .timeout(timeout);
                if let Some((content_type, bytes)) = &body {
                    request = request
                        .header("Content-Type", *content_type)
                        .body(bytes.clone());
                }
                request
            })
            .await
    }

    /// `send`, with non-success statuses turned into errors.
    async fn call(
        &self,
        method: HttpMethod,
        url: String,
        body: Option<(&str, Bytes)>,
        timeout: Duration,
    ) -> StorageResult<HttpResponse> {
        let response = self.send(method, url, body, timeout).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(OneDriveError::from_response(&response).into())
        }
    }

    async fn next_batch(
        &self,
        walk: &mut Walk,
    ) -> Option<Vec<StorageResult<RemoteObjectMetadata>>> {
        let (prefix, url) = match walk.next.take() {
            Some(page) => page,
            None => {
                let prefix = walk.pending.pop_front()?;
                let url = self.children_url(&prefix);
                (prefix, url)
            }
        };

        let page = match self.call(HttpMethod::Get, url, None, REQUEST_TIMEOUT).await {
            Ok(response) => Self::parse::<ChildrenPage>(&response),
            Err(e) => Err(e),
        };
        match page {
            Ok(page) => {
                if let Some(link) = page.next_link {
                    walk.next = Some((prefix.clone(), link));
                }
                let items = page
                    .value
                    .into_iter()
                    .map(|item| {
                        let relative = join_relative(&prefix, &item.name);
                        if item.is_folder() {
                            walk.pending.push_back(relative.clone());
                        }
                        Ok(Self::convert_item(item, relative))
                    })
                    .collect();
                Some(items)
            }
            Err(e) => {
                warn!(folder = %prefix, error = %e, "Failed to list folder");
                Some(vec![Err(e)])
            }
        }
    }

    async fn simple_upload(
        &self,
        content: Bytes,
        relative: &str,
        modified_at: Option<String>,
    ) -> StorageResult<DriveItem> {
        let url = format!(
            "{}?@microsoft.graph.conflictBehavior=replace",
            self.item_url(relative, "/content")
        );
        let response = self
            .call(
                HttpMethod::Put,
                url,
                Some(("application/octet-stream", content)),
                TRANSFER_TIMEOUT,
            )
            .await?;
        let item: DriveItem = Self::parse(&response)?;

        let Some(timestamp) = modified_at else {
            return Ok(item);
        };
        let update = Self::encode_json(&UpdateItemRequest {
            file_system_info: FileSystemInfo {
                last_modified_date_time: Some(timestamp),
            },
        })?;
        let url = format!("{}/items/{}", GRAPH_DRIVE, item.id);
        let response = self
            .call(
                HttpMethod::Patch,
                url,
                Some(("application/json", update)),
                REQUEST_TIMEOUT,
            )
            .await?;
        Self::parse(&response)
    }

    async fn session_upload(
        &self,
        content: Bytes,
        relative: &str,
        name: &str,
        modified_at: Option<String>,
    ) -> StorageResult<DriveItem> {
        let request = Self::encode_json(&UploadSessionRequest {
            item: UploadSessionItem {
                conflict_behavior: "replace",
                name,
                file_system_info: modified_at.map(|timestamp| FileSystemInfo {
                    last_modified_date_time: Some(timestamp),
                }),
            },
        })?;
        let response = self
            .call(
                HttpMethod::Post,
                self.item_url(relative, "/createUploadSession"),
                Some(("application/json", request)),
                REQUEST_TIMEOUT,
            )
            .await?;
        let session: UploadSession = Self::parse(&response)?;

        let total = content.len();
        let mut offset = 0;
        while offset < total {
            let end = (offset + UPLOAD_CHUNK_SIZE).min(total);
            debug!(offset, end, total, "Uploading fragment");
            // The upload URL is pre-authenticated and must not carry a bearer token.
            let fragment = HttpRequest::new(HttpMethod::Put, session.upload_url.clone())
                .header("Content-Range", format!("bytes {}-{}/{}", offset, end - 1, total))
                .body(content.slice(offset..end))
                .timeout(TRANSFER_TIMEOUT);
            let response = self.http.send_anonymous(fragment).await?;

            if !response.is_success() {
                let error: StorageError = OneDriveError::from_response(&response).into();
                let cancel = HttpRequest::new(HttpMethod::Delete, session.upload_url.clone())
                    .timeout(REQUEST_TIMEOUT);
                if let Err(e) = self.http.send_anonymous(cancel).await {
                    debug!(error = %e, "Failed to cancel upload session");
                }
                return Err(error);
            }

            offset = end;
            if offset >= total {
                return Self::parse(&response);
            }
        }

        Err(StorageError::Fatal(format!(
            "Upload session for {} ended without a drive item",
            relative
        )))
    }

    /// Create `name` under the drive-absolute folder `parent`. An existing
    /// item with that name (409) counts as success.
    async fn create_child_folder(&self, parent: &str, name: &str) -> StorageResult<()> {
        let body = Self::encode_json(&CreateFolderRequest {
            name,
            folder: EmptyFacet::default(),
            conflict_behavior: "fail",
        })?;
        let response = self
            .send(
                HttpMethod::Post,
                Self::drive_url(parent, "/children"),
                Some(("application/json", body)),
                REQUEST_TIMEOUT,
            )
            .await?;

        match response.status {
            409 => Ok(()),
            _ if response.is_success() => {
                info!(parent = %parent, name = %name, "Created folder");
                Ok(())
            }
            _ => Err(OneDriveError::from_response(&response).into()),
        }
    }
}

#[async_trait]
impl StorageAdapter for OneDriveConnector {
    fn provider_name(&self) -> &'static str {
        "OneDrive"
    }

    fn root(&self) -> &str {
        &self.root
    }

    fn list_all<'a>(&'a self, path: &'a str) -> RemoteListing<'a> {
        let walk = Walk {
            pending: VecDeque::from([normalize_relative(path)]),
            next: None,
        };
        stream::unfold(walk, move |mut walk| async move {
            let batch = self.next_batch(&mut walk).await?;
            Some((batch, walk))
        })
        .flat_map(stream::iter)
        .boxed()
    }

    #[instrument(skip(self))]
    async fn download(&self, path: &str) -> StorageResult<Bytes> {
        let response = self
            .call(
                HttpMethod::Get,
                self.item_url(path, "/content"),
                None,
                TRANSFER_TIMEOUT,
            )
            .await?;
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
        let relative = join_relative(folder, name);
        let timestamp = modified_at.and_then(Self::format_timestamp);

        let item = if content.len() <= SIMPLE_UPLOAD_MAX {
            self.simple_upload(content, &relative, timestamp).await?
        } else {
            self.session_upload(content, &relative, name, timestamp).await?
        };

        Ok(Self::convert_item(item, relative))
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str) -> StorageResult<DeleteOutcome> {
        match self
            .call(HttpMethod::Delete, self.item_url(path, ""), None, REQUEST_TIMEOUT)
            .await
        {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(StorageError::NotFound(_)) => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn get_metadata(&self, path: &str) -> StorageResult<Option<RemoteObjectMetadata>> {
        let relative = normalize_relative(path);
        match self
            .call(HttpMethod::Get, self.item_url(&relative, ""), None, REQUEST_TIMEOUT)
            .await
        {
            Ok(response) => {
                let item: DriveItem = Self::parse(&response)?;
                Ok(Some(Self::convert_item(item, relative)))
            }
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn ensure_folder(&self, path: &str) -> StorageResult<()> {
        if let Some(existing) = self.get_metadata(path).await? {
            return if existing.is_folder {
                Ok(())
            } else {
                Err(StorageError::Fatal(format!(
                    "{} exists and is not a folder",
                    full_remote_path(&self.root, path)
                )))
            };
        }

        // Segments are created from the drive root, so the app root itself
        // is created on first use.
        let absolute = full_remote_path(&self.root, path);
        let mut parent = String::new();
        for segment in absolute.split('/').filter(|s| !s.is_empty()) {
            self.create_child_folder(&parent, segment).await?;
            parent = format!("{}/{}", parent, segment);
        }
        Ok(())
    }

    async fn refresh_token(&self) -> StorageResult<String> {
        self.http.refresh_token().await
    }
}
