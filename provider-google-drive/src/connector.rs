//! Google Drive API connector implementation
//!
//! Implements the `StorageAdapter` trait for Google Drive API v3.
//!
//! Drive addresses files by id, not by path. Paths are resolved by walking
//! folder names from the account's `root` folder; resolved folder ids are
//! cached for the lifetime of the connector.

use async_trait::async_trait;
use bridge_traits::error::{StorageError, StorageResult};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::storage::{
    full_remote_path, join_relative, normalize_relative, split_relative, DeleteOutcome,
    RemoteListing, RemoteObjectMetadata, StorageAdapter,
};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use core_auth::{AuthSession, AuthorizedHttp};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::GoogleDriveError;
use crate::types::{DriveFile, FileMetadataRequest, FilesListResponse, FOLDER_MIME_TYPE};

/// Google Drive API base URL
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Media upload base URL
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Maximum results per page (Google Drive API limit)
const MAX_PAGE_SIZE: u32 = 1000;

/// Fields to request for file resources
const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime,headRevisionId,version,parents,trashed";

const MULTIPART_BOUNDARY: &str = "purse_sync_multipart_3b1f9c0e";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

/// Google Drive API connector
///
/// # Example
///
/// ```ignore
/// use provider_google_drive::GoogleDriveConnector;
/// use bridge_traits::storage::StorageAdapter;
///
/// let connector = GoogleDriveConnector::new(http_client, session, "/Apps/Purse");
/// connector.ensure_folder(".purse_config").await?;
/// ```
pub struct GoogleDriveConnector {
    http: AuthorizedHttp,
    root: String,
    /// Absolute folder path to Drive id
    folder_ids: Mutex<HashMap<String, String>>,
    /// Serializes folder creation so concurrent uploads do not create
    /// duplicate same-named folders
    create_lock: tokio::sync::Mutex<()>,
}

/// Breadth-first walk state for `list_all`.
struct Walk {
    pending: VecDeque<(String, String)>,
    /// Folder id, relative prefix and next page token of a folder mid-listing
    page: Option<(String, String, String)>,
    started: bool,
    done: bool,
}

impl GoogleDriveConnector {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        session: Arc<AuthSession>,
        root: impl Into<String>,
    ) -> Self {
        Self {
            http: AuthorizedHttp::new(http_client, session),
            root: full_remote_path(&root.into(), ""),
            folder_ids: Mutex::new(HashMap::new()),
            create_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Parse RFC 3339 timestamp to Unix timestamp
    fn parse_timestamp(rfc3339: &str) -> Option<i64> {
        DateTime::parse_from_rfc3339(rfc3339)
            .ok()
            .map(|dt| dt.with_timezone(&Utc).timestamp())
    }

    fn format_timestamp(unix_seconds: i64) -> Option<String> {
        Utc.timestamp_opt(unix_seconds, 0)
            .single()
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    /// Escape a literal for use inside a `q` string.
    fn escape_query(value: &str) -> String {
        value.replace('\\', "\\\\").replace('\'', "\\'")
    }

    fn convert_file(file: DriveFile, path: String) -> RemoteObjectMetadata {
        let is_folder = file.is_folder();
        RemoteObjectMetadata {
            modified_at: file
                .modified_time
                .as_deref()
                .and_then(Self::parse_timestamp)
                .unwrap_or_default(),
            size: file.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0),
            revision: file
                .head_revision_id
                .or(file.version)
                .unwrap_or_default(),
            id: file.id,
            name: file.name,
            path,
            is_folder,
            is_deleted: file.trashed,
        }
    }

    fn cached_folder(&self, absolute: &str) -> Option<String> {
        self.folder_ids
            .lock()
            .ok()
            .and_then(|cache| cache.get(absolute).cloned())
    }

    fn cache_folder(&self, absolute: String, id: String) {
        if let Ok(mut cache) = self.folder_ids.lock() {
            cache.insert(absolute, id);
        }
    }

    /// Send with the session token and turn non-success statuses into errors.
    async fn call(
        &self,
        method: HttpMethod,
        url: String,
        body: Option<(&str, Bytes)>,
        timeout: Duration,
    ) -> StorageResult<HttpResponse> {
        let response = self
            .http
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
            .await?;

        if response.is_success() {
            Ok(response)
        } else {
            Err(GoogleDriveError::from_response(&response).into())
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(response: &HttpResponse) -> StorageResult<T> {
        serde_json::from_slice(&response.body).map_err(|e| {
            GoogleDriveError::ParseError(format!("Failed to parse response: {}", e)).into()
        })
    }

    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> StorageResult<FilesListResponse> {
        let query = format!("'{}' in parents and trashed = false", Self::escape_query(folder_id));
        let mut url = format!(
            "{}/files?q={}&pageSize={}&spaces=drive&fields=nextPageToken,files({})",
            DRIVE_API_BASE,
            urlencoding::encode(&query),
            MAX_PAGE_SIZE,
            FILE_FIELDS
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }
        let response = self.call(HttpMethod::Get, url, None, REQUEST_TIMEOUT).await?;
        Self::parse(&response)
    }

    async fn find_child(
        &self,
        parent_id: &str,
        name: &str,
        folders_only: bool,
    ) -> StorageResult<Option<DriveFile>> {
        let mut query = format!(
            "'{}' in parents and name = '{}' and trashed = false",
            Self::escape_query(parent_id),
            Self::escape_query(name)
        );
        if folders_only {
            query.push_str(&format!(" and mimeType = '{}'", FOLDER_MIME_TYPE));
        }
        let url = format!(
            "{}/files?q={}&pageSize=10&spaces=drive&fields=files({})",
            DRIVE_API_BASE,
            urlencoding::encode(&query),
            FILE_FIELDS
        );
        let response = self.call(HttpMethod::Get, url, None, REQUEST_TIMEOUT).await?;
        let list: FilesListResponse = Self::parse(&response)?;
        if list.files.len() > 1 {
            warn!(name = %name, count = list.files.len(), "Duplicate names in folder, using the first");
        }
        Ok(list.files.into_iter().next())
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> StorageResult<String> {
        let metadata = FileMetadataRequest {
            name: Some(name),
            mime_type: Some(FOLDER_MIME_TYPE),
            parents: Some(vec![parent_id]),
            modified_time: None,
        };
        let body = serde_json::to_vec(&metadata)
            .map_err(|e| StorageError::Fatal(format!("Failed to encode folder metadata: {}", e)))?;
        let url = format!("{}/files?fields={}", DRIVE_API_BASE, FILE_FIELDS);
        let response = self
            .call(
                HttpMethod::Post,
                url,
                Some(("application/json", Bytes::from(body))),
                REQUEST_TIMEOUT,
            )
            .await?;
        let created: DriveFile = Self::parse(&response)?;
        info!(name = %name, id = %created.id, "Created folder");
        Ok(created.id)
    }

    /// Drive id of the folder at `relative`, walking from the account root.
    /// Missing segments are created when `create` is set, otherwise `None`.
    async fn folder_id(&self, relative: &str, create: bool) -> StorageResult<Option<String>> {
        let absolute = full_remote_path(&self.root, relative);
        if let Some(id) = self.cached_folder(&absolute) {
            return Ok(Some(id));
        }

        let _guard = if create {
            Some(self.create_lock.lock().await)
        } else {
            None
        };

        let mut current_id = "root".to_string();
        let mut current_path = String::new();
        for segment in absolute.split('/').filter(|s| !s.is_empty()) {
            current_path = format!("{}/{}", current_path, segment);
            if let Some(id) = self.cached_folder(&current_path) {
                current_id = id;
                continue;
            }
            let id = match self.find_child(&current_id, segment, true).await? {
                Some(folder) => folder.id,
                None if create => self.create_folder(&current_id, segment).await?,
                None => return Ok(None),
            };
            self.cache_folder(current_path.clone(), id.clone());
            current_id = id;
        }
        Ok(Some(current_id))
    }

    async fn resolve_file(&self, relative: &str) -> StorageResult<Option<DriveFile>> {
        let (parent, name) = split_relative(relative);
        match self.folder_id(&parent, false).await? {
            Some(parent_id) => self.find_child(&parent_id, &name, false).await,
            None => Ok(None),
        }
    }

    fn multipart_body(metadata: &FileMetadataRequest<'_>, content: &Bytes) -> StorageResult<Bytes> {
        let json = serde_json::to_string(metadata)
            .map_err(|e| StorageError::Fatal(format!("Failed to encode file metadata: {}", e)))?;
        let mut body = Vec::with_capacity(content.len() + json.len() + 256);
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{json}\r\n--{b}\r\nContent-Type: application/octet-stream\r\n\r\n",
                b = MULTIPART_BOUNDARY,
                json = json
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
        Ok(Bytes::from(body))
    }

    async fn next_batch(&self, walk: &mut Walk, path: &str) -> Option<Vec<StorageResult<RemoteObjectMetadata>>> {
        if walk.done {
            return None;
        }
        if !walk.started {
            walk.started = true;
            match self.folder_id(path, false).await {
                Ok(Some(id)) => walk.pending.push_back((id, normalize_relative(path))),
                Ok(None) => {
                    walk.done = true;
                    return Some(vec![Err(StorageError::NotFound(full_remote_path(
                        &self.root, path,
                    )))]);
                }
                Err(e) => {
                    walk.done = true;
                    return Some(vec![Err(e)]);
                }
            }
        }

        let (folder_id, prefix, token) = match walk.page.take() {
            Some((id, prefix, token)) => (id, prefix, Some(token)),
            None => {
                let (id, prefix) = walk.pending.pop_front()?;
                (id, prefix, None)
            }
        };

        match self.list_children(&folder_id, token.as_deref()).await {
            Ok(list) => {
                if let Some(next) = list.next_page_token {
                    walk.page = Some((folder_id, prefix.clone(), next));
                }
                let items = list
                    .files
                    .into_iter()
                    .map(|file| {
                        let relative = join_relative(&prefix, &file.name);
                        if file.is_folder() {
                            walk.pending.push_back((file.id.clone(), relative.clone()));
                        }
                        Ok(Self::convert_file(file, relative))
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
}

#[async_trait]
impl StorageAdapter for GoogleDriveConnector {
    fn provider_name(&self) -> &'static str {
        "GoogleDrive"
    }

    fn root(&self) -> &str {
        &self.root
    }

    fn list_all<'a>(&'a self, path: &'a str) -> RemoteListing<'a> {
        let walk = Walk {
            pending: VecDeque::new(),
            page: None,
            started: false,
            done: false,
        };
        stream::unfold(walk, move |mut walk| async move {
            let batch = self.next_batch(&mut walk, path).await?;
            Some((batch, walk))
        })
        .flat_map(stream::iter)
        .boxed()
    }

    #[instrument(skip(self))]
    async fn download(&self, path: &str) -> StorageResult<Bytes> {
        let file = self
            .resolve_file(path)
            .await?
            .filter(|f| !f.is_folder())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;

        let url = format!("{}/files/{}?alt=media", DRIVE_API_BASE, file.id);
        let response = self.call(HttpMethod::Get, url, None, TRANSFER_TIMEOUT).await?;
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
        let parent_id = self
            .folder_id(folder, true)
            .await?
            .ok_or_else(|| StorageError::Fatal(format!("Could not create folder {}", folder)))?;
        let existing = self
            .find_child(&parent_id, name, false)
            .await?
            .filter(|f| !f.is_folder());

        let modified_time = modified_at.and_then(Self::format_timestamp);
        let (method, url, metadata) = match &existing {
            Some(file) => (
                HttpMethod::Patch,
                format!(
                    "{}/files/{}?uploadType=multipart&fields={}",
                    DRIVE_UPLOAD_BASE, file.id, FILE_FIELDS
                ),
                FileMetadataRequest {
                    modified_time,
                    ..Default::default()
                },
            ),
            None => (
                HttpMethod::Post,
                format!(
                    "{}/files?uploadType=multipart&fields={}",
                    DRIVE_UPLOAD_BASE, FILE_FIELDS
                ),
                FileMetadataRequest {
                    name: Some(name),
                    parents: Some(vec![parent_id.as_str()]),
                    modified_time,
                    ..Default::default()
                },
            ),
        };
        debug!(update = existing.is_some(), "Uploading");

        let body = Self::multipart_body(&metadata, &content)?;
        let content_type = format!("multipart/related; boundary={}", MULTIPART_BOUNDARY);
        let response = self
            .call(method, url, Some((content_type.as_str(), body)), TRANSFER_TIMEOUT)
            .await?;
        let file: DriveFile = Self::parse(&response)?;

        Ok(Self::convert_file(file, join_relative(folder, name)))
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str) -> StorageResult<DeleteOutcome> {
        let Some(file) = self.resolve_file(path).await? else {
            return Ok(DeleteOutcome::NotFound);
        };
        let url = format!("{}/files/{}", DRIVE_API_BASE, file.id);
        match self.call(HttpMethod::Delete, url, None, REQUEST_TIMEOUT).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(StorageError::NotFound(_)) => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn get_metadata(&self, path: &str) -> StorageResult<Option<RemoteObjectMetadata>> {
        let relative = normalize_relative(path);
        if relative.is_empty() {
            return Ok(self.folder_id("", false).await?.map(|id| RemoteObjectMetadata {
                id,
                name: String::new(),
                path: String::new(),
                revision: String::new(),
                size: 0,
                modified_at: 0,
                is_folder: true,
                is_deleted: false,
            }));
        }
        Ok(self
            .resolve_file(&relative)
            .await?
            .map(|file| Self::convert_file(file, relative)))
    }

    #[instrument(skip(self))]
    async fn ensure_folder(&self, path: &str) -> StorageResult<()> {
        self.folder_id(path, true).await.map(|_| ())
    }

    async fn refresh_token(&self) -> StorageResult<String> {
        self.http.refresh_token().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::storage::SecureStore;
    use bridge_traits::time::{Clock, FixedClock};
    use core_auth::{CredentialStore, OAuthConfig, OAuthFlow, ProviderKind, TokenBundle};
    use mockall::mock;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        secrets: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl SecureStore for MemoryStore {
        async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
            self.secrets.lock().unwrap().insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
            Ok(self.secrets.lock().unwrap().get(key).cloned())
        }

        async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
            self.secrets.lock().unwrap().remove(key);
            Ok(())
        }
    }

    const NOW: i64 = 1_700_000_000;

    async fn connector(mock: MockHttpClient, root: &str) -> GoogleDriveConnector {
        let http: Arc<dyn HttpClient> = Arc::new(mock);
        let store = CredentialStore::new(Arc::new(MemoryStore::default()), "test");
        store
            .save(
                ProviderKind::GoogleDrive,
                &TokenBundle {
                    access_token: "ya29.token".into(),
                    refresh_token: Some("1//refresh".into()),
                    expires_at: NOW + 3600,
                    user_id: None,
                },
            )
            .await
            .unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(NOW));
        let config = OAuthConfig::for_provider(
            ProviderKind::GoogleDrive,
            "client",
            Some("secret".into()),
            "http://localhost",
        );
        let flow = OAuthFlow::new(config, http.clone(), clock.clone());
        let session = AuthSession::load(store, flow, clock).await.unwrap();
        GoogleDriveConnector::new(http, Arc::new(session), root)
    }

    fn decoded(request: &HttpRequest) -> String {
        urlencoding::decode(&request.url)
            .map(|s| s.into_owned())
            .unwrap_or_default()
    }

    fn files(json: &'static str) -> BridgeResult<HttpResponse> {
        Ok(HttpResponse::new(200, json))
    }

    fn expect_root_lookup(mock: &mut MockHttpClient) {
        mock.expect_execute()
            .withf(|r| decoded(r).contains("'root' in parents and name = 'Purse'"))
            .times(1)
            .returning(|_| {
                files(r#"{"files":[{"id":"purse","name":"Purse","mimeType":"application/vnd.google-apps.folder"}]}"#)
            });
    }

    #[test]
    fn test_convert_file() {
        let file = DriveFile {
            id: "file123".to_string(),
            name: "a.md".to_string(),
            mime_type: "text/markdown".to_string(),
            size: Some("1024".to_string()),
            modified_time: Some("2023-11-14T22:13:20.000Z".to_string()),
            head_revision_id: None,
            version: Some("12".to_string()),
            parents: vec!["folder1".to_string()],
            trashed: false,
        };

        let meta = GoogleDriveConnector::convert_file(file, "journal/a.md".into());

        assert_eq!(meta.id, "file123");
        assert_eq!(meta.path, "journal/a.md");
        assert_eq!(meta.size, 1024);
        assert_eq!(meta.modified_at, NOW);
        assert_eq!(meta.revision, "12");
        assert!(!meta.is_folder);
    }

    #[test]
    fn test_query_escaping() {
        assert_eq!(
            GoogleDriveConnector::escape_query("Bob's notes.md"),
            "Bob\\'s notes.md"
        );
    }

    #[tokio::test]
    async fn test_list_all_walks_subfolders() {
        let mut mock = MockHttpClient::new();
        expect_root_lookup(&mut mock);
        mock.expect_execute()
            .withf(|r| decoded(r).contains("'purse' in parents and trashed = false") && !r.url.contains("&pageToken="))
            .times(1)
            .returning(|_| {
                files(r#"{"files":[
                    {"id":"j","name":"journal","mimeType":"application/vnd.google-apps.folder"},
                    {"id":"a","name":"a.md","mimeType":"text/markdown","size":"5",
                     "modifiedTime":"2023-11-14T22:13:20.000Z","headRevisionId":"rev-a"}
                ],"nextPageToken":"p2"}"#)
            });
        mock.expect_execute()
            .withf(|r| decoded(r).contains("'purse' in parents") && r.url.contains("pageToken=p2"))
            .times(1)
            .returning(|_| {
                files(r#"{"files":[
                    {"id":"c","name":"c.md","mimeType":"text/markdown","size":"1",
                     "modifiedTime":"2023-11-14T22:13:21.000Z"}
                ]}"#)
            });
        mock.expect_execute()
            .withf(|r| decoded(r).contains("'j' in parents"))
            .times(1)
            .returning(|_| {
                files(r#"{"files":[
                    {"id":"b","name":"b.md","mimeType":"text/markdown","size":"3",
                     "modifiedTime":"2023-11-14T22:13:22.000Z"}
                ]}"#)
            });
        let connector = connector(mock, "/Purse").await;

        let items: Vec<RemoteObjectMetadata> = connector
            .list_all("")
            .map(|item| item.unwrap())
            .collect()
            .await;

        let paths: Vec<&str> = items.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["journal", "a.md", "c.md", "journal/b.md"]);
        assert!(items[0].is_folder);
        assert_eq!(items[1].revision, "rev-a");
        assert_eq!(items[3].modified_at, NOW + 2);
    }

    #[tokio::test]
    async fn test_missing_root_lists_not_found() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| files(r#"{"files":[]}"#));
        let connector = connector(mock, "/Purse").await;

        let items: Vec<_> = connector.list_all("").collect().await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_upload_creates_missing_folder_and_file() {
        let mut mock = MockHttpClient::new();
        expect_root_lookup(&mut mock);
        mock.expect_execute()
            .withf(|r| decoded(r).contains("'purse' in parents and name = 'notes'"))
            .times(1)
            .returning(|_| files(r#"{"files":[]}"#));
        mock.expect_execute()
            .withf(|r| r.method == HttpMethod::Post && r.url.starts_with("https://www.googleapis.com/drive/v3/files?"))
            .times(1)
            .returning(|r| {
                let body: serde_json::Value =
                    serde_json::from_slice(r.body.as_deref().unwrap()).unwrap();
                assert_eq!(body["name"], "notes");
                assert_eq!(body["mimeType"], FOLDER_MIME_TYPE);
                assert_eq!(body["parents"][0], "purse");
                files(r#"{"id":"notes-id","name":"notes","mimeType":"application/vnd.google-apps.folder"}"#)
            });
        mock.expect_execute()
            .withf(|r| decoded(r).contains("'notes-id' in parents and name = 'a.md'"))
            .times(1)
            .returning(|_| files(r#"{"files":[]}"#));
        mock.expect_execute()
            .withf(|r| r.url.starts_with("https://www.googleapis.com/upload/drive/v3/files?uploadType=multipart"))
            .times(1)
            .returning(|r| {
                assert_eq!(r.method, HttpMethod::Post);
                assert!(r.headers["Content-Type"].starts_with("multipart/related; boundary="));
                let body = String::from_utf8(r.body.clone().unwrap().to_vec()).unwrap();
                assert!(body.contains(r#""modifiedTime":"2023-11-14T22:13:20.000Z""#));
                assert!(body.contains(r#""parents":["notes-id"]"#));
                assert!(body.contains("\r\n\r\nhello\r\n"));
                files(r#"{"id":"a-id","name":"a.md","mimeType":"text/markdown","size":"5",
                         "modifiedTime":"2023-11-14T22:13:20.000Z","headRevisionId":"r1"}"#)
            });
        let connector = connector(mock, "/Purse").await;

        let meta = connector
            .upload(Bytes::from_static(b"hello"), "notes", "a.md", Some(NOW))
            .await
            .unwrap();

        assert_eq!(meta.path, "notes/a.md");
        assert_eq!(meta.id, "a-id");
        assert_eq!(meta.modified_at, NOW);
    }

    #[tokio::test]
    async fn test_upload_updates_existing_file() {
        let mut mock = MockHttpClient::new();
        expect_root_lookup(&mut mock);
        mock.expect_execute()
            .withf(|r| decoded(r).contains("name = 'a.md'"))
            .times(1)
            .returning(|_| files(r#"{"files":[{"id":"a-id","name":"a.md","mimeType":"text/markdown"}]}"#));
        mock.expect_execute()
            .withf(|r| r.url.starts_with("https://www.googleapis.com/upload/drive/v3/files/a-id?"))
            .times(1)
            .returning(|r| {
                assert_eq!(r.method, HttpMethod::Patch);
                let body = String::from_utf8(r.body.clone().unwrap().to_vec()).unwrap();
                assert!(!body.contains("parents"));
                files(r#"{"id":"a-id","name":"a.md","mimeType":"text/markdown","version":"8"}"#)
            });
        let connector = connector(mock, "/Purse").await;

        let meta = connector
            .upload(Bytes::from_static(b"v2"), "", "a.md", None)
            .await
            .unwrap();

        assert_eq!(meta.revision, "8");
    }

    #[tokio::test]
    async fn test_folder_ids_are_cached() {
        let mut mock = MockHttpClient::new();
        expect_root_lookup(&mut mock);
        let connector = connector(mock, "/Purse").await;

        connector.ensure_folder("").await.unwrap();
        connector.ensure_folder("").await.unwrap();
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let mut mock = MockHttpClient::new();
        expect_root_lookup(&mut mock);
        mock.expect_execute()
            .withf(|r| decoded(r).contains("name = 'missing.md'"))
            .returning(|_| files(r#"{"files":[]}"#));
        let connector = connector(mock, "/Purse").await;

        assert!(matches!(
            connector.download("missing.md").await,
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(connector.get_metadata("missing.md").await.unwrap(), None);
        assert_eq!(
            connector.delete("missing.md").await.unwrap(),
            DeleteOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_rate_limit_classified() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute().times(1).returning(|_| {
            Ok(HttpResponse::new(
                403,
                r#"{"error":{"code":403,"message":"Rate","errors":[{"reason":"rateLimitExceeded"}]}}"#,
            ))
        });
        let connector = connector(mock, "/Purse").await;

        let result = connector.ensure_folder("").await;

        assert!(matches!(result, Err(StorageError::RateLimited { .. })));
    }
}
