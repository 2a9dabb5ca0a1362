//! Dropbox API v2 request and response types
//!
//! See: https://www.dropbox.com/developers/documentation/http/documentation

use serde::{Deserialize, Serialize};

/// One entry of `list_folder`, or a `get_metadata`/`upload` result.
///
/// Tagged by `.tag`: `file`, `folder` or `deleted`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum Metadata {
    File(FileMetadata),
    Folder(FolderMetadata),
    Deleted(DeletedMetadata),
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path_display: Option<String>,
    #[serde(default)]
    pub path_lower: Option<String>,
    /// RFC 3339, set by the uploading client
    pub client_modified: String,
    /// RFC 3339, set by Dropbox
    pub server_modified: String,
    pub rev: String,
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FolderMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path_display: Option<String>,
    #[serde(default)]
    pub path_lower: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeletedMetadata {
    pub name: String,
    #[serde(default)]
    pub path_display: Option<String>,
    #[serde(default)]
    pub path_lower: Option<String>,
}

impl Metadata {
    pub fn path_display(&self) -> Option<&str> {
        let (display, lower) = match self {
            Metadata::File(m) => (&m.path_display, &m.path_lower),
            Metadata::Folder(m) => (&m.path_display, &m.path_lower),
            Metadata::Deleted(m) => (&m.path_display, &m.path_lower),
        };
        display.as_deref().or(lower.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct ListFolderResult {
    pub entries: Vec<Metadata>,
    pub cursor: String,
    pub has_more: bool,
}

/// `files/create_folder_v2` and `files/delete_v2` wrap the metadata.
#[derive(Debug, Deserialize)]
pub struct MetadataResult {
    pub metadata: Metadata,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub error_summary: String,
}

#[derive(Debug, Serialize)]
pub struct ListFolderArg<'a> {
    pub path: &'a str,
    pub recursive: bool,
    pub include_deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct ListFolderContinueArg<'a> {
    pub cursor: &'a str,
}

#[derive(Debug, Serialize)]
pub struct PathArg<'a> {
    pub path: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CreateFolderArg<'a> {
    pub path: &'a str,
    pub autorename: bool,
}

#[derive(Debug, Serialize)]
pub struct UploadArg<'a> {
    pub path: &'a str,
    pub mode: &'static str,
    pub autorename: bool,
    pub mute: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_modified: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_folder_page() {
        let json = r#"{
            "entries": [
                {".tag": "folder", "id": "id:f", "name": "journal",
                 "path_lower": "/apps/purse/journal", "path_display": "/Apps/Purse/journal"},
                {".tag": "file", "id": "id:a", "name": "a.md",
                 "path_lower": "/apps/purse/journal/a.md", "path_display": "/Apps/Purse/journal/a.md",
                 "client_modified": "2024-01-02T03:04:05Z", "server_modified": "2024-01-02T03:04:09Z",
                 "rev": "015f", "size": 12, "content_hash": "abc"},
                {".tag": "deleted", "name": "old.md", "path_lower": "/apps/purse/old.md"}
            ],
            "cursor": "AAE",
            "has_more": true
        }"#;

        let page: ListFolderResult = serde_json::from_str(json).unwrap();

        assert_eq!(page.entries.len(), 3);
        assert!(page.has_more);
        assert!(matches!(&page.entries[1], Metadata::File(f) if f.size == 12 && f.rev == "015f"));
        assert_eq!(page.entries[2].path_display(), Some("/apps/purse/old.md"));
    }

    #[test]
    fn test_upload_arg_omits_missing_mtime() {
        let arg = UploadArg {
            path: "/Apps/Purse/a.md",
            mode: "overwrite",
            autorename: false,
            mute: true,
            client_modified: None,
        };
        let json = serde_json::to_string(&arg).unwrap();
        assert!(!json.contains("client_modified"));
        assert!(json.contains(r#""mode":"overwrite""#));
    }
}
