//! Error types for the Dropbox provider

use bridge_traits::error::StorageError;
use bridge_traits::http::HttpResponse;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DropboxError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Endpoint-specific error (HTTP 409), e.g. `path/not_found/..`
    #[error("Dropbox API error: {summary}")]
    Endpoint { summary: String },

    #[error("Dropbox API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Failed to parse API response: {0}")]
    ParseError(String),
}

pub type Result<T> = std::result::Result<T, DropboxError>;

impl DropboxError {
    /// Classify a non-success response.
    pub fn from_response(response: &HttpResponse) -> Self {
        let body = String::from_utf8_lossy(&response.body).to_string();
        match response.status {
            401 => DropboxError::AuthenticationFailed(body),
            409 => {
                let summary = serde_json::from_slice::<crate::types::ApiErrorBody>(&response.body)
                    .map(|e| e.error_summary)
                    .unwrap_or(body);
                DropboxError::Endpoint { summary }
            }
            429 => DropboxError::RateLimited {
                retry_after: response.retry_after(),
            },
            status => DropboxError::ApiError {
                status_code: status,
                message: body,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DropboxError::Endpoint { summary } if summary.contains("not_found"))
    }

    /// `create_folder_v2` conflict: something already exists at the path.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DropboxError::Endpoint { summary } if summary.starts_with("path/conflict"))
    }
}

impl From<DropboxError> for StorageError {
    fn from(error: DropboxError) -> Self {
        match error {
            DropboxError::AuthenticationFailed(msg) => StorageError::Unauthorized(msg),
            e @ DropboxError::Endpoint { .. } if e.is_not_found() => {
                StorageError::NotFound(e.to_string())
            }
            DropboxError::Endpoint { summary } if summary.contains("insufficient_space") => {
                StorageError::Fatal(format!("Dropbox quota exceeded: {}", summary))
            }
            DropboxError::Endpoint { summary } if summary.contains("too_many_write_operations") => {
                StorageError::RateLimited { retry_after: None }
            }
            e @ DropboxError::Endpoint { .. } => StorageError::Fatal(e.to_string()),
            DropboxError::RateLimited { retry_after } => StorageError::RateLimited { retry_after },
            DropboxError::ApiError { status_code, message } if status_code >= 500 => {
                StorageError::Transient(format!("HTTP {}: {}", status_code, message))
            }
            e @ DropboxError::ApiError { .. } => StorageError::Fatal(e.to_string()),
            DropboxError::ParseError(msg) => StorageError::Fatal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(status: u16, body: &str) -> StorageError {
        DropboxError::from_response(&HttpResponse::new(status, body.to_string())).into()
    }

    #[test]
    fn test_classification() {
        assert!(matches!(
            classify(409, r#"{"error_summary":"path/not_found/..","error":{}}"#),
            StorageError::NotFound(_)
        ));
        assert!(matches!(
            classify(409, r#"{"error_summary":"path/insufficient_space/.."}"#),
            StorageError::Fatal(_)
        ));
        assert!(matches!(classify(401, "expired"), StorageError::Unauthorized(_)));
        assert!(matches!(classify(503, ""), StorageError::Transient(_)));
        assert!(matches!(classify(400, "bad arg"), StorageError::Fatal(_)));
    }

    #[test]
    fn test_rate_limit_keeps_hint() {
        let response = HttpResponse::new(429, "").with_header("Retry-After", "7");
        let error: StorageError = DropboxError::from_response(&response).into();
        assert_eq!(
            error,
            StorageError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
    }

    #[test]
    fn test_conflict_detection() {
        let error = DropboxError::Endpoint {
            summary: "path/conflict/folder/..".into(),
        };
        assert!(error.is_conflict());
        assert!(!error.is_not_found());
    }
}
