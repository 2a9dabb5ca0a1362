//! Error types for the OneDrive provider

use bridge_traits::error::StorageError;
use bridge_traits::http::HttpResponse;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OneDriveError {
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    /// Name conflict (HTTP 409), e.g. a folder that already exists
    #[error("Item already exists: {0}")]
    Conflict(String),

    #[error("Throttled by Graph API")]
    Throttled { retry_after: Option<Duration> },

    #[error("OneDrive storage quota exceeded")]
    InsufficientStorage,

    #[error("Graph API error (status {status_code}, {code}): {message}")]
    ApiError {
        status_code: u16,
        code: String,
        message: String,
    },

    #[error("Failed to parse API response: {0}")]
    ParseError(String),
}

pub type Result<T> = std::result::Result<T, OneDriveError>;

impl OneDriveError {
    /// Classify a non-success Graph response.
    pub fn from_response(response: &HttpResponse) -> Self {
        let parsed = serde_json::from_slice::<crate::types::GraphErrorResponse>(&response.body)
            .ok()
            .map(|e| e.error);
        let (code, message) = match parsed {
            Some(error) => (error.code, error.message),
            None => (
                String::new(),
                String::from_utf8_lossy(&response.body).to_string(),
            ),
        };

        match response.status {
            401 => OneDriveError::AuthRequired(message),
            404 => OneDriveError::NotFound(message),
            409 => OneDriveError::Conflict(message),
            429 | 503 => OneDriveError::Throttled {
                retry_after: response.retry_after(),
            },
            507 => OneDriveError::InsufficientStorage,
            status => OneDriveError::ApiError {
                status_code: status,
                code,
                message,
            },
        }
    }
}

impl From<OneDriveError> for StorageError {
    fn from(error: OneDriveError) -> Self {
        match error {
            OneDriveError::AuthRequired(msg) => StorageError::Unauthorized(msg),
            OneDriveError::NotFound(msg) => StorageError::NotFound(msg),
            OneDriveError::Throttled { retry_after } => StorageError::RateLimited { retry_after },
            OneDriveError::ApiError { status_code, message, .. } if status_code >= 500 => {
                StorageError::Transient(format!("HTTP {}: {}", status_code, message))
            }
            e @ (OneDriveError::Conflict(_)
            | OneDriveError::InsufficientStorage
            | OneDriveError::ApiError { .. }
            | OneDriveError::ParseError(_)) => StorageError::Fatal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(status: u16, body: &str) -> StorageError {
        OneDriveError::from_response(&HttpResponse::new(status, body.to_string())).into()
    }

    #[test]
    fn test_classification() {
        assert!(matches!(
            classify(404, r#"{"error":{"code":"itemNotFound","message":"Item does not exist"}}"#),
            StorageError::NotFound(msg) if msg == "Item does not exist"
        ));
        assert!(matches!(classify(401, "{}"), StorageError::Unauthorized(_)));
        assert!(matches!(classify(507, ""), StorageError::Fatal(_)));
        assert!(matches!(classify(502, "bad gateway"), StorageError::Transient(_)));
        assert!(matches!(classify(400, "invalid"), StorageError::Fatal(_)));
    }

    #[test]
    fn test_throttling_keeps_retry_after() {
        for status in [429, 503] {
            let response = HttpResponse::new(status, "").with_header("Retry-After", "12");
            let error: StorageError = OneDriveError::from_response(&response).into();
            assert_eq!(
                error,
                StorageError::RateLimited {
                    retry_after: Some(Duration::from_secs(12))
                }
            );
        }
    }

    #[test]
    fn test_api_error_keeps_graph_code() {
        let response = HttpResponse::new(
            400,
            r#"{"error":{"code":"invalidRequest","message":"Invalid path"}}"#,
        );
        match OneDriveError::from_response(&response) {
            OneDriveError::ApiError { code, message, .. } => {
                assert_eq!(code, "invalidRequest");
                assert_eq!(message, "Invalid path");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
