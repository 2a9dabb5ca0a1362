//! Error types for Google Drive provider

use bridge_traits::error::StorageError;
use bridge_traits::http::HttpResponse;
use std::time::Duration;
use thiserror::Error;

/// Google Drive provider errors
#[derive(Error, Debug)]
pub enum GoogleDriveError {
    /// Authentication failed or token is invalid
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// API request returned an error
    #[error("Google Drive API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: Option<Duration> },

    /// Storage quota exhausted
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// File not found
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),
}

/// Result type for Google Drive operations
pub type Result<T> = std::result::Result<T, GoogleDriveError>;

impl GoogleDriveError {
    /// Classify a non-success response. Drive reports rate limiting both as
    /// `429` and as `403` with a `rateLimitExceeded` reason.
    pub fn from_response(response: &HttpResponse) -> Self {
        let message = String::from_utf8_lossy(&response.body).to_string();
        let reason = crate::types::ErrorResponse::reason(&response.body);
        match (response.status, reason.as_deref()) {
            (401, _) => GoogleDriveError::AuthenticationFailed(message),
            (404, _) => GoogleDriveError::FileNotFound { path: message },
            (429, _) | (403, Some("rateLimitExceeded")) | (403, Some("userRateLimitExceeded")) => {
                GoogleDriveError::RateLimitExceeded {
                    retry_after: response.retry_after(),
                }
            }
            (403, Some("storageQuotaExceeded")) => GoogleDriveError::QuotaExceeded(message),
            (status, _) => GoogleDriveError::ApiError {
                status_code: status,
                message,
            },
        }
    }
}

impl From<GoogleDriveError> for StorageError {
    fn from(error: GoogleDriveError) -> Self {
        match error {
            GoogleDriveError::AuthenticationFailed(msg) => StorageError::Unauthorized(msg),
            GoogleDriveError::FileNotFound { path } => StorageError::NotFound(path),
            GoogleDriveError::RateLimitExceeded { retry_after } => {
                StorageError::RateLimited { retry_after }
            }
            GoogleDriveError::ApiError {
                status_code,
                message,
            } if status_code >= 500 => {
                StorageError::Transient(format!("HTTP {}: {}", status_code, message))
            }
            other => StorageError::Fatal(other.to_string()),
        }
    }
}
