use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failure taxonomy shared by every storage adapter.
///
/// The orchestrator decides retry behaviour from the variant alone, so
/// adapters must classify provider-native failures at the boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Credentials missing, expired or revoked.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The provider asked us to slow down. `retry_after` carries the server hint when present.
    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// Network-level failure or provider-side 5xx.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Quota exceeded, corrupted state, malformed payloads. Never retried.
    #[error("Fatal storage error: {0}")]
    Fatal(String),
}

impl StorageError {
    /// True for failures the retry wrapper may attempt again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Short stable label used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient(_) => "transient",
            Self::Fatal(_) => "fatal",
        }
    }
}

impl From<BridgeError> for StorageError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Network(msg) => StorageError::Transient(msg),
            BridgeError::Io(e) => StorageError::Transient(e.to_string()),
            BridgeError::NotAvailable(msg) => StorageError::Fatal(msg),
            BridgeError::OperationFailed(msg) => StorageError::Fatal(msg),
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(StorageError::Transient("reset".into()).is_retryable());
        assert!(StorageError::RateLimited { retry_after: None }.is_retryable());
        assert!(!StorageError::Unauthorized("expired".into()).is_retryable());
        assert!(!StorageError::NotFound("a.md".into()).is_retryable());
        assert!(!StorageError::Fatal("quota".into()).is_retryable());
    }

    #[test]
    fn test_bridge_error_conversion() {
        let err: StorageError = BridgeError::Network("connection reset".into()).into();
        assert_eq!(err, StorageError::Transient("connection reset".into()));

        let err: StorageError = BridgeError::OperationFailed("bad json".into()).into();
        assert_eq!(err.kind(), "fatal");
    }
}
