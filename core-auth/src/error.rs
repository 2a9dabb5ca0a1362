use bridge_traits::error::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Provider {provider} authentication failed: {reason}")]
    AuthenticationFailed { provider: String, reason: String },

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    /// The provider rejected the refresh token (`invalid_grant`); the stored
    /// bundle has been deleted and the user must sign in again.
    #[error("Refresh token rejected: {0}")]
    RefreshRejected(String),

    #[error("Invalid authorization code: {0}")]
    InvalidAuthCode(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("OAuth state mismatch (expected {expected}, got {actual})")]
    StateMismatch { expected: String, actual: String },

    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Invalid provider: {0}")]
    InvalidProvider(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Auth error: {0}")]
    Other(String),
}

impl AuthError {
    /// Whether the user has to sign in again to recover.
    pub fn requires_sign_in(&self) -> bool {
        matches!(
            self,
            AuthError::NotAuthenticated
                | AuthError::RefreshRejected(_)
                | AuthError::InvalidToken(_)
                | AuthError::AuthenticationFailed { .. }
        )
    }
}

/// Adapters surface auth failures through the storage taxonomy.
impl From<AuthError> for StorageError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Network(msg) => StorageError::Transient(msg),
            AuthError::SecureStorageUnavailable(msg) => StorageError::Fatal(format!(
                "secure storage unavailable: {}",
                msg
            )),
            other => StorageError::Unauthorized(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
