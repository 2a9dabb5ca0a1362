use bridge_traits::error::{BridgeError, StorageError};
use thiserror::Error;

/// Run-level failures. Per-action failures are collected in the report
/// instead and never surface here.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync already in progress")]
    SyncInProgress,

    #[error("Remote root unreachable: {0}")]
    RemoteUnreachable(StorageError),

    #[error("Local sync root unreadable: {0}")]
    LocalScan(String),

    #[error("Credentials unavailable: {0}")]
    Credentials(String),

    #[error("Conflict log write failed: {0}")]
    ConflictLog(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Filesystem error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Sync timeout after {0} seconds")]
    Timeout(u64),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

pub type Result<T> = std::result::Result<T, SyncError>;
