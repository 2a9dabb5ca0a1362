//! # Document Sync Core
//!
//! Two-way, timestamp-based replication between a local sync root and one
//! remote storage adapter.
//!
//! ## Components
//!
//! - **Scanners** (`scanner`): local filesystem and remote listing snapshots
//! - **Reconciliation** (`reconcile`): pure diff producing actions and conflicts
//! - **Retry** (`retry`): bounded exponential backoff for storage calls
//! - **Conflict Log** (`conflict_log`): append-only NDJSON audit trail
//! - **Run State** (`job`): phase state machine and run report
//! - **Orchestrator** (`coordinator`): drives a full sync run

pub mod conflict_log;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod reconcile;
pub mod retry;
pub mod scanner;
mod settings_sync;
pub mod transfer;

pub use conflict_log::{ConflictLog, ConflictRecord};
pub use coordinator::SyncOrchestrator;
pub use error::{Result, SyncError};
pub use job::{FailedAction, RunId, SettingsOutcome, SyncPhase, SyncReport};
pub use reconcile::{reconcile, Conflict, Reconciliation, Resolution, SyncAction};
pub use retry::RetryPolicy;
pub use scanner::{FileState, LocalScanner, RemoteScanner, ScanFilter, StateMap};
pub use transfer::ActionError;

pub use tokio_util::sync::CancellationToken;
