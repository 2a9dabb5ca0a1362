//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform,
//! plus the [`StorageAdapter`](storage::StorageAdapter) capability that every
//! cloud provider crate implements.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Async HTTP, one attempt per call
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Local file I/O under the sync root
//!
//! ### Security
//! - [`SecureStore`](storage::SecureStore) - Credential persistence (Keychain, Secret Service)
//!
//! ### Remote storage
//! - [`StorageAdapter`](storage::StorageAdapter) - Uniform CRUD + listing over one provider
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! Host bridges report [`BridgeError`](error::BridgeError). Storage adapters
//! classify every failure into [`StorageError`](error::StorageError), which is
//! what the sync core uses to decide whether to retry, refresh or give up.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks.

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::{BridgeError, StorageError, StorageResult};

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use storage::{
    DeleteOutcome, FileMetadata, FileSystemAccess, RemoteListing, RemoteObjectMetadata,
    SecureStore, StorageAdapter,
};
pub use time::{Clock, FixedClock, SystemClock};
