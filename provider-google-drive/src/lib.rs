//! # Google Drive Provider
//!
//! Implements `StorageAdapter` for Google Drive API v3.
//!
//! ## Overview
//!
//! This module provides:
//! - Path-to-id resolution with a folder id cache
//! - Recursive listing with `nextPageToken` paging
//! - Multipart create/update uploads that preserve the client modification time
//! - Error classification into the shared `StorageError` taxonomy

pub mod connector;
pub mod error;
pub mod types;

pub use connector::GoogleDriveConnector;
pub use error::{GoogleDriveError, Result};
