//! # Dropbox Provider
//!
//! Implements `StorageAdapter` for the Dropbox API v2.
//!
//! ## Overview
//!
//! - Recursive listing via `files/list_folder` with cursor paging
//! - Whole-file download and overwrite upload on the content endpoint
//! - Folder creation that treats an existing folder as success
//! - Error classification into the shared `StorageError` taxonomy

pub mod connector;
pub mod error;
pub mod types;

pub use connector::DropboxConnector;
pub use error::{DropboxError, Result};
