//! # OneDrive Provider
//!
//! Implements `StorageAdapter` for Microsoft Graph API (OneDrive).
//!
//! ## Overview
//!
//! This module provides:
//! - Path-addressed items under the configured app root
//! - Recursive listing following `@odata.nextLink`
//! - Simple uploads up to 4 MiB and upload sessions above that
//! - Throttling classification per Graph API guidelines

pub mod connector;
pub mod error;
pub mod types;

pub use connector::OneDriveConnector;
pub use error::{OneDriveError, Result};
