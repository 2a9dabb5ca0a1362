//! Workspace placeholder crate.
//!
//! Exposes the `desktop-shims` feature that maps onto `core-service`, so host
//! applications can depend on `purse-sync-workspace` without wiring each
//! crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
