//! # Authentication Module
//!
//! Provider credentials for the sync core.
//!
//! ## Overview
//!
//! - [`CredentialStore`] persists one [`TokenBundle`] per provider in the
//!   platform secure store
//! - [`OAuthFlow`] runs the OAuth 2.0 authorization-code flow with PKCE
//! - [`AuthSession`] holds the working copy used by storage adapters and
//!   serializes token refresh
//! - [`AuthorizedHttp`] sends bearer-authenticated requests with a single
//!   refresh-and-replay on `401`
//!
//! Supported providers: Dropbox, Google Drive and OneDrive.

pub mod authorized;
pub mod credential_store;
pub mod error;
pub mod oauth;
pub mod session;
pub mod types;

pub use authorized::AuthorizedHttp;
pub use credential_store::CredentialStore;
pub use error::{AuthError, Result};
pub use oauth::{OAuthConfig, OAuthFlow, PkceVerifier};
pub use session::{AuthSession, TOKEN_REFRESH_BUFFER};
pub use types::{AuthState, ProviderKind, TokenBundle};
