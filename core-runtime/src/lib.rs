//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the document sync core:
//! - Logging and tracing infrastructure
//! - Explicit configuration with YAML loading
//! - Event bus for auth, sync and document notifications
//!
//! Every other crate in the workspace depends on this one for its
//! configuration types and event vocabulary.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, RetryConfig};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, EventStream};
pub use logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
