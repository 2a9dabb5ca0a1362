//! # Core Configuration Module
//!
//! Explicit configuration passed to every component at construction. There is
//! no process-wide mutable configuration object.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .sync_root("/home/me/Purse")
//!     .data_dir("/home/me/.local/share/purse")
//!     .remote_root("/Apps/Purse")
//!     .tolerance(Duration::from_secs(2))
//!     .build()?;
//! ```
//!
//! Configuration can also be loaded from YAML:
//!
//! ```yaml
//! app_id: com.example.purse
//! sync:
//!   root: /home/me/Purse
//!   remote_root: /Apps/Purse
//!   tolerance_seconds: 2.0
//! retry:
//!   max_attempts: 5
//!   initial_delay_seconds: 1.0
//!   max_delay_seconds: 60.0
//!   jitter: true
//! logging:
//!   level: debug
//!   format: compact
//! ```
//!
//! ## Error Handling
//!
//! `build()` validates the assembled configuration and reports the first
//! problem as [`Error::Config`] with an actionable message.

use crate::error::{Error, Result};
use crate::logging::{LogFormat, LogLevel, LoggingConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_APP_ID: &str = "com.christopherspenn.purse";
pub const DEFAULT_REMOTE_ROOT: &str = "/Apps/Purse";
pub const DEFAULT_CONFLICT_LOG_FILENAME: &str = "sync_actions.log";
pub const DEFAULT_CONFIG_DIR_NAME: &str = ".purse_config";
pub const DEFAULT_SETTINGS_FILENAME: &str = "settings.yml";
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(2);

/// Bounded retry parameters for remote operations.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Add up to 25% random jitter to each delay
    pub jitter: bool,
    /// Minimum delay after a rate-limit response
    pub rate_limit_floor: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: true,
            rate_limit_floor: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.initial_delay > self.max_delay {
            return Err(Error::Config(format!(
                "retry.initial_delay ({:?}) must not exceed retry.max_delay ({:?})",
                self.initial_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

/// Core configuration for the sync core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Application identifier, part of every credential key
    pub app_id: String,
    /// Absolute local directory replicated to the remote root
    pub sync_root: PathBuf,
    /// Absolute remote folder, e.g. `/Apps/Purse`
    pub remote_root: String,
    /// Directory for the conflict log
    pub data_dir: PathBuf,
    pub conflict_log_filename: String,
    /// Hidden folder (local and remote) holding the shared settings file
    pub config_dir_name: String,
    pub settings_filename: String,
    /// Lower-case extensions (without dot) treated as documents
    pub document_extensions: Vec<String>,
    /// Timestamp difference treated as "no conflict"
    pub tolerance: Duration,
    pub retry: RetryConfig,
    /// Upper bound on concurrently executing transfers
    pub max_concurrent_transfers: usize,
    /// Abort a run that takes longer than this
    pub sync_timeout: Option<Duration>,
    pub logging: LoggingConfig,
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.app_id.trim().is_empty() {
            return Err(Error::Config("app_id cannot be empty".to_string()));
        }
        if !self.sync_root.is_absolute() {
            return Err(Error::Config(format!(
                "sync root must be an absolute path, got {}",
                self.sync_root.display()
            )));
        }
        if !self.remote_root.starts_with('/') {
            return Err(Error::Config(format!(
                "remote root must start with '/', got {}",
                self.remote_root
            )));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config(
                "data directory is required. Use .data_dir() to set it.".to_string(),
            ));
        }
        if self.document_extensions.is_empty() {
            return Err(Error::Config(
                "at least one document extension is required".to_string(),
            ));
        }
        if self.max_concurrent_transfers == 0 {
            return Err(Error::Config(
                "max_concurrent_transfers must be at least 1".to_string(),
            ));
        }
        if self.config_dir_name.is_empty() || self.settings_filename.is_empty() {
            return Err(Error::Config(
                "settings file location cannot be empty".to_string(),
            ));
        }
        self.retry.validate()
    }

    /// `<data_dir>/logs/<conflict_log_filename>`
    pub fn conflict_log_path(&self) -> PathBuf {
        self.data_dir.join("logs").join(&self.conflict_log_filename)
    }

    /// Local path of the shared settings file.
    pub fn local_settings_path(&self) -> PathBuf {
        self.sync_root
            .join(&self.config_dir_name)
            .join(&self.settings_filename)
    }

    /// Remote path of the shared settings file, relative to the remote root.
    pub fn remote_settings_path(&self) -> String {
        format!("{}/{}", self.config_dir_name, self.settings_filename)
    }

    /// Whether `name` carries one of the configured document extensions.
    pub fn is_document_name(&self, name: &str) -> bool {
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.document_extensions.iter().any(|e| *e == ext)
            }
            _ => false,
        }
    }

    /// Parse a YAML document. Missing keys take defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Invalid configuration YAML: {}", e)))?;
        file.into_builder().build()
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read configuration {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }
}

/// Builder for [`CoreConfig`].
#[derive(Debug, Clone)]
pub struct CoreConfigBuilder {
    app_id: String,
    sync_root: Option<PathBuf>,
    remote_root: String,
    data_dir: Option<PathBuf>,
    conflict_log_filename: String,
    config_dir_name: String,
    settings_filename: String,
    document_extensions: Vec<String>,
    tolerance: Duration,
    retry: RetryConfig,
    max_concurrent_transfers: usize,
    sync_timeout: Option<Duration>,
    logging: LoggingConfig,
}

impl Default for CoreConfigBuilder {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
            sync_root: None,
            remote_root: DEFAULT_REMOTE_ROOT.to_string(),
            data_dir: None,
            conflict_log_filename: DEFAULT_CONFLICT_LOG_FILENAME.to_string(),
            config_dir_name: DEFAULT_CONFIG_DIR_NAME.to_string(),
            settings_filename: DEFAULT_SETTINGS_FILENAME.to_string(),
            document_extensions: vec!["md".to_string()],
            tolerance: DEFAULT_TOLERANCE,
            retry: RetryConfig::default(),
            max_concurrent_transfers: 4,
            sync_timeout: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl CoreConfigBuilder {
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn sync_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.sync_root = Some(path.into());
        self
    }

    /// A missing leading `/` is added; an empty value falls back to the default.
    pub fn remote_root(mut self, root: impl Into<String>) -> Self {
        let root = root.into().trim().to_string();
        self.remote_root = if root.is_empty() {
            DEFAULT_REMOTE_ROOT.to_string()
        } else if root.starts_with('/') {
            root
        } else {
            format!("/{}", root)
        };
        self
    }

    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    pub fn conflict_log_filename(mut self, name: impl Into<String>) -> Self {
        self.conflict_log_filename = name.into();
        self
    }

    pub fn config_dir_name(mut self, name: impl Into<String>) -> Self {
        self.config_dir_name = name.into();
        self
    }

    pub fn settings_filename(mut self, name: impl Into<String>) -> Self {
        self.settings_filename = name.into();
        self
    }

    pub fn document_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.document_extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_concurrent_transfers(mut self, workers: usize) -> Self {
        self.max_concurrent_transfers = workers;
        self
    }

    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = Some(timeout);
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<CoreConfig> {
        let sync_root = self.sync_root.ok_or_else(|| {
            Error::Config("Sync root is required. Use .sync_root() to set it.".to_string())
        })?;
        let data_dir = self.data_dir.ok_or_else(|| {
            Error::Config("Data directory is required. Use .data_dir() to set it.".to_string())
        })?;

        let config = CoreConfig {
            app_id: self.app_id,
            sync_root,
            remote_root: self.remote_root,
            data_dir,
            conflict_log_filename: self.conflict_log_filename,
            config_dir_name: self.config_dir_name,
            settings_filename: self.settings_filename,
            document_extensions: self.document_extensions,
            tolerance: self.tolerance,
            retry: self.retry,
            max_concurrent_transfers: self.max_concurrent_transfers,
            sync_timeout: self.sync_timeout,
            logging: self.logging,
        };
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// YAML file layout
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    app_id: Option<String>,
    data_dir: Option<PathBuf>,
    sync: SyncSection,
    retry: RetrySection,
    logging: LoggingSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SyncSection {
    root: Option<PathBuf>,
    remote_root: Option<String>,
    tolerance_seconds: Option<f64>,
    document_extensions: Option<Vec<String>>,
    max_concurrent_transfers: Option<usize>,
    timeout_seconds: Option<u64>,
    conflict_log_filename: Option<String>,
    config_dir_name: Option<String>,
    settings_filename: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RetrySection {
    max_attempts: Option<u32>,
    initial_delay_seconds: Option<f64>,
    max_delay_seconds: Option<f64>,
    jitter: Option<bool>,
    rate_limit_floor_seconds: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingSection {
    level: Option<LogLevel>,
    format: Option<LogFormat>,
    filter: Option<String>,
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

impl ConfigFile {
    fn into_builder(self) -> CoreConfigBuilder {
        let mut builder = CoreConfig::builder();

        if let Some(app_id) = self.app_id {
            builder = builder.app_id(app_id);
        }
        if let Some(dir) = self.data_dir {
            builder = builder.data_dir(dir);
        }

        let sync = self.sync;
        if let Some(root) = sync.root {
            builder = builder.sync_root(root);
        }
        if let Some(remote_root) = sync.remote_root {
            builder = builder.remote_root(remote_root);
        }
        if let Some(tolerance) = sync.tolerance_seconds {
            builder = builder.tolerance(seconds(tolerance));
        }
        if let Some(extensions) = sync.document_extensions {
            builder = builder.document_extensions(extensions);
        }
        if let Some(workers) = sync.max_concurrent_transfers {
            builder = builder.max_concurrent_transfers(workers);
        }
        if let Some(timeout) = sync.timeout_seconds {
            builder = builder.sync_timeout(Duration::from_secs(timeout));
        }
        if let Some(name) = sync.conflict_log_filename {
            builder = builder.conflict_log_filename(name);
        }
        if let Some(name) = sync.config_dir_name {
            builder = builder.config_dir_name(name);
        }
        if let Some(name) = sync.settings_filename {
            builder = builder.settings_filename(name);
        }

        let defaults = RetryConfig::default();
        let retry = self.retry;
        builder = builder.retry(RetryConfig {
            max_attempts: retry.max_attempts.unwrap_or(defaults.max_attempts),
            initial_delay: retry
                .initial_delay_seconds
                .map(seconds)
                .unwrap_or(defaults.initial_delay),
            max_delay: retry
                .max_delay_seconds
                .map(seconds)
                .unwrap_or(defaults.max_delay),
            jitter: retry.jitter.unwrap_or(defaults.jitter),
            rate_limit_floor: retry
                .rate_limit_floor_seconds
                .map(seconds)
                .unwrap_or(defaults.rate_limit_floor),
        });

        let mut logging = LoggingConfig::default();
        if let Some(level) = self.logging.level {
            logging = logging.with_level(level);
        }
        if let Some(format) = self.logging.format {
            logging = logging.with_format(format);
        }
        if let Some(filter) = self.logging.filter {
            logging = logging.with_filter(filter);
        }
        builder.logging(logging)
    }
}
