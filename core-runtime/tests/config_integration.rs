//! Integration tests for configuration loading and logging helpers

use core_runtime::config::CoreConfig;
use core_runtime::logging::{redact_if_sensitive, strip_path, LogFormat, LogLevel, LoggingConfig};
use std::io::Write;
use std::time::Duration;

#[test]
fn test_load_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let sync_root = dir.path().join("Purse");
    let data_dir = dir.path().join("data");

    let path = dir.path().join("purse.yml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        "data_dir: {}\nsync:\n  root: {}\n  timeout_seconds: 300\nlogging:\n  level: warn",
        data_dir.display(),
        sync_root.display()
    )
    .unwrap();

    let config = CoreConfig::from_yaml_file(&path).unwrap();

    assert_eq!(config.sync_root, sync_root);
    assert_eq!(config.sync_timeout, Some(Duration::from_secs(300)));
    assert_eq!(config.logging.level, LogLevel::Warn);
    assert_eq!(
        config.conflict_log_path(),
        data_dir.join("logs").join("sync_actions.log")
    );
}

#[test]
fn test_missing_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = CoreConfig::from_yaml_file(dir.path().join("absent.yml")).unwrap_err();
    assert!(err.to_string().contains("Cannot read configuration"));
}

#[test]
fn test_yaml_without_sync_root_fails() {
    let err = CoreConfig::from_yaml_str("data_dir: /tmp/data\n").unwrap_err();
    assert!(err.to_string().contains("Sync root is required"));
}

#[test]
fn test_logging_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_spans(false)
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
}

#[test]
fn test_privacy_helpers() {
    assert_eq!(redact_if_sensitive("authorization", "Bearer abc"), "[REDACTED]");
    assert_eq!(strip_path("/Users/me/Purse/journal/2024.md"), "2024.md");
}
