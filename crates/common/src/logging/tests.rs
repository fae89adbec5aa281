//! Unit tests for the logging subsystem.

use std::path::PathBuf;

use tracing_appender::rolling::Rotation;

use super::{format_service_name, service::*, types::*};

fn init_config<'a>(log_dir: Option<&'a PathBuf>) -> LoggingInitConfig<'a> {
    LoggingInitConfig {
        service_base_name: "pegind",
        service_label: None,
        service_version: None,
        log_dir,
        log_file_prefix: None,
        json_format: None,
        default_log_prefix: "pegin",
    }
}

#[test]
fn test_logger_config_builder_pattern() {
    let config = LoggerConfig::new("test-service".to_string())
        .with_service_version("2.0.0".to_string())
        .with_json_logging(true);

    assert_eq!(config.service_name, "test-service");
    assert_eq!(config.service_version, Some("2.0.0".to_string()));
    assert!(config.stdout_config.json_format);
    assert!(config.file_logging_config.is_none());
}

#[test]
fn test_file_logging_defaults() {
    let config = FileLoggingConfig::new(PathBuf::from("/var/log/pegind"), "pegind".to_string());
    assert_eq!(config.rotation, Rotation::DAILY);
    assert!(!config.json_format);

    let config = config
        .with_rotation(Rotation::HOURLY)
        .with_json_format(true);
    assert_eq!(config.rotation, Rotation::HOURLY);
    assert!(config.json_format);
}

#[test]
fn test_format_service_name() {
    assert_eq!(format_service_name("pegind", None), "pegind");
    assert_eq!(format_service_name("pegind", Some("regtest")), "pegind%regtest");
}

#[test]
fn test_init_config_without_log_dir() {
    let mut init = init_config(None);
    init.json_format = Some(true);
    let config = logger_config(&init);

    assert!(config.stdout_config.json_format);
    assert!(
        config.file_logging_config.is_none(),
        "file logging stays off without a directory"
    );
}

#[test]
fn test_init_config_with_log_dir() {
    let dir = PathBuf::from("/tmp/logs");
    let mut init = init_config(Some(&dir));
    init.service_label = Some("signet");
    let config = logger_config(&init);

    assert_eq!(config.service_name, "pegind%signet");
    let file = config.file_logging_config.expect("file logging enabled");
    assert_eq!(file.directory, dir);
    assert_eq!(file.file_name_prefix, "pegin", "prefix falls back to the default");
    assert!(!file.json_format);
}
