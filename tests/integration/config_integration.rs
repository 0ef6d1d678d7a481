//! Layered configuration: workspace files over defaults

use conductor::config::{ConductorConfig, ConfigLoader};
use conductor::recovery::{BackoffStrategy, ErrorCode, ErrorHandler};
use std::fs;
use tempfile::TempDir;

const WORKSPACE_CONFIG: &str = r#"
[queue]
max_size = 50
default_priority = 3

[verification]
strict = false
min_score = 70
test_command = "make test"

[recovery.retry_overrides.TIMEOUT_ERROR]
max_attempts = 5
initial_delay_ms = 250
max_delay_ms = 4000
strategy = "linear"

[logging]
level = "debug"
"#;

#[test]
fn test_workspace_file_overrides_defaults() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("config")).unwrap();
    fs::write(temp.path().join("config/config.toml"), WORKSPACE_CONFIG).unwrap();

    let config = ConfigLoader::load(temp.path()).unwrap();
    assert_eq!(config.queue.max_size, 50);
    assert_eq!(config.queue.default_priority, 3);
    assert_eq!(config.queue.default_max_retries, 3);
    assert!(!config.verification.strict);
    assert_eq!(config.verification.min_score, 70);
    assert_eq!(config.verification.test_command, "make test");
    assert_eq!(config.verification.build_command, "cargo build");
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.workspace_root.as_deref(), Some(temp.path()));
    assert!(config.validate().is_ok());

    let handler = ErrorHandler::new(config.recovery.clone());
    let timeout = handler.retry_config_for(ErrorCode::TimeoutError).unwrap();
    assert_eq!(timeout.max_attempts, 5);
    assert_eq!(timeout.strategy, BackoffStrategy::Linear);
    assert_eq!(timeout.base_delay_ms(3), 750);
}

#[test]
fn test_empty_workspace_yields_defaults() {
    let temp = TempDir::new().unwrap();
    let config = ConfigLoader::load(temp.path()).unwrap();
    let defaults = ConductorConfig::default();
    assert_eq!(config.queue, defaults.queue);
    assert_eq!(config.verification.min_score, 80);
    assert!(config.validate().is_ok());
}

#[test]
fn test_explicit_file_is_validated() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("conductor.toml");
    fs::write(&path, "[queue]\nmax_size = 0\n\n[verification]\nmin_score = 120\n").unwrap();

    let config = ConfigLoader::load_from_file(&path).unwrap();
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().any(|e| e.to_string().starts_with("Queue:")));
    assert!(errors.iter().any(|e| e.to_string().starts_with("Verification:")));
}
