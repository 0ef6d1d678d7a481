//! Configuration System
//!
//! Hierarchical configuration loaded through the `config` crate: built-in defaults, the
//! global config file, workspace config files, then `CONDUCTOR__` environment variables.
//! Every section carries serde defaults so an empty source yields a working configuration.

use crate::boundary::MonitorConfig;
use crate::logging::{validate_logging_config, LoggingConfig};
use crate::queue::QueueConfig;
use crate::recovery::RecoveryConfig;
use crate::verification::VerificationConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;
pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// Workspace root path (defaults to current directory)
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub verification: VerificationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Queue(String),
    Monitor(String),
    Recovery(String),
    Verification(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Queue(msg) => write!(f, "Queue: {}", msg),
            ValidationError::Monitor(msg) => write!(f, "Monitor: {}", msg),
            ValidationError::Recovery(msg) => write!(f, "Recovery: {}", msg),
            ValidationError::Verification(msg) => write!(f, "Verification: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl ConductorConfig {
    /// Validate the entire configuration, collecting every problem.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.queue.max_size == 0 {
            errors.push(ValidationError::Queue("max_size must be positive".to_string()));
        }
        if self.queue.history_size == 0 {
            errors.push(ValidationError::Queue(
                "history_size must be positive".to_string(),
            ));
        }

        if self.monitor.max_activities == 0 {
            errors.push(ValidationError::Monitor(
                "max_activities must be positive".to_string(),
            ));
        }
        let endpoints = self
            .monitor
            .planning_endpoints
            .iter()
            .chain(self.monitor.execution_endpoints.iter());
        for endpoint in endpoints {
            if endpoint.trim().is_empty() {
                errors.push(ValidationError::Monitor(
                    "endpoint prefixes cannot be empty".to_string(),
                ));
            } else if !endpoint.starts_with('/') {
                errors.push(ValidationError::Monitor(format!(
                    "endpoint prefix '{}' must start with '/'",
                    endpoint
                )));
            }
        }

        if self.recovery.history_size == 0 {
            errors.push(ValidationError::Recovery(
                "history_size must be positive".to_string(),
            ));
        }
        if self.recovery.circuit.failure_threshold == 0 {
            errors.push(ValidationError::Recovery(
                "circuit.failure_threshold must be positive".to_string(),
            ));
        }
        if self.recovery.circuit.half_open_requests == 0 {
            errors.push(ValidationError::Recovery(
                "circuit.half_open_requests must be positive".to_string(),
            ));
        }
        for (code, retry) in &self.recovery.retry_overrides {
            if retry.max_attempts == 0 {
                errors.push(ValidationError::Recovery(format!(
                    "{}: max_attempts must be positive",
                    code
                )));
            }
            if retry.initial_delay_ms > retry.max_delay_ms {
                errors.push(ValidationError::Recovery(format!(
                    "{}: initial_delay_ms {} exceeds max_delay_ms {}",
                    code, retry.initial_delay_ms, retry.max_delay_ms
                )));
            }
        }

        let verification = &self.verification;
        if verification.min_score > 100 {
            errors.push(ValidationError::Verification(format!(
                "min_score {} exceeds 100",
                verification.min_score
            )));
        }
        if verification.command_timeout_secs == 0 {
            errors.push(ValidationError::Verification(
                "command_timeout_secs must be positive".to_string(),
            ));
        }
        for (name, command) in [
            ("build_command", &verification.build_command),
            ("compile_command", &verification.compile_command),
            ("test_command", &verification.test_command),
        ] {
            if command.trim().is_empty() {
                errors.push(ValidationError::Verification(format!(
                    "{} cannot be empty",
                    name
                )));
            }
        }

        if let Err(e) = validate_logging_config(&self.logging) {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
