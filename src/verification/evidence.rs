//! Evidence checks: external commands whose exit status (or output) proves a claim.

use crate::error::OrchestratorError;
use crate::verification::contract::EvidenceKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const DETAIL_CHARS: usize = 400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs check commands on behalf of the verification engine.
#[async_trait]
pub trait EvidenceRunner: Send + Sync {
    async fn run(&self, command: &str, workdir: &Path) -> Result<CommandOutput, OrchestratorError>;
}

/// Runs each command through `sh -c` in the workspace.
#[derive(Debug, Clone, Default)]
pub struct ShellEvidenceRunner;

#[async_trait]
impl EvidenceRunner for ShellEvidenceRunner {
    async fn run(&self, command: &str, workdir: &Path) -> Result<CommandOutput, OrchestratorError> {
        debug!(command, workdir = %workdir.display(), "Running evidence command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OrchestratorError::ExternalCommand(format!("{}: {}", command, e)))?;
        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Canned outputs keyed by command; unknown commands fail with exit code 127.
#[derive(Debug, Clone, Default)]
pub struct StaticEvidenceRunner {
    outputs: HashMap<String, CommandOutput>,
}

impl StaticEvidenceRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exit(mut self, command: &str, exit_code: i32) -> Self {
        self.outputs.insert(
            command.to_string(),
            CommandOutput {
                exit_code: Some(exit_code),
                stdout: String::new(),
                stderr: String::new(),
            },
        );
        self
    }

    pub fn with_output(mut self, command: &str, exit_code: i32, stdout: &str) -> Self {
        self.outputs.insert(
            command.to_string(),
            CommandOutput {
                exit_code: Some(exit_code),
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
        self
    }
}

#[async_trait]
impl EvidenceRunner for StaticEvidenceRunner {
    async fn run(&self, command: &str, _workdir: &Path) -> Result<CommandOutput, OrchestratorError> {
        Ok(self.outputs.get(command).cloned().unwrap_or(CommandOutput {
            exit_code: Some(127),
            stdout: String::new(),
            stderr: format!("{}: command not found", command),
        }))
    }
}

/// Outcome of one evidence or acceptance check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    #[serde(rename = "type")]
    pub kind: EvidenceKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub passed: bool,
    pub detail: String,
}

/// Run one check. Never fails: spawn errors and timeouts count as a failed check.
///
/// With `expected` set, the check passes when the output contains it; otherwise exit code 0 passes.
pub async fn run_check(
    runner: &dyn EvidenceRunner,
    command: &str,
    expected: Option<&str>,
    workdir: &Path,
    timeout: Duration,
) -> (bool, String) {
    match tokio::time::timeout(timeout, runner.run(command, workdir)).await {
        Err(_) => (false, format!("timed out after {}s", timeout.as_secs())),
        Ok(Err(err)) => (false, err.to_string()),
        Ok(Ok(output)) => {
            let passed = match expected {
                Some(needle) => output.stdout.contains(needle) || output.stderr.contains(needle),
                None => output.success(),
            };
            let detail = if passed {
                format!("exit {}", exit_label(output.exit_code))
            } else {
                let tail = if output.stderr.trim().is_empty() {
                    &output.stdout
                } else {
                    &output.stderr
                };
                let tail: String = tail.trim().chars().take(DETAIL_CHARS).collect();
                format!("exit {}: {}", exit_label(output.exit_code), tail)
            };
            (passed, detail)
        }
    }
}

fn exit_label(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string())
}
