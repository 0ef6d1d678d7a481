//! Changed-file discovery for unexpected-change detection.

use crate::error::OrchestratorError;
use crate::verification::contract::normalize_deliverable_path;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Internal state directory; never reported as an unexpected change.
pub const STATE_DIR: &str = ".conductor/";

#[async_trait]
pub trait ChangeSource: Send + Sync {
    async fn changed_files(&self, workspace: &Path) -> Result<Vec<String>, OrchestratorError>;
}

/// Reads `git status --porcelain` in the workspace.
#[derive(Debug, Clone, Default)]
pub struct GitChangeSource;

#[async_trait]
impl ChangeSource for GitChangeSource {
    async fn changed_files(&self, workspace: &Path) -> Result<Vec<String>, OrchestratorError> {
        let output = Command::new("git")
            .args(["status", "--porcelain=v1", "-uall"])
            .current_dir(workspace)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OrchestratorError::ExternalCommand(format!("git status: {}", e)))?;
        if !output.status.success() {
            return Err(OrchestratorError::ExternalCommand(format!(
                "git status failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let files = parse_porcelain(&stdout);
        debug!(changed = files.len(), "Changed files collected");
        Ok(files)
    }
}

/// Fixed list of changed files.
#[derive(Debug, Clone, Default)]
pub struct StaticChangeSource {
    files: Vec<String>,
}

impl StaticChangeSource {
    pub fn new<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            files: files.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ChangeSource for StaticChangeSource {
    async fn changed_files(&self, _workspace: &Path) -> Result<Vec<String>, OrchestratorError> {
        Ok(self.files.clone())
    }
}

/// Paths from porcelain v1 output. Renames report the new path.
pub fn parse_porcelain(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let path = &line[3..];
            let path = path.rsplit(" -> ").next().unwrap_or(path);
            normalize_deliverable_path(path.trim_matches('"'))
        })
        .collect()
}

/// Changed files that no planned deliverable accounts for, sorted and deduplicated.
pub fn unexpected_changes(changed: &[String], planned: &[String]) -> Vec<String> {
    let planned: BTreeSet<String> = planned
        .iter()
        .map(|p| normalize_deliverable_path(p))
        .collect();
    changed
        .iter()
        .map(|p| normalize_deliverable_path(p))
        .filter(|p| !p.starts_with(STATE_DIR))
        .filter(|p| {
            !planned
                .iter()
                .any(|planned| p == planned || p.starts_with(&format!("{}/", planned)))
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
