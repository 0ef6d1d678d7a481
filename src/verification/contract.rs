//! Session contracts: what a session promised before execution started.
//!
//! The JSON field names are an on-disk format and must not change.

use crate::protocol::{DeliverableKind, InstructionProtocol};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContract {
    pub session_id: String,
    pub planned_deliverables: Vec<PlannedDeliverable>,
    pub required_evidence: Vec<RequiredEvidence>,
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedDeliverable {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DeliverableKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceKind {
    Build,
    Compile,
    Test,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredEvidence {
    #[serde(rename = "type")]
    pub kind: EvidenceKind,
    pub description: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptanceCriterion {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_result: Option<String>,
}

/// Commands attached to every new contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckCommands {
    pub build: String,
    pub compile: String,
    pub test: String,
}

const DELIVERABLE_VERBS: &[&str] = &["create", "implement", "fix"];

impl SessionContract {
    /// Derive a contract from the session's planned instructions.
    ///
    /// Explicit deliverables are carried over (documentation is optional). Requirements that
    /// mention create, implement or fix become required, path-less deliverables.
    pub fn from_instructions(
        session_id: &str,
        instructions: &[InstructionProtocol],
        commands: &CheckCommands,
    ) -> Self {
        let mut planned = Vec::new();
        for instruction in instructions {
            for deliverable in &instruction.deliverables {
                planned.push(PlannedDeliverable {
                    id: format!("del-{}", planned.len() + 1),
                    kind: deliverable.kind,
                    description: deliverable.description.clone(),
                    path: deliverable.path.as_deref().map(normalize_deliverable_path),
                    required: deliverable.kind != DeliverableKind::Documentation,
                });
            }
            for requirement in &instruction.requirements {
                let lower = requirement.description.to_lowercase();
                if !DELIVERABLE_VERBS.iter().any(|verb| lower.contains(verb)) {
                    continue;
                }
                let kind = if lower.contains("fix") {
                    DeliverableKind::Fix
                } else {
                    DeliverableKind::Feature
                };
                planned.push(PlannedDeliverable {
                    id: format!("del-{}", planned.len() + 1),
                    kind,
                    description: requirement.description.clone(),
                    path: None,
                    required: true,
                });
            }
        }

        Self {
            session_id: session_id.to_string(),
            planned_deliverables: planned,
            required_evidence: vec![
                RequiredEvidence {
                    kind: EvidenceKind::Build,
                    description: "Build succeeds".to_string(),
                    command: commands.build.clone(),
                    expected_result: None,
                },
                RequiredEvidence {
                    kind: EvidenceKind::Compile,
                    description: "No compile errors".to_string(),
                    command: commands.compile.clone(),
                    expected_result: None,
                },
            ],
            acceptance_criteria: vec![AcceptanceCriterion {
                id: "ac-1".to_string(),
                description: "Tests pass".to_string(),
                command: Some(commands.test.clone()),
                expected_result: None,
            }],
        }
    }

    pub fn required_deliverables(&self) -> impl Iterator<Item = &PlannedDeliverable> {
        self.planned_deliverables.iter().filter(|d| d.required)
    }

    /// Paths the session is expected to touch.
    pub fn planned_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .planned_deliverables
            .iter()
            .filter_map(|d| d.path.clone())
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// blake3 of the canonical JSON encoding, hex.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(blake3::hash(&bytes).as_bytes())
    }
}

/// NFC, forward slashes, no leading `./`, no trailing slash.
pub fn normalize_deliverable_path(path: &str) -> String {
    let normalized: String = path.trim().nfc().collect();
    let mut result = normalized.replace('\\', "/");
    while let Some(rest) = result.strip_prefix("./") {
        result = rest.to_string();
    }
    while result.len() > 1 && result.ends_with('/') {
        result.pop();
    }
    result
}

/// The normalized path as a workspace-relative path, or `None` when it could leave the workspace.
pub fn workspace_relative(normalized: &str) -> Option<&Path> {
    let path = Path::new(normalized);
    let inside = !normalized.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    inside.then_some(path)
}
