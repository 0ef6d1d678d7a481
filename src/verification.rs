//! Session Verification Engine
//!
//! A session's contract is written before execution; after execution the engine measures
//! the reported result against it and scores the session:
//!
//! `score = round(40 * deliverables + 30 * evidence + 30 * criteria)`
//!
//! A session is verified only when the score is at least 80 and no required deliverable is
//! missing. Measurement never fails; the gates in [`gates`] turn results into refusals.

pub mod changes;
pub mod contract;
pub mod evidence;
pub mod gates;
pub mod report;
pub mod store;

use crate::error::OrchestratorError;
use crate::protocol::{DeliverableKind, ExecutionResult, ExecutionStatus, InstructionProtocol, Session};
use crate::types::{now, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use changes::{ChangeSource, GitChangeSource, StaticChangeSource};
pub use contract::{CheckCommands, EvidenceKind, PlannedDeliverable, SessionContract};
pub use evidence::{EvidenceRunner, ShellEvidenceRunner, StaticEvidenceRunner};
pub use gates::{GateKind, VerificationGates};
pub use store::ContractStore;

use contract::{normalize_deliverable_path, workspace_relative};
use evidence::run_check;

/// Minimum score for `verified`
pub const VERIFIED_THRESHOLD: u8 = 80;

const DOCUMENTATION_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "rst", "adoc"];

fn default_strict() -> bool {
    true
}

fn default_min_score() -> u8 {
    VERIFIED_THRESHOLD
}

fn default_build_command() -> String {
    "cargo build".to_string()
}

fn default_compile_command() -> String {
    "cargo check".to_string()
}

fn default_test_command() -> String {
    "cargo test".to_string()
}

fn default_command_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Defaults to `<workspace>/.conductor/contracts`
    #[serde(default)]
    pub contracts_dir: Option<PathBuf>,

    /// In strict mode an unverified session cannot be completed
    #[serde(default = "default_strict")]
    pub strict: bool,

    /// Quality gate threshold
    #[serde(default = "default_min_score")]
    pub min_score: u8,

    #[serde(default = "default_build_command")]
    pub build_command: String,

    #[serde(default = "default_compile_command")]
    pub compile_command: String,

    #[serde(default = "default_test_command")]
    pub test_command: String,

    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            contracts_dir: None,
            strict: default_strict(),
            min_score: default_min_score(),
            build_command: default_build_command(),
            compile_command: default_compile_command(),
            test_command: default_test_command(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl VerificationConfig {
    pub fn check_commands(&self) -> CheckCommands {
        CheckCommands {
            build: self.build_command.clone(),
            compile: self.compile_command.clone(),
            test: self.test_command.clone(),
        }
    }

    pub fn contracts_dir_for(&self, workspace: &Path) -> PathBuf {
        self.contracts_dir
            .clone()
            .unwrap_or_else(|| store::workspace_contracts_dir(workspace))
    }
}

/// One verification attempt. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub session_id: String,
    pub verified: bool,
    pub evidence_found: Vec<String>,
    pub missing_deliverables: Vec<String>,
    pub unexpected_changes: Vec<String>,
    pub verification_score: u8,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub failed_evidence: Vec<String>,
    #[serde(default)]
    pub failed_criteria: Vec<String>,
}

/// `40 * deliverables + 30 * evidence + 30 * criteria`, each a ratio in 0..=1.
pub fn weighted_score(deliverables: f64, evidence: f64, criteria: f64) -> u8 {
    let score = 40.0 * deliverables + 30.0 * evidence + 30.0 * criteria;
    score.round().clamp(0.0, 100.0) as u8
}

fn ratio(passed: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        passed as f64 / total as f64
    }
}

/// Documentation never satisfies a code deliverable.
pub fn is_documentation_path(path: &str) -> bool {
    let path = normalize_deliverable_path(path);
    if path.starts_with("docs/") || path.contains("/docs/") {
        return true;
    }
    let file = path.rsplit('/').next().unwrap_or(&path);
    if file.to_ascii_uppercase().starts_with("README") {
        return true;
    }
    Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| DOCUMENTATION_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

pub struct VerificationEngine {
    workspace: PathBuf,
    config: VerificationConfig,
    store: ContractStore,
    contracts: RwLock<HashMap<String, SessionContract>>,
    history: RwLock<HashMap<String, Vec<VerificationResult>>>,
    last_execution: RwLock<HashMap<String, ExecutionResult>>,
    runner: Arc<dyn EvidenceRunner>,
    changes: Arc<dyn ChangeSource>,
}

impl VerificationEngine {
    pub fn new(workspace: impl Into<PathBuf>, config: VerificationConfig) -> Self {
        let workspace = workspace.into();
        let store = ContractStore::new(config.contracts_dir_for(&workspace));
        Self {
            workspace,
            config,
            store,
            contracts: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            last_execution: RwLock::new(HashMap::new()),
            runner: Arc::new(ShellEvidenceRunner),
            changes: Arc::new(GitChangeSource),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn EvidenceRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_change_source(mut self, changes: Arc<dyn ChangeSource>) -> Self {
        self.changes = changes;
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    pub fn store(&self) -> &ContractStore {
        &self.store
    }

    /// Write the session's contract before execution. A session gets exactly one contract.
    pub fn create_session_contract(
        &self,
        session: &Session,
        instructions: &[InstructionProtocol],
    ) -> Result<SessionContract, OrchestratorError> {
        if self.contracts.read().contains_key(&session.id) || self.store.exists(&session.id) {
            return Err(OrchestratorError::ContractExists(session.id.clone()));
        }
        let contract = SessionContract::from_instructions(
            &session.id,
            instructions,
            &self.config.check_commands(),
        );
        let path = self.store.create(&contract)?;
        info!(
            session_id = %session.id,
            deliverables = contract.planned_deliverables.len(),
            path = %path.display(),
            "Session contract created"
        );
        self.contracts
            .write()
            .insert(session.id.clone(), contract.clone());
        Ok(contract)
    }

    /// Drop a contract whose session never got queued.
    pub(crate) fn discard_session_contract(&self, session_id: &str) -> Result<(), OrchestratorError> {
        self.contracts.write().remove(session_id);
        self.store.remove(session_id)?;
        warn!(session_id, "Session contract discarded");
        Ok(())
    }

    /// Cached contract, falling back to the durable copy.
    pub fn contract(&self, session_id: &str) -> Result<Option<SessionContract>, OrchestratorError> {
        if let Some(contract) = self.contracts.read().get(session_id) {
            return Ok(Some(contract.clone()));
        }
        let loaded = self.store.load(session_id)?;
        if let Some(contract) = &loaded {
            self.contracts
                .write()
                .insert(session_id.to_string(), contract.clone());
        }
        Ok(loaded)
    }

    /// Whether a planned deliverable was delivered.
    ///
    /// A path deliverable is satisfied when that path is reported created or modified, or
    /// exists in the workspace. Absolute paths and paths with `..` never match on disk. A path-less one needs a non-failed run that delivered at least
    /// one non-documentation file.
    pub fn verify_deliverable(&self, deliverable: &PlannedDeliverable, result: &ExecutionResult) -> bool {
        match &deliverable.path {
            Some(path) => {
                let expected = normalize_deliverable_path(path);
                let reported = result.deliverables.iter().any(|d| {
                    d.status.is_delivered() && normalize_deliverable_path(&d.path) == expected
                });
                reported
                    || workspace_relative(&expected)
                        .is_some_and(|relative| self.workspace.join(relative).exists())
            }
            None => {
                result.status != ExecutionStatus::Failure
                    && deliverable.kind != DeliverableKind::Documentation
                    && result
                        .deliverables
                        .iter()
                        .any(|d| d.status.is_delivered() && !is_documentation_path(&d.path))
            }
        }
    }

    /// Measure an execution result against the session's contract. Never fails.
    pub async fn verify_session(&self, session_id: &str, result: &ExecutionResult) -> VerificationResult {
        self.last_execution
            .write()
            .insert(session_id.to_string(), result.clone());

        let contract = match self.contract(session_id) {
            Ok(Some(contract)) => contract,
            Ok(None) => return self.record_missing_contract(session_id, "no contract on record"),
            Err(err) => return self.record_missing_contract(session_id, &err.to_string()),
        };

        let required: Vec<&PlannedDeliverable> = contract.required_deliverables().collect();
        let missing: Vec<String> = required
            .iter()
            .filter(|d| !self.verify_deliverable(d, result))
            .map(|d| d.description.clone())
            .collect();
        let deliverable_ratio = ratio(required.len() - missing.len(), required.len());

        let timeout = Duration::from_secs(self.config.command_timeout_secs.max(1));
        let mut evidence_found = Vec::new();
        let mut failed_evidence = Vec::new();
        for evidence in &contract.required_evidence {
            let (passed, detail) = run_check(
                self.runner.as_ref(),
                &evidence.command,
                evidence.expected_result.as_deref(),
                &self.workspace,
                timeout,
            )
            .await;
            if passed {
                evidence_found.push(evidence.description.clone());
            } else {
                failed_evidence.push(format!("{}: {}", evidence.description, detail));
            }
        }
        let evidence_ratio = ratio(evidence_found.len(), contract.required_evidence.len());

        let mut failed_criteria = Vec::new();
        for criterion in &contract.acceptance_criteria {
            let passed = match &criterion.command {
                Some(command) => {
                    let (passed, detail) = run_check(
                        self.runner.as_ref(),
                        command,
                        criterion.expected_result.as_deref(),
                        &self.workspace,
                        timeout,
                    )
                    .await;
                    if !passed {
                        failed_criteria.push(format!("{}: {}", criterion.description, detail));
                    }
                    passed
                }
                None => {
                    let passed = result.status == ExecutionStatus::Success;
                    if !passed {
                        failed_criteria.push(format!(
                            "{}: execution did not succeed",
                            criterion.description
                        ));
                    }
                    passed
                }
            };
            if passed {
                evidence_found.push(criterion.description.clone());
            }
        }
        let criteria_ratio = ratio(
            contract.acceptance_criteria.len() - failed_criteria.len(),
            contract.acceptance_criteria.len(),
        );

        let unexpected = match self.changes.changed_files(&self.workspace).await {
            Ok(changed) => changes::unexpected_changes(&changed, &contract.planned_paths()),
            Err(err) => {
                warn!(session_id, error = %err, "Changed files unavailable");
                Vec::new()
            }
        };

        let score = weighted_score(deliverable_ratio, evidence_ratio, criteria_ratio);
        let verification = VerificationResult {
            session_id: session_id.to_string(),
            verified: score >= VERIFIED_THRESHOLD && missing.is_empty(),
            evidence_found,
            missing_deliverables: missing,
            unexpected_changes: unexpected,
            verification_score: score,
            timestamp: now(),
            failed_evidence,
            failed_criteria,
        };
        self.record(verification)
    }

    fn record_missing_contract(&self, session_id: &str, reason: &str) -> VerificationResult {
        warn!(session_id, reason, "Verification without a session contract");
        self.record(VerificationResult {
            session_id: session_id.to_string(),
            verified: false,
            evidence_found: Vec::new(),
            missing_deliverables: vec!["session contract".to_string()],
            unexpected_changes: Vec::new(),
            verification_score: 0,
            timestamp: now(),
            failed_evidence: Vec::new(),
            failed_criteria: Vec::new(),
        })
    }

    fn record(&self, result: VerificationResult) -> VerificationResult {
        info!(
            session_id = %result.session_id,
            verified = result.verified,
            score = result.verification_score,
            missing = result.missing_deliverables.len(),
            unexpected = result.unexpected_changes.len(),
            "Session verified"
        );
        self.history
            .write()
            .entry(result.session_id.clone())
            .or_default()
            .push(result.clone());
        result
    }

    /// Verify again against the last execution result seen for the session.
    pub async fn reverify(&self, session_id: &str) -> Result<VerificationResult, OrchestratorError> {
        let last = self
            .last_execution
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::ExecutionResultMissing(session_id.to_string()))?;
        Ok(self.verify_session(session_id, &last).await)
    }

    pub fn has_execution_result(&self, session_id: &str) -> bool {
        self.last_execution.read().contains_key(session_id)
    }

    /// The authoritative result for gating.
    pub fn latest_result(&self, session_id: &str) -> Option<VerificationResult> {
        self.history
            .read()
            .get(session_id)
            .and_then(|results| results.last().cloned())
    }

    /// Every result for the session, oldest first.
    pub fn history(&self, session_id: &str) -> Vec<VerificationResult> {
        self.history
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn generate_report(&self, session_id: &str) -> String {
        let contract = self.contract(session_id).ok().flatten();
        let latest = self.latest_result(session_id);
        report::render_report(session_id, contract.as_ref(), latest.as_ref())
    }
}
