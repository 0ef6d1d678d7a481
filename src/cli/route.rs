//! CLI route: single route table and run context. Dispatches to core components and presentation.

use crate::boundary::{ActorType, BoundaryEnforcer};
use crate::cli::command_name;
use crate::cli::parse::{CheckCommands, Commands, ContractCommands, GateCommands};
use crate::cli::presentation::{
    format_classification, format_config, format_contract, format_contract_list,
    format_content_check, format_verification,
};
use crate::config::{ConductorConfig, ConfigLoader};
use crate::error::{OrchestratorError, StorageError};
use crate::protocol::{ExecutionResult, InstructionProtocol, Session};
use crate::recovery::{ErrorContext, ErrorHandler, RawError, SystemError};
use crate::verification::{VerificationEngine, VerificationGates};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runtime context for CLI execution: workspace, configuration and the core components.
pub struct RunContext {
    workspace_root: PathBuf,
    config: ConductorConfig,
    engine: Arc<VerificationEngine>,
    runtime: tokio::runtime::Runtime,
}

impl RunContext {
    /// Create a run context from the workspace root and an optional config path.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, OrchestratorError> {
        let workspace_root = dunce::canonicalize(&workspace_root).unwrap_or(workspace_root);
        let config = match &config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        config.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            OrchestratorError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            ))
        })?;

        let engine = Arc::new(VerificationEngine::new(
            workspace_root.clone(),
            config.verification.clone(),
        ));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            workspace_root,
            config,
            engine,
            runtime,
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<String, OrchestratorError> {
        let name = command_name(command);
        let started = Instant::now();
        debug!(command = %name, "Command started");
        let result = self.execute_inner(command);
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(command = %name, duration_ms, "Command finished"),
            Err(e) => warn!(command = %name, duration_ms, error = %e, "Command failed"),
        }
        result
    }

    fn execute_inner(&self, command: &Commands) -> Result<String, OrchestratorError> {
        match command {
            Commands::Contract { command } => self.handle_contract(command),
            Commands::Verify {
                session,
                result,
                format,
            } => {
                let result: ExecutionResult = read_json(result)?;
                let verification = self
                    .runtime
                    .block_on(self.engine.verify_session(session, &result));
                format_verification(&verification, format)
            }
            Commands::Gate { command } => self.handle_gate(command),
            Commands::Check { command } => self.handle_check(command),
            Commands::ClassifyError {
                message,
                code,
                format,
            } => {
                let mut raw = RawError::new(message.clone());
                if let Some(code) = code {
                    raw = raw.with_code(code.clone());
                }
                let error = SystemError::classify(&raw, ErrorContext::new().operation("cli"));
                let handler = ErrorHandler::new(self.config.recovery.clone());
                let profile = handler.retry_config_for(error.code);
                format_classification(&error, profile.as_ref(), format)
            }
            Commands::Status { format } => format_config(&self.config, format),
        }
    }

    fn handle_contract(&self, command: &ContractCommands) -> Result<String, OrchestratorError> {
        match command {
            ContractCommands::Create {
                session,
                instructions,
            } => {
                let instructions: Vec<InstructionProtocol> = read_json(instructions)?;
                let enforcer = BoundaryEnforcer::default();
                for instruction in &instructions {
                    enforcer.validate_content(&instruction.planning_text(), ActorType::Planning)?;
                }
                let contract = self
                    .engine
                    .create_session_contract(&Session::new(session.clone()), &instructions)?;
                Ok(format!(
                    "Contract created for {} ({} deliverables)\n  Path: {}",
                    contract.session_id,
                    contract.planned_deliverables.len(),
                    self.engine.store().path_for(session).display()
                ))
            }
            ContractCommands::Show { session, format } => {
                let contract = self
                    .engine
                    .contract(session)?
                    .ok_or_else(|| OrchestratorError::ContractNotFound(session.clone()))?;
                format_contract(&contract, format)
            }
            ContractCommands::List { format } => {
                let contracts = self.engine.store().list()?;
                format_contract_list(&contracts, format)
            }
        }
    }

    fn handle_gate(&self, command: &GateCommands) -> Result<String, OrchestratorError> {
        let gates = VerificationGates::new(self.engine.clone());
        match command {
            GateCommands::Deploy { session, result } => {
                let result: ExecutionResult = read_json(result)?;
                self.runtime
                    .block_on(self.engine.verify_session(session, &result));
                gates.pre_deployment_gate(session)?;
                Ok(format!("Deployment allowed for session {}", session))
            }
            GateCommands::Quality {
                session,
                result,
                min_score,
            } => {
                let result: ExecutionResult = read_json(result)?;
                self.runtime
                    .block_on(self.engine.verify_session(session, &result));
                let score = gates.quality_gate(session, *min_score)?;
                Ok(format!(
                    "Quality gate passed for session {} (score {}/100)\n\n{}",
                    session,
                    score,
                    self.engine.generate_report(session)
                ))
            }
        }
    }

    fn handle_check(&self, command: &CheckCommands) -> Result<String, OrchestratorError> {
        match command {
            CheckCommands::Content { actor, file } => {
                let actor_type: ActorType = actor
                    .parse()
                    .map_err(OrchestratorError::ConfigError)?;
                let text = std::fs::read_to_string(file).map_err(StorageError::from)?;
                let enforcer = BoundaryEnforcer::default();
                let rendered = format_content_check(
                    actor_type,
                    &crate::boundary::classify_content(&text),
                );
                enforcer.validate_content(&text, actor_type)?;
                Ok(rendered)
            }
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, OrchestratorError> {
    let raw = std::fs::read(path).map_err(StorageError::from)?;
    serde_json::from_slice(&raw).map_err(|e| StorageError::Serialization(e).into())
}
