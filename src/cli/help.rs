//! CLI command-name contract for logging.

use crate::cli::parse::{CheckCommands, Commands, ContractCommands, GateCommands};

/// Dotted command name (e.g. "contract.create", "gate.deploy").
pub fn command_name(command: &Commands) -> String {
    match command {
        Commands::Contract { command } => format!("contract.{}", contract_command_name(command)),
        Commands::Verify { .. } => "verify".to_string(),
        Commands::Gate { command } => format!("gate.{}", gate_command_name(command)),
        Commands::Check { command } => format!("check.{}", check_command_name(command)),
        Commands::ClassifyError { .. } => "classify_error".to_string(),
        Commands::Status { .. } => "status".to_string(),
    }
}

fn contract_command_name(command: &ContractCommands) -> &'static str {
    match command {
        ContractCommands::Create { .. } => "create",
        ContractCommands::Show { .. } => "show",
        ContractCommands::List { .. } => "list",
    }
}

fn gate_command_name(command: &GateCommands) -> &'static str {
    match command {
        GateCommands::Deploy { .. } => "deploy",
        GateCommands::Quality { .. } => "quality",
    }
}

fn check_command_name(command: &CheckCommands) -> &'static str {
    match command {
        CheckCommands::Content { .. } => "content",
    }
}
