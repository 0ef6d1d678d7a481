//! CLI parse: clap types for conductor. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Conductor CLI - session contracts, verification and gates
#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Planning/execution orchestration with session verification gates")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Session contracts
    Contract {
        #[command(subcommand)]
        command: ContractCommands,
    },
    /// Verify a session against its contract using an execution result file
    Verify {
        /// Session id
        session: String,
        /// Execution result JSON
        #[arg(long)]
        result: PathBuf,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Run a verification gate
    Gate {
        #[command(subcommand)]
        command: GateCommands,
    },
    /// Boundary checks
    Check {
        #[command(subcommand)]
        command: CheckCommands,
    },
    /// Classify an error message the way the error handler would
    ClassifyError {
        /// Error message
        message: String,
        /// Explicit error code (e.g. TIMEOUT_ERROR)
        #[arg(long)]
        code: Option<String>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show the effective configuration
    Status {
        /// Output format (text, json or toml)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum ContractCommands {
    /// Create a session contract from planned instructions
    Create {
        /// Session id
        session: String,
        /// JSON file holding an array of instructions
        #[arg(long)]
        instructions: PathBuf,
    },
    /// Show a session contract
    Show {
        /// Session id
        session: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List every stored contract
    List {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum GateCommands {
    /// Verify, then refuse unless the session may be deployed
    Deploy {
        /// Session id
        session: String,
        /// Execution result JSON
        #[arg(long)]
        result: PathBuf,
    },
    /// Verify, then refuse unless the report score reaches the minimum
    Quality {
        /// Session id
        session: String,
        /// Execution result JSON
        #[arg(long)]
        result: PathBuf,
        /// Minimum score (defaults to the configured min_score)
        #[arg(long)]
        min_score: Option<u8>,
    },
}

#[derive(Subcommand)]
pub enum CheckCommands {
    /// Check a file's text against an actor's content boundary
    Content {
        /// Actor type (planning or execution)
        #[arg(long)]
        actor: String,
        /// File to check
        file: PathBuf,
    },
}
