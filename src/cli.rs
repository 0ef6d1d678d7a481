//! CLI domain: parse, route, help, output, and presentation only.
//! No orchestration logic; a single route table dispatches to the core components.

mod help;
mod output;
mod parse;
mod presentation;
mod route;

pub use help::command_name;
pub use output::{exit_code, map_error};
pub use parse::{CheckCommands, Cli, Commands, ContractCommands, GateCommands};
pub use route::RunContext;
