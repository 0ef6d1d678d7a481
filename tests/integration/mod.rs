//! Integration tests for the conductor orchestration core

mod cli_commands;
mod config_integration;
mod monitor;
mod orchestrator;
mod queue;
mod recovery;
mod test_utils;
mod verification;
