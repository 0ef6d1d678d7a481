//! CLI output: error mapping from domain errors to the CLI surface.

use crate::error::OrchestratorError;

/// Map domain errors to a string for CLI output.
pub fn map_error(e: &OrchestratorError) -> String {
    e.to_string()
}

/// Process exit code: 2 for refusals (gates, boundaries), 1 for everything else.
pub fn exit_code(e: &OrchestratorError) -> i32 {
    match e {
        OrchestratorError::Gate(_) => 2,
        e if e.is_boundary_violation() => 2,
        _ => 1,
    }
}
