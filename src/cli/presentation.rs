//! Presentation: text and JSON renderings of contracts, results and classifications.

use crate::boundary::{ActorType, ContentClassification};
use crate::config::ConductorConfig;
use crate::error::{OrchestratorError, StorageError};
use crate::recovery::{RetryConfig, SystemError};
use crate::types::format_timestamp;
use crate::verification::{SessionContract, VerificationResult};
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde::Serialize;

fn to_json<T: Serialize>(value: &T) -> Result<String, OrchestratorError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| OrchestratorError::StorageError(StorageError::Serialization(e)))
}

fn heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

fn pass_fail(passed: bool) -> String {
    if passed {
        format!("{}", "PASS".green())
    } else {
        format!("{}", "FAIL".red())
    }
}

pub fn format_contract(contract: &SessionContract, format: &str) -> Result<String, OrchestratorError> {
    if format == "json" {
        return to_json(contract);
    }
    let mut out = vec![
        heading(&format!("Session {}", contract.session_id)),
        format!("Fingerprint: {}", contract.fingerprint()),
    ];

    let mut deliverables = Table::new();
    deliverables.load_preset(comfy_table::presets::UTF8_FULL);
    deliverables.set_header(vec!["ID", "Type", "Path", "Required", "Description"]);
    for d in &contract.planned_deliverables {
        deliverables.add_row(vec![
            d.id.clone(),
            d.kind.as_str().to_string(),
            d.path.clone().unwrap_or_else(|| "-".to_string()),
            if d.required { "yes" } else { "no" }.to_string(),
            d.description.clone(),
        ]);
    }
    out.push(deliverables.to_string());

    let mut checks = Table::new();
    checks.load_preset(comfy_table::presets::UTF8_FULL);
    checks.set_header(vec!["Check", "Command"]);
    for e in &contract.required_evidence {
        checks.add_row(vec![e.description.clone(), e.command.clone()]);
    }
    for c in &contract.acceptance_criteria {
        checks.add_row(vec![
            c.description.clone(),
            c.command.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }
    out.push(checks.to_string());
    Ok(out.join("\n"))
}

pub fn format_contract_list(
    contracts: &[SessionContract],
    format: &str,
) -> Result<String, OrchestratorError> {
    if format == "json" {
        return to_json(&contracts);
    }
    if contracts.is_empty() {
        return Ok("No session contracts.".to_string());
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Session", "Deliverables", "Required", "Fingerprint"]);
    for c in contracts {
        let fingerprint = c.fingerprint();
        table.add_row(vec![
            c.session_id.clone(),
            c.planned_deliverables.len().to_string(),
            c.required_deliverables().count().to_string(),
            fingerprint.chars().take(16).collect::<String>(),
        ]);
    }
    Ok(table.to_string())
}

pub fn format_verification(
    result: &VerificationResult,
    format: &str,
) -> Result<String, OrchestratorError> {
    if format == "json" {
        return to_json(result);
    }
    let mut out = vec![
        heading(&format!("Verification of {}", result.session_id)),
        format!(
            "{} score {}/100 at {}",
            pass_fail(result.verified),
            result.verification_score,
            format_timestamp(&result.timestamp)
        ),
    ];
    for (title, items) in [
        ("Evidence found", &result.evidence_found),
        ("Missing deliverables", &result.missing_deliverables),
        ("Failed evidence", &result.failed_evidence),
        ("Failed criteria", &result.failed_criteria),
        ("Unexpected changes", &result.unexpected_changes),
    ] {
        if items.is_empty() {
            continue;
        }
        out.push(format!("{} ({}):", title, items.len()));
        out.extend(items.iter().map(|i| format!("  - {}", i)));
    }
    Ok(out.join("\n"))
}

pub fn format_content_check(
    actor_type: ActorType,
    classification: &ContentClassification,
) -> String {
    let disallowed = classification.disallowed_for(actor_type);
    let mut out = vec![format!(
        "{} content check for {} actor",
        pass_fail(disallowed.is_empty()),
        actor_type
    )];
    for signal in &classification.signals {
        let marker = if disallowed.contains(signal) { "x" } else { "-" };
        out.push(format!("  {} {}", marker, signal));
    }
    out.join("\n")
}

pub fn format_classification(
    error: &SystemError,
    profile: Option<&RetryConfig>,
    format: &str,
) -> Result<String, OrchestratorError> {
    if format == "json" {
        return to_json(&serde_json::json!({ "error": error, "retry": profile }));
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec!["Code".to_string(), error.code.to_string()]);
    table.add_row(vec!["Severity".to_string(), error.severity.to_string()]);
    table.add_row(vec!["Recoverable".to_string(), error.recoverable.to_string()]);
    table.add_row(vec!["Retryable".to_string(), error.retryable.to_string()]);
    if let Some(profile) = profile {
        table.add_row(vec![
            "Backoff".to_string(),
            format!(
                "{:?}, {} attempts, {}ms..{}ms, jitter {}ms",
                profile.strategy,
                profile.max_attempts,
                profile.initial_delay_ms,
                profile.max_delay_ms,
                profile.jitter_ms
            ),
        ]);
    }
    Ok(table.to_string())
}

pub fn format_config(config: &ConductorConfig, format: &str) -> Result<String, OrchestratorError> {
    match format {
        "json" => to_json(config),
        "toml" => toml::to_string_pretty(config)
            .map_err(|e| OrchestratorError::ConfigError(format!("toml encoding failed: {}", e))),
        _ => {
            let mut table = Table::new();
            table.load_preset(comfy_table::presets::UTF8_FULL);
            table.set_header(vec!["Setting", "Value"]);
            let rows = [
                ("queue.max_size", config.queue.max_size.to_string()),
                ("queue.history_size", config.queue.history_size.to_string()),
                ("queue.default_priority", config.queue.default_priority.to_string()),
                (
                    "queue.default_max_retries",
                    config.queue.default_max_retries.to_string(),
                ),
                ("monitor.max_activities", config.monitor.max_activities.to_string()),
                (
                    "recovery.circuit.failure_threshold",
                    config.recovery.circuit.failure_threshold.to_string(),
                ),
                (
                    "recovery.circuit.reset_time_ms",
                    config.recovery.circuit.reset_time_ms.to_string(),
                ),
                ("verification.strict", config.verification.strict.to_string()),
                ("verification.min_score", config.verification.min_score.to_string()),
                ("verification.build_command", config.verification.build_command.clone()),
                (
                    "verification.compile_command",
                    config.verification.compile_command.clone(),
                ),
                ("verification.test_command", config.verification.test_command.clone()),
                ("logging.level", config.logging.level.clone()),
            ];
            for (key, value) in rows {
                table.add_row(vec![key.to_string(), value]);
            }
            Ok(format!("{}\n{}", heading("Configuration"), table))
        }
    }
}
