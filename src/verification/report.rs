//! Human-readable verification report.

use crate::types::format_timestamp;
use crate::verification::contract::SessionContract;
use crate::verification::VerificationResult;
use regex::Regex;
use std::fmt::Write as _;
use std::sync::OnceLock;

pub fn render_report(
    session_id: &str,
    contract: Option<&SessionContract>,
    result: Option<&VerificationResult>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Session Verification Report");
    let _ = writeln!(out, "Session: {}", session_id);
    match contract {
        Some(contract) => {
            let _ = writeln!(out, "Contract: {}", contract.fingerprint());
            let _ = writeln!(
                out,
                "Planned deliverables: {} ({} required)",
                contract.planned_deliverables.len(),
                contract.required_deliverables().count()
            );
        }
        None => {
            let _ = writeln!(out, "Contract: missing");
        }
    }

    let Some(result) = result else {
        let _ = writeln!(out, "Status: NOT VERIFIED (no verification results)");
        let _ = writeln!(out, "Verification Score: 0/100");
        return out;
    };

    let status = if result.verified {
        "VERIFIED"
    } else {
        "NOT VERIFIED"
    };
    let _ = writeln!(out, "Status: {}", status);
    let _ = writeln!(out, "Verification Score: {}/100", result.verification_score);
    let _ = writeln!(out, "Verified At: {}", format_timestamp(&result.timestamp));

    write_section(&mut out, "Evidence Found", &result.evidence_found);
    write_section(&mut out, "Missing Deliverables", &result.missing_deliverables);
    write_section(&mut out, "Failed Evidence", &result.failed_evidence);
    write_section(&mut out, "Failed Criteria", &result.failed_criteria);
    write_section(&mut out, "Unexpected Changes", &result.unexpected_changes);
    out
}

fn write_section(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{}:", title);
    for item in items {
        let _ = writeln!(out, "  - {}", item);
    }
}

/// Score from a `Verification Score: NN/100` line.
pub fn parse_score(report: &str) -> Option<u8> {
    static SCORE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = SCORE
        .get_or_init(|| Regex::new(r"Verification Score:\s*(\d{1,3})/100").ok())
        .as_ref()?;
    let captures = re.captures(report)?;
    captures.get(1)?.as_str().parse::<u8>().ok().filter(|s| *s <= 100)
}
