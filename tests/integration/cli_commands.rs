//! CLI route table against a temporary workspace

use crate::integration::test_utils::{delivered_service, service_instruction};
use clap::Parser;
use conductor::cli::{exit_code, Cli, RunContext};
use conductor::protocol::ExecutionResult;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const CHECKS_CONFIG: &str = r#"
[verification]
build_command = "true"
compile_command = "true"
test_command = "true"
"#;

struct Workspace {
    _temp: TempDir,
    root: PathBuf,
    config: PathBuf,
}

fn workspace() -> Workspace {
    let temp = TempDir::new().unwrap();
    let root = temp.path().to_path_buf();
    let config = root.join("conductor.toml");
    fs::write(&config, CHECKS_CONFIG).unwrap();
    Workspace {
        _temp: temp,
        root,
        config,
    }
}

fn write_json<T: serde::Serialize>(dir: &Path, name: &str, value: &T) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
    path
}

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("conductor").chain(args.iter().copied())).unwrap()
}

fn context(ws: &Workspace) -> RunContext {
    RunContext::new(ws.root.clone(), Some(ws.config.clone())).unwrap()
}

#[test]
fn test_contract_verify_and_deploy() {
    let ws = workspace();
    let ctx = context(&ws);
    let instructions = write_json(&ws.root, "plan.json", &vec![service_instruction("s-cli")]);
    let result = write_json(&ws.root, "result.json", &delivered_service());

    let cli = parse(&["contract", "create", "s-cli", "--instructions", instructions.to_str().unwrap()]);
    let out = ctx.execute(&cli.command).unwrap();
    assert!(out.contains("Contract created for s-cli"));

    let cli = parse(&["contract", "show", "s-cli", "--format", "json"]);
    let shown: serde_json::Value = serde_json::from_str(&ctx.execute(&cli.command).unwrap()).unwrap();
    assert_eq!(shown["sessionId"], "s-cli");

    let cli = parse(&["verify", "s-cli", "--result", result.to_str().unwrap(), "--format", "json"]);
    let verified: serde_json::Value =
        serde_json::from_str(&ctx.execute(&cli.command).unwrap()).unwrap();
    assert_eq!(verified["verificationScore"], 100);
    assert_eq!(verified["verified"], true);

    let cli = parse(&["gate", "deploy", "s-cli", "--result", result.to_str().unwrap()]);
    let out = ctx.execute(&cli.command).unwrap();
    assert!(out.contains("Deployment allowed"));
}

#[test]
fn test_blocked_gate_exits_with_refusal_code() {
    let ws = workspace();
    let ctx = context(&ws);
    let instructions = write_json(&ws.root, "plan.json", &vec![service_instruction("s-empty")]);
    let empty = write_json(&ws.root, "empty.json", &ExecutionResult::success());

    let cli = parse(&["contract", "create", "s-empty", "--instructions", instructions.to_str().unwrap()]);
    ctx.execute(&cli.command).unwrap();

    let cli = parse(&["gate", "deploy", "s-empty", "--result", empty.to_str().unwrap()]);
    let err = ctx.execute(&cli.command).unwrap_err();
    assert!(err.to_string().contains("DEPLOYMENT BLOCKED"));
    assert_eq!(exit_code(&err), 2);
}

#[test]
fn test_content_check_refuses_code_from_planner() {
    let ws = workspace();
    let ctx = context(&ws);
    let file = ws.root.join("plan.txt");
    fs::write(&file, "Step one:\nconst cache = new Map();\n").unwrap();

    let cli = parse(&["check", "content", "--actor", "planning", file.to_str().unwrap()]);
    let err = ctx.execute(&cli.command).unwrap_err();
    assert!(err.is_boundary_violation());
    assert_eq!(exit_code(&err), 2);

    let cli = parse(&["check", "content", "--actor", "execution", file.to_str().unwrap()]);
    assert!(ctx.execute(&cli.command).is_ok());
}

#[test]
fn test_classify_error_and_status() {
    let ws = workspace();
    let ctx = context(&ws);

    let cli = parse(&["classify-error", "Request timed out", "--format", "json"]);
    let classified: serde_json::Value =
        serde_json::from_str(&ctx.execute(&cli.command).unwrap()).unwrap();
    assert_eq!(classified["error"]["code"], "TIMEOUT_ERROR");
    assert_eq!(classified["retry"]["max_attempts"], 3);

    let cli = parse(&["status", "--format", "json"]);
    let status: serde_json::Value = serde_json::from_str(&ctx.execute(&cli.command).unwrap()).unwrap();
    assert_eq!(status["verification"]["build_command"], "true");
}
