//! Integration tests for the sublinear-solver CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

const SOLVE_REQUEST: &str = r#"{
    "matrix": {"rows": 2, "cols": 2, "format": "dense", "data": [[4, -1], [-1, 4]]},
    "vector": [1, 2],
    "method": "neumann",
    "epsilon": 1e-10
}"#;

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("sublinear-solver").unwrap();
    cmd.arg("--no-color");
    cmd
}

#[test]
fn test_cli_version() {
    cli()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sublinear-solver"));
}

#[test]
fn test_cli_help() {
    cli().arg("--help").assert().success().stdout(predicate::str::contains(
        "diagonally dominant linear systems",
    ));
}

#[test]
fn test_solve_from_file() {
    let dir = tempdir().unwrap();
    let request = dir.path().join("request.json");
    fs::write(&request, SOLVE_REQUEST).unwrap();

    cli()
        .arg("solve")
        .arg("--input")
        .arg(&request)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"success\":true"))
        .stdout(predicate::str::contains("\"method\":\"neumann\""))
        .stderr(predicate::str::contains("neumann in"));
}

#[test]
fn test_solve_from_stdin_pretty() {
    cli()
        .arg("solve")
        .arg("--pretty")
        .write_stdin(SOLVE_REQUEST)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"converged\": true"));
}

#[test]
fn test_failed_solve_exits_with_two() {
    let request = SOLVE_REQUEST.replace("[1, 2]", "[1, 2, 3]");
    cli()
        .arg("solve")
        .write_stdin(request)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"errorKind\":\"shape-mismatch\""))
        .stderr(predicate::str::contains("Error: [shape-mismatch]"));
}

#[test]
fn test_malformed_request_exits_with_one() {
    cli()
        .arg("solve")
        .write_stdin("{ not json")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("request is not a valid solve payload"));
}

#[test]
fn test_analyze() {
    cli()
        .arg("analyze")
        .write_stdin(r#"{"matrix": {"rows": 2, "cols": 2, "format": "dense", "data": [[2, 1], [1, 2]]}}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"dominanceRatio\":0.5"))
        .stderr(predicate::str::contains("strictly diagonally dominant"));
}

#[test]
fn test_config_file_supplies_defaults() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("solver.toml");
    fs::write(&config, "[solver]\nmax_iterations = 1\nepsilon = 1e-14\n").unwrap();

    cli()
        .arg("--config")
        .arg(&config)
        .arg("solve")
        .write_stdin(
            r#"{"matrix": {"rows": 2, "cols": 2, "format": "dense", "data": [[4, -1], [-1, 4]]}, "vector": [1, 2]}"#,
        )
        .assert()
        .success()
        .stdout(predicate::str::contains("\"iterations\":1"))
        .stdout(predicate::str::contains("\"converged\":false"));
}

#[test]
fn test_invalid_config_rejected() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("solver.toml");
    fs::write(&config, "[solver]\nepsilon = -1.0\n").unwrap();

    cli()
        .arg("--config")
        .arg(&config)
        .arg("solve")
        .write_stdin(SOLVE_REQUEST)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("solver.epsilon must be a positive number"));
}

#[test]
fn test_rpc_lines() {
    let input = format!(
        "{}\n{}\n",
        r#"{"id": "a", "tool": "solve", "arguments": {"matrix": {"rows": 1, "cols": 1, "format": "dense", "data": [[2]]}, "vector": [4]}}"#,
        r#"{"id": "b", "tool": "analyzeMatrix", "arguments": {"matrix": {"rows": 1, "cols": 1, "format": "dense", "data": [[2]]}}}"#,
    );

    let output = cli().arg("rpc").write_stdin(input).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["id"], "a");
    assert_eq!(lines[0]["solution"][0], 2.0);
    assert_eq!(lines[1]["id"], "b");
    assert_eq!(lines[1]["isDominant"], true);
}
