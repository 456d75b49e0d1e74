//! Subcommand implementations.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use sublinear_solver::api::{
    handle_analyze, handle_solve, AnalyzeRequest, AnalyzeResponse, SolveRequest, SolveResponse,
};
use sublinear_solver::types::SolverConfig;
use tracing::{debug, info, warn};

use crate::format::{analyze_summary, format_warning, solve_summary};

/// Read a whole request from a file, or stdin for `-`.
pub fn read_input(path: &Path) -> Result<String> {
    let mut text = String::new();
    if path.as_os_str() == "-" {
        io::stdin()
            .read_to_string(&mut text)
            .context("failed to read request from stdin")?;
    } else {
        File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?
            .read_to_string(&mut text)
            .with_context(|| format!("failed to read {}", path.display()))?;
    }
    Ok(text)
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String> {
    let text = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    text.context("failed to serialise response")
}

/// `solve`: returns whether the solve succeeded.
pub fn run_solve(input: &Path, defaults: &SolverConfig, pretty: bool) -> Result<bool> {
    let text = read_input(input)?;
    let request: SolveRequest =
        serde_json::from_str(&text).context("request is not a valid solve payload")?;
    info!(method = %request.method, n = request.matrix.rows, "solving");

    let response = handle_solve(&request, defaults);
    println!("{}", to_json(&response, pretty)?);

    for warning in &response.warnings {
        eprintln!("{}", format_warning(warning));
    }
    eprintln!("{}", solve_summary(&response));
    Ok(response.success)
}

/// `analyze`: returns whether the analysis succeeded.
pub fn run_analyze(input: &Path, pretty: bool) -> Result<bool> {
    let text = read_input(input)?;
    let request: AnalyzeRequest =
        serde_json::from_str(&text).context("request is not a valid analyzeMatrix payload")?;

    let response = handle_analyze(&request);
    println!("{}", to_json(&response, pretty)?);

    for warning in &response.warnings {
        eprintln!("{}", format_warning(warning));
    }
    eprintln!("{}", analyze_summary(&response));
    Ok(response.success)
}

// ---------------------------------------------------------------------------
// JSON-lines tool calls
// ---------------------------------------------------------------------------

/// One `rpc` input line.
#[derive(Debug, Deserialize)]
struct ToolCall {
    #[serde(default)]
    id: Option<Value>,
    tool: String,
    #[serde(default)]
    arguments: Value,
}

fn failure(message: String) -> Value {
    json!({ "success": false, "error": message })
}

/// Answer a single tool call. Never fails: problems become error responses.
pub fn handle_tool_call(line: &str, defaults: &SolverConfig) -> Value {
    let call: ToolCall = match serde_json::from_str(line) {
        Ok(call) => call,
        Err(e) => return failure(format!("malformed tool call: {e}")),
    };

    let mut response = match call.tool.as_str() {
        "solve" => match serde_json::from_value::<SolveRequest>(call.arguments) {
            Ok(request) => serialise(handle_solve(&request, defaults)),
            Err(e) => failure(format!("invalid solve arguments: {e}")),
        },
        "analyzeMatrix" => match serde_json::from_value::<AnalyzeRequest>(call.arguments) {
            Ok(request) => serialise_analyze(handle_analyze(&request)),
            Err(e) => failure(format!("invalid analyzeMatrix arguments: {e}")),
        },
        other => failure(format!("unknown tool '{other}'")),
    };

    if let (Some(id), Value::Object(map)) = (call.id, &mut response) {
        map.insert("id".to_string(), id);
    }
    response
}

fn serialise(response: SolveResponse) -> Value {
    serde_json::to_value(response).unwrap_or_else(|e| failure(format!("failed to serialise response: {e}")))
}

fn serialise_analyze(response: AnalyzeResponse) -> Value {
    serde_json::to_value(response).unwrap_or_else(|e| failure(format!("failed to serialise response: {e}")))
}

/// Serve tool calls line by line until `reader` is exhausted.
pub fn run_rpc<R: BufRead, W: Write>(reader: R, mut writer: W, defaults: &SolverConfig) -> Result<usize> {
    let mut served = 0usize;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", lineno + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_tool_call(&line, defaults);
        if response["success"] == Value::Bool(false) {
            warn!(line = lineno + 1, error = %response["error"], "tool call failed");
        }
        serde_json::to_writer(&mut writer, &response).context("failed to write response")?;
        writer.write_all(b"\n").context("failed to write response")?;
        writer.flush().context("failed to flush output")?;
        served += 1;
    }
    debug!(served, "rpc input closed");
    Ok(served)
}

/// `rpc` on stdin/stdout.
pub fn run_rpc_stdio(defaults: &SolverConfig) -> Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    run_rpc(BufReader::new(stdin.lock()), stdout.lock(), defaults)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOLVE_CALL: &str = r#"{"id": 1, "tool": "solve", "arguments": {
        "matrix": {"rows": 2, "cols": 2, "format": "dense", "data": [[4, -1], [-1, 4]]},
        "vector": [1, 2], "epsilon": 1e-9}}"#;

    #[test]
    fn solve_tool_call() {
        let response = handle_tool_call(&SOLVE_CALL.replace('\n', " "), &SolverConfig::default());
        assert_eq!(response["success"], true);
        assert_eq!(response["id"], 1);
        let x0 = response["solution"][0].as_f64().unwrap();
        assert!((x0 - 0.4).abs() < 1e-8);
    }

    #[test]
    fn analyze_tool_call() {
        let line = r#"{"tool": "analyzeMatrix", "arguments": {"matrix": {"rows": 1, "cols": 1, "format": "dense", "data": [[2]]}}}"#;
        let response = handle_tool_call(line, &SolverConfig::default());
        assert_eq!(response["success"], true);
        assert_eq!(response["dominanceRatio"], 1.0);
    }

    #[test]
    fn bad_calls_become_error_responses() {
        let defaults = SolverConfig::default();
        assert_eq!(handle_tool_call("not json", &defaults)["success"], false);
        let unknown = handle_tool_call(r#"{"tool": "invert", "arguments": {}}"#, &defaults);
        assert!(unknown["error"].as_str().unwrap().contains("unknown tool"));
        let missing = handle_tool_call(r#"{"tool": "solve", "arguments": {"vector": [1]}}"#, &defaults);
        assert!(missing["error"].as_str().unwrap().contains("invalid solve arguments"));
    }

    #[test]
    fn config_defaults_apply_to_requests() {
        let defaults = SolverConfig {
            max_iterations: 2,
            epsilon: 1e-14,
            ..SolverConfig::default()
        };
        let response = handle_tool_call(
            r#"{"tool": "solve", "arguments": {"matrix": {"rows": 2, "cols": 2, "format": "dense", "data": [[4, -1], [-1, 4]]}, "vector": [1, 2]}}"#,
            &defaults,
        );
        assert_eq!(response["success"], true);
        assert_eq!(response["converged"], false);
        assert_eq!(response["iterations"], 2);
    }

    #[test]
    fn rpc_loop_answers_each_line() {
        let input = format!("{}\n\n{}\n", SOLVE_CALL.replace('\n', " "), r#"{"tool": "nope"}"#);
        let mut output = Vec::new();
        let served = run_rpc(input.as_bytes(), &mut output, &SolverConfig::default()).unwrap();
        assert_eq!(served, 2);

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["success"], true);
        assert_eq!(lines[1]["success"], false);
    }

    #[test]
    fn oversized_matrix_does_not_stop_the_loop() {
        let huge = r#"{"id": "big", "tool": "solve", "arguments": {"matrix": {"rows": 18446744073709551615, "cols": 18446744073709551615, "format": "coo", "data": {"values": [], "rowIndices": [], "colIndices": []}}, "vector": []}}"#;
        let input = format!("{huge}\n{}\n", SOLVE_CALL.replace('\n', " "));
        let mut output = Vec::new();
        let served = run_rpc(input.as_bytes(), &mut output, &SolverConfig::default()).unwrap();
        assert_eq!(served, 2);

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines[0]["id"], "big");
        assert_eq!(lines[0]["success"], false);
        assert_eq!(lines[0]["errorKind"], "matrix-too-large");
        assert_eq!(lines[1]["success"], true);
    }

    #[test]
    fn read_input_reports_missing_file() {
        let err = read_input(Path::new("/nonexistent/request.json")).unwrap_err();
        assert!(err.to_string().contains("failed to open"));
    }
}
