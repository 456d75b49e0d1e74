//! Terminal formatting for diagnostics written to stderr.
//!
//! JSON responses go to stdout untouched; everything here is for humans.

use colored::*;
use sublinear_solver::api::{AnalyzeResponse, SolveResponse};

pub fn format_error(msg: &str) -> String {
    format!("{} {}", "Error:".red().bold(), msg)
}

pub fn format_warning(msg: &str) -> String {
    format!("{} {}", "Warning:".yellow().bold(), msg)
}

pub fn format_success(msg: &str) -> String {
    format!("{} {}", "✓".green().bold(), msg)
}

/// One-line summary of a solve response.
pub fn solve_summary(response: &SolveResponse) -> String {
    if !response.success {
        let kind = response.error_kind.as_deref().unwrap_or("error");
        let message = response.error.as_deref().unwrap_or("unknown failure");
        return format_error(&format!("[{kind}] {message}"));
    }

    let method = response.method.map(|m| m.to_string()).unwrap_or_default();
    let mut line = format!(
        "{} in {} iterations ({:.2} ms)",
        method.cyan(),
        response.iterations.to_string().cyan(),
        response.wall_time_ms,
    );
    if let Some(bound) = response.error_bound {
        line.push_str(&format!(", error bound {bound:.3e}"));
    }
    if let Some(se) = response.standard_error {
        line.push_str(&format!(", standard error {se:.3e}"));
    }
    if response.converged {
        format_success(&line)
    } else {
        format_warning(&format!("did not reach epsilon: {line}"))
    }
}

/// Dominance headline of an analyze response.
pub fn analyze_summary(response: &AnalyzeResponse) -> String {
    match (&response.report, &response.error) {
        (Some(report), _) => {
            let verdict = if report.is_dominant {
                "strictly diagonally dominant".green()
            } else if report.is_weakly_dominant {
                "weakly diagonally dominant".yellow()
            } else {
                "not diagonally dominant".red()
            };
            format!(
                "{}x{} matrix, {} non-zeros: {} (ratio {:.4})",
                report.n, report.n, report.nnz, verdict, report.dominance_ratio
            )
        }
        (None, Some(error)) => format_error(error),
        (None, None) => format_error("analysis produced no report"),
    }
}
