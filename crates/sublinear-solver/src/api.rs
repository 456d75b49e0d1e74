//! JSON request/response contract.
//!
//! These types mirror the tool calls external callers already issue:
//!
//! ```json
//! {
//!   "matrix": {"rows": 2, "cols": 2, "format": "dense", "data": [[4, -1], [-1, 4]]},
//!   "vector": [1, 2],
//!   "method": "neumann",
//!   "epsilon": 1e-8,
//!   "maxIterations": 1000
//! }
//! ```
//!
//! `method` also accepts `"auto"`. Sparse matrices use
//! `{"values", "rowIndices", "colIndices"}` (`coo`) or
//! `{"values", "colIndices", "rowPointers"}` (`csr`).
//!
//! Errors never escape as `Err`: handlers return a response with
//! `success: false` and, for cancellation or divergence, the partial iterate.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::analysis::DominanceReport;
use crate::budget::CancellationToken;
use crate::error::{SolverError, ValidationError};
use crate::facade::{AnalyzeOptions, SolverFacade};
use crate::matrix::Matrix;
use crate::types::{CsrMatrix, SolveResult, SolverConfig, SolverMethod, WalkEstimator};
use crate::validation::validate_shape;

// ---------------------------------------------------------------------------
// Matrix payload
// ---------------------------------------------------------------------------

/// Storage format tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatrixFormat {
    Dense,
    Coo,
    Csr,
}

/// Sparse arrays for `coo` and `csr`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SparseData {
    pub values: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub row_indices: Vec<usize>,
    #[serde(default)]
    pub col_indices: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub row_pointers: Vec<usize>,
}

/// Either nested rows or sparse arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatrixData {
    Dense(Vec<Vec<f64>>),
    Sparse(SparseData),
}

/// A matrix as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixSpec {
    pub rows: usize,
    pub cols: usize,
    pub format: MatrixFormat,
    pub data: MatrixData,
}

impl MatrixSpec {
    /// Build the in-memory matrix.
    ///
    /// # Errors
    ///
    /// [`SolverError::ShapeMismatch`] when the payload disagrees with the
    /// declared shape or format, [`SolverError::InvalidInput`] for an
    /// oversized shape or malformed CSR pointers.
    pub fn to_matrix(&self) -> Result<Matrix, SolverError> {
        validate_shape(self.rows, self.cols)?;
        match (self.format, &self.data) {
            (MatrixFormat::Dense, MatrixData::Dense(rows)) => {
                if rows.len() != self.rows {
                    return Err(SolverError::ShapeMismatch(format!(
                        "declared {} rows but data has {}",
                        self.rows,
                        rows.len()
                    )));
                }
                if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != self.cols) {
                    return Err(SolverError::ShapeMismatch(format!(
                        "row {i} has {} entries, expected {}",
                        row.len(),
                        self.cols
                    )));
                }
                if self.rows == 0 {
                    return Ok(Matrix::Sparse(CsrMatrix::<f64>::from_coo(0, self.cols, Vec::new())?));
                }
                Matrix::dense(rows.clone())
            }
            (MatrixFormat::Coo, MatrixData::Sparse(sparse)) => {
                if sparse.row_indices.len() != sparse.values.len()
                    || sparse.col_indices.len() != sparse.values.len()
                {
                    return Err(SolverError::ShapeMismatch(format!(
                        "coo arrays disagree: {} values, {} row indices, {} col indices",
                        sparse.values.len(),
                        sparse.row_indices.len(),
                        sparse.col_indices.len()
                    )));
                }
                let entries = sparse
                    .row_indices
                    .iter()
                    .zip(&sparse.col_indices)
                    .zip(&sparse.values)
                    .map(|((&r, &c), &v)| (r, c, v));
                Matrix::coo(self.rows, self.cols, entries)
            }
            (MatrixFormat::Csr, MatrixData::Sparse(sparse)) => CsrMatrix::try_from_raw_parts(
                self.rows,
                self.cols,
                sparse.row_pointers.clone(),
                sparse.col_indices.clone(),
                sparse.values.clone(),
            )
            .map(Matrix::Sparse),
            (format, _) => Err(SolverError::ShapeMismatch(format!(
                "data layout does not match format {format:?}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Solve
// ---------------------------------------------------------------------------

/// Method field: a concrete estimator or router selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodChoice {
    Auto,
    Fixed(SolverMethod),
}

impl FromStr for MethodChoice {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(MethodChoice::Auto)
        } else {
            s.parse().map(MethodChoice::Fixed)
        }
    }
}

fn default_method() -> String {
    SolverMethod::Neumann.as_str().to_string()
}

/// `solve` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveRequest {
    pub matrix: MatrixSpec,
    pub vector: Vec<f64>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epsilon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_walks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_dominance: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimator: Option<WalkEstimator>,
}

impl SolveRequest {
    /// Overlay the request's fields on `defaults`.
    ///
    /// # Errors
    ///
    /// [`ValidationError::ParameterOutOfRange`] for an unknown method name.
    pub fn to_config(&self, defaults: &SolverConfig) -> Result<(SolverConfig, MethodChoice), ValidationError> {
        let choice: MethodChoice = self.method.parse()?;
        let mut config = defaults.clone();
        if let MethodChoice::Fixed(method) = choice {
            config.method = method;
        }
        if let Some(epsilon) = self.epsilon {
            config.epsilon = epsilon;
        }
        if let Some(max_iterations) = self.max_iterations {
            config.max_iterations = max_iterations;
        }
        if let Some(targets) = &self.targets {
            config.targets = targets.clone();
        }
        if self.alpha.is_some() {
            config.alpha = self.alpha;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.num_walks.is_some() {
            config.num_walks = self.num_walks;
        }
        if self.push_threshold.is_some() {
            config.push_threshold = self.push_threshold;
        }
        if let Some(check) = self.check_dominance {
            config.check_dominance = check;
        }
        if let Some(ms) = self.timeout_ms {
            config.max_time = Some(Duration::from_millis(ms));
        }
        if let Some(estimator) = self.estimator {
            config.estimator = estimator;
        }
        Ok((config, choice))
    }
}

/// `solve` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveResponse {
    pub solution: Option<Vec<f64>>,
    pub entry_estimates: Option<BTreeMap<usize, f64>>,
    pub iterations: usize,
    /// Method-specific residual; `null` when nothing was computed.
    pub residual: Option<f64>,
    pub converged: bool,
    pub success: bool,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub method: Option<SolverMethod>,
    #[serde(default)]
    pub standard_error: Option<f64>,
    #[serde(default)]
    pub error_bound: Option<f64>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub wall_time_ms: f64,
}

impl SolveResponse {
    /// Successful response.
    pub fn from_result(result: SolveResult) -> Self {
        Self {
            solution: result.solution,
            entry_estimates: result.entry_estimates,
            iterations: result.iterations,
            residual: Some(result.residual_norm),
            converged: result.converged,
            success: true,
            error: None,
            error_kind: None,
            method: Some(result.method),
            standard_error: result.standard_error,
            error_bound: result.error_bound,
            warnings: result.warnings,
            wall_time_ms: result.wall_time.as_secs_f64() * 1e3,
        }
    }

    /// Failed response, carrying the partial iterate when there is one.
    pub fn from_error(err: SolverError) -> Self {
        let message = err.to_string();
        let kind = err.kind().to_string();
        let partial = match err {
            SolverError::Cancelled { partial } | SolverError::DivergenceDetected { partial, .. } => {
                Some(*partial)
            }
            _ => None,
        };
        match partial {
            Some(result) => Self {
                success: false,
                converged: false,
                error: Some(message),
                error_kind: Some(kind),
                ..Self::from_result(result)
            },
            None => Self {
                solution: None,
                entry_estimates: None,
                iterations: 0,
                residual: None,
                converged: false,
                success: false,
                error: Some(message),
                error_kind: Some(kind),
                method: None,
                standard_error: None,
                error_bound: None,
                warnings: Vec::new(),
                wall_time_ms: 0.0,
            },
        }
    }
}

/// Handle a `solve` call with `defaults` for omitted fields.
pub fn handle_solve(request: &SolveRequest, defaults: &SolverConfig) -> SolveResponse {
    handle_solve_with_cancel(request, defaults, &CancellationToken::new())
}

/// [`handle_solve`] with a caller-held cancellation token.
pub fn handle_solve_with_cancel(
    request: &SolveRequest,
    defaults: &SolverConfig,
    cancel: &CancellationToken,
) -> SolveResponse {
    match run_solve(request, defaults, cancel) {
        Ok(result) => SolveResponse::from_result(result),
        Err(err) => SolveResponse::from_error(err),
    }
}

fn run_solve(
    request: &SolveRequest,
    defaults: &SolverConfig,
    cancel: &CancellationToken,
) -> Result<SolveResult, SolverError> {
    let (config, choice) = request.to_config(defaults)?;
    let matrix = request.matrix.to_matrix()?;
    let facade = SolverFacade::new();
    match choice {
        MethodChoice::Auto => facade.solve_auto(&matrix, &request.vector, &config, cancel),
        MethodChoice::Fixed(_) => facade.solve_with_cancel(&matrix, &request.vector, &config, cancel),
    }
}

// ---------------------------------------------------------------------------
// Analyze
// ---------------------------------------------------------------------------

fn yes() -> bool {
    true
}

/// `analyzeMatrix` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub matrix: MatrixSpec,
    #[serde(default = "yes")]
    pub check_dominance: bool,
    #[serde(default = "yes")]
    pub check_symmetry: bool,
    #[serde(default = "yes")]
    pub estimate_condition: bool,
}

/// `analyzeMatrix` response: the report fields inlined next to
/// `success`/`error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub success: bool,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(flatten)]
    pub report: Option<DominanceReport>,
}

/// Handle an `analyzeMatrix` call.
pub fn handle_analyze(request: &AnalyzeRequest) -> AnalyzeResponse {
    let outcome = request.matrix.to_matrix().and_then(|matrix| {
        SolverFacade::new().analyze(
            &matrix,
            AnalyzeOptions {
                check_symmetry: request.check_symmetry,
                estimate_condition: request.estimate_condition,
            },
        )
    });
    match outcome {
        Ok(report) => {
            let mut warnings = Vec::new();
            if request.check_dominance && !report.is_dominant {
                warnings.push(format!(
                    "matrix is not strictly diagonally dominant (ratio {:.3e})",
                    report.dominance_ratio
                ));
            }
            AnalyzeResponse {
                success: true,
                error: None,
                error_kind: None,
                warnings,
                report: Some(report),
            }
        }
        Err(err) => AnalyzeResponse {
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            warnings: Vec::new(),
            report: None,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixView;

    fn dense_request(method: &str) -> SolveRequest {
        serde_json::from_value(serde_json::json!({
            "matrix": {"rows": 2, "cols": 2, "format": "dense", "data": [[4.0, -1.0], [-1.0, 4.0]]},
            "vector": [1.0, 2.0],
            "method": method,
            "epsilon": 1e-8,
            "maxIterations": 1000
        }))
        .unwrap()
    }

    #[test]
    fn end_to_end_neumann() {
        let response = handle_solve(&dense_request("neumann"), &SolverConfig::default());
        assert!(response.success, "{:?}", response.error);
        assert!(response.converged);
        let x = response.solution.unwrap();
        assert!((x[0] - 0.4).abs() < 1e-6);
        assert!((x[1] - 0.6).abs() < 1e-6);
        assert!(response.iterations < 100);
    }

    #[test]
    fn coo_and_csr_payloads() {
        let coo: MatrixSpec = serde_json::from_value(serde_json::json!({
            "rows": 2, "cols": 2, "format": "coo",
            "data": {"values": [4.0, -1.0, -1.0, 4.0], "rowIndices": [0, 0, 1, 1], "colIndices": [0, 1, 0, 1]}
        }))
        .unwrap();
        let csr: MatrixSpec = serde_json::from_value(serde_json::json!({
            "rows": 2, "cols": 2, "format": "csr",
            "data": {"values": [4.0, -1.0, -1.0, 4.0], "colIndices": [0, 1, 0, 1], "rowPointers": [0, 2, 4]}
        }))
        .unwrap();
        let a = coo.to_matrix().unwrap();
        let b = csr.to_matrix().unwrap();
        assert_eq!(a.nnz(), 4);
        assert_eq!(a.get(1, 0), b.get(1, 0));
        assert_eq!(a.to_csr(), b.to_csr());
    }

    #[test]
    fn format_mismatch_is_shape_error() {
        let spec = MatrixSpec {
            rows: 2,
            cols: 2,
            format: MatrixFormat::Csr,
            data: MatrixData::Dense(vec![vec![1.0, 0.0], vec![0.0, 1.0]]),
        };
        assert!(matches!(spec.to_matrix(), Err(SolverError::ShapeMismatch(_))));
    }

    #[test]
    fn auto_method_and_targets() {
        let mut request = dense_request("auto");
        request.targets = Some(vec![1]);
        let response = handle_solve(&request, &SolverConfig::default());
        assert!(response.success);
        assert_eq!(response.method, Some(SolverMethod::ForwardPush));
        assert!((response.entry_estimates.unwrap()[&1] - 0.6).abs() < 1e-8);
    }

    #[test]
    fn unknown_method_fails_cleanly() {
        let response = handle_solve(&dense_request("gauss"), &SolverConfig::default());
        assert!(!response.success);
        assert_eq!(response.error_kind.as_deref(), Some("invalid-input"));
        assert!(response.residual.is_none());
    }

    #[test]
    fn degenerate_diagonal_reported() {
        let mut request = dense_request("neumann");
        request.matrix.data = MatrixData::Dense(vec![vec![0.0, 1.0], vec![1.0, 4.0]]);
        let response = handle_solve(&request, &SolverConfig::default());
        assert!(!response.success);
        assert_eq!(response.error_kind.as_deref(), Some("degenerate-diagonal"));

        let analyze = handle_analyze(&AnalyzeRequest {
            matrix: request.matrix.clone(),
            check_dominance: true,
            check_symmetry: true,
            estimate_condition: true,
        });
        assert!(!analyze.success);
        assert!(analyze.report.is_none());
    }

    #[test]
    fn response_json_shape() {
        let response = handle_solve(&dense_request("neumann"), &SolverConfig::default());
        let json = serde_json::to_value(&response).unwrap();
        for key in ["solution", "entryEstimates", "iterations", "residual", "converged", "success", "error"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["method"], "neumann");
    }

    #[test]
    fn analyze_flattens_report() {
        let request: AnalyzeRequest = serde_json::from_value(serde_json::json!({
            "matrix": {"rows": 2, "cols": 2, "format": "dense", "data": [[1.0, 0.0], [0.0, 1.0]]}
        }))
        .unwrap();
        let response = handle_analyze(&request);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["isDominant"], true);
        assert_eq!(json["dominanceRatio"], 1.0);
    }
}
