//! Core types for the sublinear solvers.
//!
//! Provides [`CsrMatrix`] for compressed sparse row storage, the closed
//! [`SolverMethod`] enum, the per-request [`SolverConfig`], and the uniform
//! [`SolveResult`] every estimator returns.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{SolverError, ValidationError};
use crate::validation::validate_shape;

// ---------------------------------------------------------------------------
// CsrMatrix<T>
// ---------------------------------------------------------------------------

/// Compressed Sparse Row (CSR) matrix.
///
/// Stores only non-zero entries for efficient sparse matrix-vector
/// multiplication in O(nnz) time with excellent cache locality.
///
/// # Layout
///
/// For a matrix with `m` rows and `nnz` non-zeros:
/// - `row_ptr` has length `m + 1`
/// - `col_indices` and `values` each have length `nnz`
/// - Row `i` spans indices `row_ptr[i]..row_ptr[i+1]`
///
/// Matrices built through [`from_coo`](CsrMatrix::from_coo) or
/// [`try_from_raw_parts`](CsrMatrix::try_from_raw_parts) keep column indices
/// sorted and unique within each row, which [`get`](CsrMatrix::get) relies on.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix<T> {
    /// Row pointers: `row_ptr[i]` is the start index in `col_indices`/`values`
    /// for row `i`.
    pub row_ptr: Vec<usize>,
    /// Column indices for each non-zero entry.
    pub col_indices: Vec<usize>,
    /// Values for each non-zero entry.
    pub values: Vec<T>,
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
}

impl<T: Copy + Default + std::ops::Mul<Output = T> + std::ops::AddAssign> CsrMatrix<T> {
    /// Sparse matrix-vector multiply: `y = A * x`.
    ///
    /// # Panics
    ///
    /// Debug-asserts that `x.len() >= self.cols` and `y.len() >= self.rows`.
    #[inline]
    pub fn spmv(&self, x: &[T], y: &mut [T]) {
        debug_assert!(
            x.len() >= self.cols,
            "spmv: x.len()={} < cols={}",
            x.len(),
            self.cols,
        );
        debug_assert!(
            y.len() >= self.rows,
            "spmv: y.len()={} < rows={}",
            y.len(),
            self.rows,
        );

        for i in 0..self.rows {
            let mut sum = T::default();
            let start = self.row_ptr[i];
            let end = self.row_ptr[i + 1];

            for idx in start..end {
                sum += self.values[idx] * x[self.col_indices[idx]];
            }
            y[i] = sum;
        }
    }
}

impl<T> CsrMatrix<T> {
    /// Number of stored entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Number of stored entries in a specific row.
    #[inline]
    pub fn row_degree(&self, row: usize) -> usize {
        self.row_ptr[row + 1] - self.row_ptr[row]
    }

    /// Iterate over `(col_index, &value)` pairs for the given row.
    #[inline]
    pub fn row_entries(&self, row: usize) -> impl Iterator<Item = (usize, &T)> {
        let start = self.row_ptr[row];
        let end = self.row_ptr[row + 1];
        self.col_indices[start..end]
            .iter()
            .copied()
            .zip(self.values[start..end].iter())
    }

    /// Position of `(row, col)` inside `values`, found by binary search.
    #[inline]
    pub fn position(&self, row: usize, col: usize) -> Option<usize> {
        if row >= self.rows {
            return None;
        }
        let start = self.row_ptr[row];
        let end = self.row_ptr[row + 1];
        self.col_indices[start..end]
            .binary_search(&col)
            .ok()
            .map(|offset| start + offset)
    }
}

impl<T: Copy + Default> CsrMatrix<T> {
    /// Transpose: produces `A^T` in CSR form.
    ///
    /// Uses a two-pass counting sort in O(nnz + rows + cols) time and
    /// O(nnz) extra memory. Rows are visited in order, so the transposed
    /// column indices come out sorted. Required by backward push, which
    /// walks the columns of the iteration matrix.
    pub fn transpose(&self) -> CsrMatrix<T> {
        let nnz = self.nnz();
        let t_rows = self.cols;
        let t_cols = self.rows;

        // Pass 1: count entries per new row (= old column).
        let mut row_ptr = vec![0usize; t_rows + 1];
        for &c in &self.col_indices {
            row_ptr[c + 1] += 1;
        }
        for i in 1..=t_rows {
            row_ptr[i] += row_ptr[i - 1];
        }

        // Pass 2: scatter entries into the transposed arrays.
        let mut col_indices = vec![0usize; nnz];
        let mut values = vec![T::default(); nnz];
        let mut cursor = row_ptr.clone();

        for row in 0..self.rows {
            let start = self.row_ptr[row];
            let end = self.row_ptr[row + 1];
            for idx in start..end {
                let c = self.col_indices[idx];
                let dest = cursor[c];
                col_indices[dest] = row;
                values[dest] = self.values[idx];
                cursor[c] += 1;
            }
        }

        CsrMatrix {
            row_ptr,
            col_indices,
            values,
            rows: t_rows,
            cols: t_cols,
        }
    }
}

impl<T: Copy + Default + std::ops::AddAssign> CsrMatrix<T> {
    /// Build a CSR matrix from COO (coordinate) triplets.
    ///
    /// Entries are sorted by (row, col) and duplicate positions are summed.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::MatrixTooLarge`] if the declared shape exceeds
    ///   the dimension limit.
    /// - [`SolverError::ShapeMismatch`] if a row or column index exceeds the
    ///   declared shape.
    pub fn from_coo_generic(
        rows: usize,
        cols: usize,
        entries: impl IntoIterator<Item = (usize, usize, T)>,
    ) -> Result<Self, SolverError> {
        validate_shape(rows, cols)?;
        let mut sorted: Vec<_> = entries.into_iter().collect();
        for &(r, c, _) in &sorted {
            if r >= rows || c >= cols {
                return Err(SolverError::ShapeMismatch(format!(
                    "entry ({r}, {c}) outside declared shape {rows}x{cols}"
                )));
            }
        }
        sorted.sort_by_key(|(r, c, _)| (*r, *c));

        let mut row_ptr = vec![0usize; rows + 1];
        let mut col_indices: Vec<usize> = Vec::with_capacity(sorted.len());
        let mut values: Vec<T> = Vec::with_capacity(sorted.len());
        let mut last: Option<(usize, usize)> = None;

        for (r, c, v) in sorted {
            if last == Some((r, c)) {
                if let Some(slot) = values.last_mut() {
                    *slot += v;
                }
                continue;
            }
            row_ptr[r + 1] += 1;
            col_indices.push(c);
            values.push(v);
            last = Some((r, c));
        }
        for i in 1..=rows {
            row_ptr[i] += row_ptr[i - 1];
        }

        Ok(Self {
            row_ptr,
            col_indices,
            values,
            rows,
            cols,
        })
    }
}

impl CsrMatrix<f64> {
    /// Build a CSR matrix from COO (coordinate) triplets.
    ///
    /// Entries are sorted by (row, col) internally. Duplicate positions are
    /// summed.
    ///
    /// # Errors
    ///
    /// [`SolverError::ShapeMismatch`] if an index exceeds the declared shape.
    pub fn from_coo(
        rows: usize,
        cols: usize,
        entries: impl IntoIterator<Item = (usize, usize, f64)>,
    ) -> Result<Self, SolverError> {
        Self::from_coo_generic(rows, cols, entries)
    }

    /// Build a CSR matrix from raw arrays, validating the structure and
    /// canonicalising each row (sorted columns, duplicates summed).
    ///
    /// # Errors
    ///
    /// - [`SolverError::ShapeMismatch`] if the array lengths disagree with
    ///   the declared shape or a column index is out of range.
    /// - [`SolverError::InvalidInput`] for an oversized shape, non-monotonic
    ///   row pointers or non-finite values.
    pub fn try_from_raw_parts(
        rows: usize,
        cols: usize,
        row_ptr: Vec<usize>,
        col_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, SolverError> {
        validate_shape(rows, cols)?;
        if row_ptr.len() != rows + 1 {
            return Err(SolverError::ShapeMismatch(format!(
                "row_ptr length {} != rows + 1 = {}",
                row_ptr.len(),
                rows + 1,
            )));
        }
        if col_indices.len() != values.len() {
            return Err(SolverError::ShapeMismatch(format!(
                "col_indices length {} != values length {}",
                col_indices.len(),
                values.len(),
            )));
        }
        if row_ptr[0] != 0 {
            return Err(ValidationError::DimensionMismatch(format!(
                "row_ptr[0] = {} (expected 0)",
                row_ptr[0]
            ))
            .into());
        }
        for i in 1..row_ptr.len() {
            if row_ptr[i] < row_ptr[i - 1] {
                return Err(ValidationError::NonMonotonicRowPtrs { position: i }.into());
            }
        }
        if row_ptr[rows] != values.len() {
            return Err(SolverError::ShapeMismatch(format!(
                "row_ptr[rows] = {} but {} values supplied",
                row_ptr[rows],
                values.len(),
            )));
        }

        let mut triplets = Vec::with_capacity(values.len());
        for row in 0..rows {
            for idx in row_ptr[row]..row_ptr[row + 1] {
                triplets.push((row, col_indices[idx], values[idx]));
            }
        }
        Self::from_coo(rows, cols, triplets)
    }

    /// Build a square identity matrix of dimension `n` in CSR format.
    pub fn identity(n: usize) -> Self {
        let row_ptr: Vec<usize> = (0..=n).collect();
        let col_indices: Vec<usize> = (0..n).collect();
        let values = vec![1.0f64; n];

        Self {
            row_ptr,
            col_indices,
            values,
            rows: n,
            cols: n,
        }
    }

    /// Entry `A[row][col]`, zero when not stored.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.position(row, col).map_or(0.0, |idx| self.values[idx])
    }
}

// ---------------------------------------------------------------------------
// Method selection
// ---------------------------------------------------------------------------

/// The closed set of estimators the facade can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverMethod {
    /// Jacobi-preconditioned Neumann series; full solution vector.
    Neumann,
    /// Monte Carlo walks on the iteration matrix; single entries.
    RandomWalk,
    /// Residual push from a source entry.
    ForwardPush,
    /// Residual push from the right-hand side.
    BackwardPush,
    /// Forward and backward push meeting in the middle.
    Bidirectional,
}

impl SolverMethod {
    /// Every method, in declaration order.
    pub const ALL: [SolverMethod; 5] = [
        SolverMethod::Neumann,
        SolverMethod::RandomWalk,
        SolverMethod::ForwardPush,
        SolverMethod::BackwardPush,
        SolverMethod::Bidirectional,
    ];

    /// Canonical kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SolverMethod::Neumann => "neumann",
            SolverMethod::RandomWalk => "random-walk",
            SolverMethod::ForwardPush => "forward-push",
            SolverMethod::BackwardPush => "backward-push",
            SolverMethod::Bidirectional => "bidirectional",
        }
    }
}

impl std::fmt::Display for SolverMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SolverMethod {
    type Err = ValidationError;

    /// Accepts kebab-case, snake_case and camelCase spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        match normalised.as_str() {
            "neumann" => Ok(SolverMethod::Neumann),
            "randomwalk" => Ok(SolverMethod::RandomWalk),
            "forwardpush" => Ok(SolverMethod::ForwardPush),
            "backwardpush" => Ok(SolverMethod::BackwardPush),
            "bidirectional" => Ok(SolverMethod::Bidirectional),
            _ => Err(ValidationError::out_of_range(
                "method",
                s,
                "one of neumann, random-walk, forward-push, backward-push, bidirectional",
            )),
        }
    }
}

/// Which Monte Carlo estimator the random-walk solver uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WalkEstimator {
    /// Every visited node contributes `W * z_u`.
    #[default]
    Collision,
    /// Only the absorbing node contributes `W * z_u / p_absorb(u)`.
    Absorption,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Default approximation tolerance.
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// Default iteration budget.
pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

/// Default failure probability for the walk-count formula.
pub const DEFAULT_CONFIDENCE_DELTA: f64 = 0.01;

/// Default cap on the number of walks per target.
pub const DEFAULT_MAX_WALKS: usize = 1_000_000;

/// Per-request solver configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Estimator to run.
    pub method: SolverMethod,
    /// Target accuracy (absolute, infinity norm).
    pub epsilon: f64,
    /// Iterations, walk rounds, or push rounds, depending on the method.
    pub max_iterations: usize,
    /// Relaxation for Neumann, forced absorption for random walks, push
    /// damping for the push family. `None` selects each method's natural
    /// value.
    pub alpha: Option<f64>,
    /// Entries of `x` to estimate. Empty means all entries.
    pub targets: Vec<usize>,
    /// Seed for the random-walk RNG. `None` draws from entropy.
    pub seed: Option<u64>,
    /// Explicit number of walks per target.
    pub num_walks: Option<usize>,
    /// Failure probability `delta` used in the walk-count formula.
    pub confidence_delta: f64,
    /// Upper bound on the derived walk count.
    pub max_walks: usize,
    /// Explicit push threshold.
    pub push_threshold: Option<f64>,
    /// Run the dominance analyzer before dispatching.
    pub check_dominance: bool,
    /// Wall-clock budget.
    pub max_time: Option<Duration>,
    /// Random-walk estimator.
    pub estimator: WalkEstimator,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            method: SolverMethod::Neumann,
            epsilon: DEFAULT_EPSILON,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            alpha: None,
            targets: Vec::new(),
            seed: None,
            num_walks: None,
            confidence_delta: DEFAULT_CONFIDENCE_DELTA,
            max_walks: DEFAULT_MAX_WALKS,
            push_threshold: None,
            check_dominance: true,
            max_time: None,
            estimator: WalkEstimator::Collision,
        }
    }
}

impl SolverConfig {
    /// Configuration for `method` with default tolerances.
    pub fn new(method: SolverMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    /// Set the tolerance.
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Set the iteration budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the method-specific alpha.
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = Some(alpha);
        self
    }

    /// Set the entries to estimate.
    pub fn with_targets(mut self, targets: impl Into<Vec<usize>>) -> Self {
        self.targets = targets.into();
        self
    }

    /// Set the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set an explicit walk count.
    pub fn with_num_walks(mut self, num_walks: usize) -> Self {
        self.num_walks = Some(num_walks);
        self
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Per-iteration convergence snapshot.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConvergenceInfo {
    /// Iteration (or round) index, 0-based.
    pub iteration: usize,
    /// Method-specific progress measure: update norm for Neumann, standard
    /// error for walks, error bound for push.
    pub residual_norm: f64,
}

/// Uniform result returned by every estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveResult {
    /// Full solution vector, when the method produced one.
    pub solution: Option<Vec<f64>>,
    /// Estimates of selected entries.
    pub entry_estimates: Option<BTreeMap<usize, f64>>,
    /// Iterations, walk rounds, or push rounds performed.
    pub iterations: usize,
    /// `||b - Ax||_inf` for full-vector methods, the standard error for
    /// random walks, the certified error bound for forward and
    /// bidirectional push.
    pub residual_norm: f64,
    /// Whether the requested accuracy was reached.
    pub converged: bool,
    /// Estimator that produced the result.
    pub method: SolverMethod,
    /// Non-fatal diagnostics.
    pub warnings: Vec<String>,
    /// Largest standard error over the estimated entries (random walk).
    pub standard_error: Option<f64>,
    /// Largest certified error bound over the estimated entries (push).
    pub error_bound: Option<f64>,
    /// Matrix entries touched: SpMV non-zeros, walk steps, or pushed edges.
    pub work: u64,
    /// Wall-clock time taken.
    pub wall_time: Duration,
    /// Per-iteration convergence history.
    pub convergence_history: Vec<ConvergenceInfo>,
}

impl SolveResult {
    /// An empty result for `method` (used for `n == 0` and as a seed for
    /// partial results).
    pub fn empty(method: SolverMethod) -> Self {
        Self {
            solution: None,
            entry_estimates: None,
            iterations: 0,
            residual_norm: 0.0,
            converged: true,
            method,
            warnings: Vec::new(),
            standard_error: None,
            error_bound: None,
            work: 0,
            wall_time: Duration::ZERO,
            convergence_history: Vec::new(),
        }
    }

    /// Estimate of entry `i`, from the entry map or the full vector.
    pub fn entry(&self, i: usize) -> Option<f64> {
        self.entry_estimates
            .as_ref()
            .and_then(|m| m.get(&i).copied())
            .or_else(|| self.solution.as_ref().and_then(|x| x.get(i).copied()))
    }
}
