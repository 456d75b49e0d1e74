//! Error types for the solver crate.
//!
//! Structural problems (shape, indices, degenerate diagonals) and parameter
//! problems are raised before any iteration starts. Failures detected while
//! iterating (divergence, cancellation) carry the best-effort partial result
//! so callers can still inspect the iterate.
//!
//! Running out of iterations is deliberately *not* an error: solvers return a
//! [`SolveResult`] with `converged == false` instead.

use crate::types::SolveResult;

/// Primary error type for solver operations.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    /// Matrix or vector dimensions are inconsistent.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// An index (row, column, or target entry) lies outside `0..n`.
    #[error("index {index} out of range for dimension {dim}")]
    IndexOutOfRange {
        /// Offending index.
        index: usize,
        /// Dimension the index was checked against.
        dim: usize,
    },

    /// A diagonal entry is exactly zero, so `D^{-1}` does not exist.
    #[error("degenerate diagonal: A[{row}][{row}] is zero")]
    DegenerateDiagonal {
        /// Row with the zero diagonal.
        row: usize,
    },

    /// The matrix is not strictly diagonally dominant.
    #[error("matrix is not strictly diagonally dominant (dominance ratio {ratio:.6})")]
    NonDominantMatrix {
        /// Minimum over rows of `(|a_ii| - sum_{j != i} |a_ij|) / |a_ii|`.
        ratio: f64,
    },

    /// The Neumann update norm stopped decreasing.
    #[error("divergence detected at iteration {iteration}")]
    DivergenceDetected {
        /// Iteration at which divergence was declared.
        iteration: usize,
        /// Iterate at the point divergence was detected.
        partial: Box<SolveResult>,
    },

    /// The push threshold can never be reached.
    #[error("push threshold {threshold:.3e} is unreachable: {detail}")]
    ResidualOverflow {
        /// Threshold that was rejected.
        threshold: f64,
        /// Human-readable explanation.
        detail: String,
    },

    /// The caller cancelled the solve.
    #[error("solve cancelled after {} iterations", partial.iterations)]
    Cancelled {
        /// Best-effort result accumulated before cancellation.
        partial: Box<SolveResult>,
    },

    /// A NaN or infinity appeared during iteration.
    #[error("numerical instability at iteration {iteration}: {detail}")]
    NumericalInstability {
        /// Iteration at which the instability was detected.
        iteration: usize,
        /// Human-readable explanation.
        detail: String,
    },

    /// The caller supplied invalid input (parameters, CSR structure, values).
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),
}

impl SolverError {
    /// Partial result attached to the error, if any.
    pub fn partial(&self) -> Option<&SolveResult> {
        match self {
            SolverError::DivergenceDetected { partial, .. } | SolverError::Cancelled { partial } => {
                Some(partial)
            }
            _ => None,
        }
    }

    /// Stable machine-readable error kind, used by the JSON interface.
    pub fn kind(&self) -> &'static str {
        match self {
            SolverError::ShapeMismatch(_) => "shape-mismatch",
            SolverError::IndexOutOfRange { .. } => "index-out-of-range",
            SolverError::DegenerateDiagonal { .. } => "degenerate-diagonal",
            SolverError::NonDominantMatrix { .. } => "non-dominant-matrix",
            SolverError::DivergenceDetected { .. } => "divergence-detected",
            SolverError::ResidualOverflow { .. } => "residual-overflow",
            SolverError::Cancelled { .. } => "cancelled",
            SolverError::NumericalInstability { .. } => "numerical-instability",
            SolverError::InvalidInput(
                ValidationError::MatrixTooLarge { .. } | ValidationError::TooManyNonZeros { .. },
            ) => "matrix-too-large",
            SolverError::InvalidInput(_) => "invalid-input",
        }
    }
}

/// Validation errors for solver inputs.
///
/// These are raised eagerly before any computation begins so that callers get
/// clear diagnostics rather than mysterious numerical failures.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// CSR/COO array lengths are inconsistent.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A value is NaN or infinite where a finite number is required.
    #[error("non-finite value detected: {0}")]
    NonFiniteValue(String),

    /// The `row_ptr` array is not monotonically non-decreasing.
    #[error("row_ptr is not monotonically non-decreasing at position {position}")]
    NonMonotonicRowPtrs {
        /// Position in `row_ptr` where the violation was detected.
        position: usize,
    },

    /// A parameter is outside its valid range.
    #[error("parameter out of range: {name} = {value} (expected {expected})")]
    ParameterOutOfRange {
        /// Name of the parameter.
        name: String,
        /// The invalid value (as a string for flexibility).
        value: String,
        /// Human-readable description of the valid range.
        expected: String,
    },

    /// Matrix size exceeds the implementation limit.
    #[error("matrix size {rows}x{cols} exceeds maximum supported {max_dim}x{max_dim}")]
    MatrixTooLarge {
        /// Number of rows.
        rows: usize,
        /// Number of columns.
        cols: usize,
        /// Maximum supported dimension.
        max_dim: usize,
    },

    /// Stored entries exceed the implementation limit.
    #[error("matrix stores more than {max} non-zero entries")]
    TooManyNonZeros {
        /// Maximum supported non-zero count.
        max: usize,
    },
}

impl ValidationError {
    pub(crate) fn out_of_range(
        name: &str,
        value: impl ToString,
        expected: impl Into<String>,
    ) -> Self {
        ValidationError::ParameterOutOfRange {
            name: name.into(),
            value: value.to_string(),
            expected: expected.into(),
        }
    }
}
