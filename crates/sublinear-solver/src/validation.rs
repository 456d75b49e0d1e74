//! Input validation for solver operations.
//!
//! All validation functions run eagerly before any computation begins, ensuring
//! callers receive clear diagnostics instead of numerical failures or resource
//! exhaustion. Structural problems are reported as [`SolverError::ShapeMismatch`]
//! or [`SolverError::IndexOutOfRange`]; value and parameter problems as
//! [`ValidationError`] (wrapped in [`SolverError::InvalidInput`]).
//!
//! # Limits
//!
//! | Resource      | Limit                  | Constant          |
//! |---------------|------------------------|-------------------|
//! | Dimension     | 10,000,000             | [`MAX_NODES`]     |
//! | Non-zeros     | 100,000,000            | [`MAX_EDGES`]     |
//! | Iterations    | 1,000,000              | [`MAX_ITERATIONS`]|
//! | Walks/target  | 100,000,000            | [`MAX_WALKS`]     |

use tracing::warn;

use crate::error::{SolverError, ValidationError};
use crate::matrix::MatrixView;
use crate::types::{SolveResult, SolverConfig};

// ---------------------------------------------------------------------------
// Resource limits
// ---------------------------------------------------------------------------

/// Maximum matrix dimension.
pub const MAX_NODES: usize = 10_000_000;

/// Maximum number of non-zero entries.
pub const MAX_EDGES: usize = 100_000_000;

/// Maximum solver iterations to prevent runaway computation.
pub const MAX_ITERATIONS: usize = 1_000_000;

/// Maximum number of walks per target.
pub const MAX_WALKS: usize = 100_000_000;

// ---------------------------------------------------------------------------
// Matrix / vector validation
// ---------------------------------------------------------------------------

/// Check a declared `rows x cols` shape against [`MAX_NODES`].
///
/// Runs before any storage sized by the shape is allocated.
///
/// # Errors
///
/// [`ValidationError::MatrixTooLarge`] if either dimension exceeds the limit.
pub fn validate_shape(rows: usize, cols: usize) -> Result<(), ValidationError> {
    if rows > MAX_NODES || cols > MAX_NODES {
        return Err(ValidationError::MatrixTooLarge {
            rows,
            cols,
            max_dim: MAX_NODES,
        });
    }
    Ok(())
}

/// Check that `matrix` is square and within [`MAX_NODES`].
///
/// Returns the dimension `n`.
///
/// # Errors
///
/// - [`SolverError::ShapeMismatch`] if the matrix is not square.
/// - [`ValidationError::MatrixTooLarge`] if the limit is exceeded.
pub fn validate_square(matrix: &dyn MatrixView) -> Result<usize, SolverError> {
    let (rows, cols) = matrix.shape();
    if rows != cols {
        return Err(SolverError::ShapeMismatch(format!(
            "matrix must be square: got {rows}x{cols}"
        )));
    }
    validate_shape(rows, cols)?;
    Ok(rows)
}

/// Check every stored value of `matrix` is finite. O(nnz).
///
/// # Errors
///
/// [`ValidationError::NonFiniteValue`] naming the first offending position,
/// or [`ValidationError::TooManyNonZeros`] past [`MAX_EDGES`].
pub fn validate_matrix_values(matrix: &dyn MatrixView) -> Result<(), ValidationError> {
    let mut stored = 0usize;
    for i in 0..matrix.dim() {
        for (j, v) in matrix.row_entries(i) {
            if !v.is_finite() {
                return Err(ValidationError::NonFiniteValue(format!(
                    "A[{i}][{j}] = {v}"
                )));
            }
            stored += 1;
        }
        if stored > MAX_EDGES {
            return Err(ValidationError::TooManyNonZeros { max: MAX_EDGES });
        }
    }
    Ok(())
}

/// Validate a right-hand side vector.
///
/// Emits a [`tracing::warn`] when every entry is zero (the solution is then
/// trivially zero).
///
/// # Errors
///
/// - [`SolverError::ShapeMismatch`] if `rhs.len() != n`.
/// - [`ValidationError::NonFiniteValue`] for NaN or infinite entries.
pub fn validate_rhs(rhs: &[f64], n: usize) -> Result<(), SolverError> {
    if rhs.len() != n {
        return Err(SolverError::ShapeMismatch(format!(
            "rhs length {} does not match matrix dimension {n}",
            rhs.len()
        )));
    }
    if let Some((i, v)) = rhs.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(ValidationError::NonFiniteValue(format!("b[{i}] = {v}")).into());
    }
    if n > 0 && rhs.iter().all(|v| *v == 0.0) {
        warn!("rhs vector is all zeros; solution is trivially zero");
    }
    Ok(())
}

/// Check every index in `targets` is below `n`.
///
/// # Errors
///
/// [`SolverError::IndexOutOfRange`] for the first offending index.
pub fn validate_targets(targets: &[usize], n: usize) -> Result<(), SolverError> {
    match targets.iter().find(|&&t| t >= n) {
        Some(&index) => Err(SolverError::IndexOutOfRange { index, dim: n }),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Parameter validation
// ---------------------------------------------------------------------------

/// Validate tolerance and iteration budget.
///
/// # Errors
///
/// [`ValidationError::ParameterOutOfRange`] if `epsilon` is not a positive
/// finite number or `max_iterations` is outside `[1, MAX_ITERATIONS]`.
pub fn validate_params(epsilon: f64, max_iterations: usize) -> Result<(), ValidationError> {
    if !epsilon.is_finite() || epsilon <= 0.0 {
        return Err(ValidationError::out_of_range(
            "epsilon",
            epsilon,
            "finite and > 0",
        ));
    }
    if max_iterations == 0 || max_iterations > MAX_ITERATIONS {
        return Err(ValidationError::out_of_range(
            "max_iterations",
            max_iterations,
            format!("[1, {MAX_ITERATIONS}]"),
        ));
    }
    Ok(())
}

/// Validate an optional alpha in `(0, 1]`.
///
/// # Errors
///
/// [`ValidationError::ParameterOutOfRange`] otherwise.
pub fn validate_alpha(alpha: Option<f64>) -> Result<(), ValidationError> {
    match alpha {
        Some(a) if !(a.is_finite() && a > 0.0 && a <= 1.0) => {
            Err(ValidationError::out_of_range("alpha", a, "(0, 1]"))
        }
        _ => Ok(()),
    }
}

/// Validate the whole [`SolverConfig`] against a system of dimension `n`.
///
/// # Errors
///
/// [`SolverError::IndexOutOfRange`] for bad targets, otherwise
/// [`SolverError::InvalidInput`].
pub fn validate_config(config: &SolverConfig, n: usize) -> Result<(), SolverError> {
    validate_params(config.epsilon, config.max_iterations)?;
    validate_alpha(config.alpha)?;
    validate_targets(&config.targets, n)?;

    let delta = config.confidence_delta;
    if !(delta.is_finite() && delta > 0.0 && delta < 1.0) {
        return Err(ValidationError::out_of_range("confidence_delta", delta, "(0, 1)").into());
    }
    if config.max_walks == 0 || config.max_walks > MAX_WALKS {
        return Err(ValidationError::out_of_range(
            "max_walks",
            config.max_walks,
            format!("[1, {MAX_WALKS}]"),
        )
        .into());
    }
    if let Some(walks) = config.num_walks {
        if walks == 0 || walks > MAX_WALKS {
            return Err(ValidationError::out_of_range(
                "num_walks",
                walks,
                format!("[1, {MAX_WALKS}]"),
            )
            .into());
        }
    }
    if let Some(threshold) = config.push_threshold {
        if threshold.is_nan() {
            return Err(ValidationError::NonFiniteValue("push_threshold is NaN".into()).into());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output validation
// ---------------------------------------------------------------------------

/// Check that a result contains only finite numbers.
///
/// # Errors
///
/// [`ValidationError::NonFiniteValue`] naming the offending field.
pub fn validate_output(result: &SolveResult) -> Result<(), ValidationError> {
    if let Some(x) = &result.solution {
        if let Some((i, v)) = x.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(ValidationError::NonFiniteValue(format!("solution[{i}] = {v}")));
        }
    }
    if let Some(entries) = &result.entry_estimates {
        if let Some((i, v)) = entries.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ValidationError::NonFiniteValue(format!("entry[{i}] = {v}")));
        }
    }
    if result.residual_norm.is_nan() {
        return Err(ValidationError::NonFiniteValue("residual_norm is NaN".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::DenseMatrix;
    use crate::types::{CsrMatrix, SolverMethod};

    #[test]
    fn square_check() {
        let m = DenseMatrix::new(2, 3, vec![0.0; 6]).unwrap();
        assert!(matches!(validate_square(&m), Err(SolverError::ShapeMismatch(_))));
        let m = CsrMatrix::<f64>::identity(4);
        assert_eq!(validate_square(&m).unwrap(), 4);
    }

    #[test]
    fn declared_shape_limits() {
        assert!(validate_shape(MAX_NODES, MAX_NODES).is_ok());
        assert!(matches!(
            validate_shape(MAX_NODES + 1, 1),
            Err(ValidationError::MatrixTooLarge { rows, .. }) if rows == MAX_NODES + 1
        ));
        assert!(validate_shape(1, usize::MAX).is_err());
    }

    #[test]
    fn non_finite_matrix_value() {
        let m = DenseMatrix::from_rows(vec![vec![1.0, f64::NAN], vec![0.0, 1.0]]).unwrap();
        let err = validate_matrix_values(&m).unwrap_err();
        assert!(err.to_string().contains("A[0][1]"));
    }

    #[test]
    fn rhs_checks() {
        assert!(matches!(validate_rhs(&[1.0], 2), Err(SolverError::ShapeMismatch(_))));
        assert!(matches!(
            validate_rhs(&[1.0, f64::INFINITY], 2),
            Err(SolverError::InvalidInput(ValidationError::NonFiniteValue(_)))
        ));
        assert!(validate_rhs(&[0.0, 0.0], 2).is_ok());
    }

    #[test]
    fn params_checks() {
        assert!(validate_params(1e-6, 10).is_ok());
        assert!(validate_params(0.0, 10).is_err());
        assert!(validate_params(f64::NAN, 10).is_err());
        assert!(validate_params(1e-6, 0).is_err());
        assert!(validate_params(1e-6, MAX_ITERATIONS + 1).is_err());
        assert!(validate_alpha(Some(1.0)).is_ok());
        assert!(validate_alpha(Some(0.0)).is_err());
        assert!(validate_alpha(Some(1.5)).is_err());
        assert!(validate_alpha(None).is_ok());
    }

    #[test]
    fn config_targets_out_of_range() {
        let config = SolverConfig::new(SolverMethod::RandomWalk).with_targets(vec![0, 5]);
        let err = validate_config(&config, 3).unwrap_err();
        assert!(matches!(err, SolverError::IndexOutOfRange { index: 5, dim: 3 }));
    }

    #[test]
    fn config_walk_counts() {
        let mut config = SolverConfig::default();
        config.num_walks = Some(0);
        assert!(validate_config(&config, 3).is_err());
        config.num_walks = None;
        config.confidence_delta = 1.0;
        assert!(validate_config(&config, 3).is_err());
    }

    #[test]
    fn output_nan_rejected() {
        let mut result = SolveResult::empty(SolverMethod::Neumann);
        result.solution = Some(vec![1.0, f64::NAN]);
        assert!(validate_output(&result).is_err());
        result.solution = Some(vec![1.0, 2.0]);
        assert!(validate_output(&result).is_ok());
    }
}
