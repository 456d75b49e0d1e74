//! Jacobi-preconditioned Neumann series solver.
//!
//! Solves `Ax = b` by splitting `A = D(I - M)` (where `D` is the diagonal
//! part) and summing the series `x = sum_k M^k D^{-1} b` through the
//! equivalent fixed-point iteration
//!
//! ```text
//! x_0     = D^{-1} b
//! x_{k+1} = x_k + omega * D^{-1} (b - A x_k)
//! ```
//!
//! `omega = 1` is the plain series; `omega in (0, 1)` damps each step. For a
//! strictly row dominant matrix the update norm contracts by at least
//! `1 - omega + omega * ||M||_inf < 1` per step, so `||x_{k+1} - x_k||_inf`
//! is non-increasing.
//!
//! # Stopping
//!
//! The solver reports convergence once both the update norm and the residual
//! `||b - A x_k||_inf` are below `epsilon`. If the update fails to shrink
//! for [`DIVERGENCE_WINDOW`] consecutive iterations the solve is aborted with
//! [`SolverError::DivergenceDetected`].
//!
//! Under strict column dominance the inf-norm of the update may grow for a
//! while even though the iteration converges. What contracts there is
//! `||D (x_{k+1} - x_k)||_1`, since `D M D^{-1} = I - A D^{-1}` has 1-norm
//! below one. [`ProgressNorm`] selects which of the two is watched.

use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::analysis::JacobiSplit;
use crate::budget::{BudgetEnforcer, BudgetStatus, CancellationToken};
use crate::error::{SolverError, ValidationError};
use crate::matrix::MatrixView;
use crate::traits::SolverEngine;
use crate::types::{ConvergenceInfo, SolveResult, SolverMethod};
use crate::validation::{validate_params, validate_rhs, validate_square};

/// Consecutive non-decreasing update norms that count as divergence.
pub const DIVERGENCE_WINDOW: usize = 3;

/// Updates below `ROUNDOFF_FACTOR * EPSILON * max(||x||_inf, 1)` are treated
/// as round-off and never count towards divergence.
const ROUNDOFF_FACTOR: f64 = 64.0;

/// Norm in which the divergence detector measures each update `delta`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProgressNorm {
    /// `||delta||_inf`, contracting for strictly row dominant matrices.
    #[default]
    MaxUpdate,
    /// `||D delta||_1`, contracting for strictly column dominant matrices.
    ColumnWeighted,
}

// ---------------------------------------------------------------------------
// NeumannSolver
// ---------------------------------------------------------------------------

/// Neumann series solver for diagonally dominant systems.
///
/// # Example
///
/// ```rust
/// use sublinear_solver::matrix::DenseMatrix;
/// use sublinear_solver::neumann::NeumannSolver;
///
/// let a = DenseMatrix::from_rows(vec![vec![4.0, -1.0], vec![-1.0, 4.0]]).unwrap();
/// let result = NeumannSolver::new(1e-10, 200).solve(&a, &[1.0, 2.0]).unwrap();
/// let x = result.solution.unwrap();
/// assert!((x[0] - 6.0 / 15.0).abs() < 1e-9);
/// assert!((x[1] - 9.0 / 15.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone)]
pub struct NeumannSolver {
    /// Target accuracy for both update norm and residual (infinity norm).
    pub epsilon: f64,
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Relaxation factor `omega` in `(0, 1]`.
    pub relaxation: f64,
    /// Norm watched by the divergence detector.
    pub progress_norm: ProgressNorm,
}

impl NeumannSolver {
    /// Create a new `NeumannSolver` with `omega = 1`.
    pub fn new(epsilon: f64, max_iterations: usize) -> Self {
        Self {
            epsilon,
            max_iterations,
            relaxation: 1.0,
            progress_norm: ProgressNorm::MaxUpdate,
        }
    }

    /// Set the relaxation factor.
    pub fn with_relaxation(mut self, relaxation: f64) -> Self {
        self.relaxation = relaxation;
        self
    }

    pub fn with_progress_norm(mut self, progress_norm: ProgressNorm) -> Self {
        self.progress_norm = progress_norm;
        self
    }

    /// A-priori iteration estimate `ceil(ln(epsilon / ||x_0||) / ln(rho))`.
    ///
    /// Returns 0 when `x_0` already meets the tolerance and `usize::MAX`
    /// when `rho >= 1` (no guarantee).
    pub fn estimate_iterations(rho: f64, epsilon: f64, x0_norm: f64) -> usize {
        if x0_norm <= epsilon {
            return 0;
        }
        if rho <= 0.0 {
            return 1;
        }
        if rho >= 1.0 {
            return usize::MAX;
        }
        ((epsilon / x0_norm).ln() / rho.ln()).ceil() as usize
    }

    /// Solve without a wall-clock limit or cancellation.
    ///
    /// # Errors
    ///
    /// See [`solve_with_budget`](Self::solve_with_budget).
    pub fn solve(&self, matrix: &dyn MatrixView, rhs: &[f64]) -> Result<SolveResult, SolverError> {
        let mut budget = BudgetEnforcer::new(self.max_iterations, None, CancellationToken::new());
        self.solve_with_budget(matrix, rhs, &mut budget)
    }

    /// Run the iteration under `budget`.
    ///
    /// # Errors
    ///
    /// - [`SolverError::ShapeMismatch`] for a non-square matrix or wrong rhs
    ///   length.
    /// - [`SolverError::DegenerateDiagonal`] if some `A_ii == 0`.
    /// - [`SolverError::DivergenceDetected`] if the update stops shrinking
    ///   in the configured [`ProgressNorm`].
    /// - [`SolverError::Cancelled`] if the budget's token fires.
    /// - [`SolverError::NumericalInstability`] on NaN/Inf.
    #[instrument(skip(self, matrix, rhs, budget), fields(n = matrix.dim(), omega = self.relaxation))]
    pub fn solve_with_budget(
        &self,
        matrix: &dyn MatrixView,
        rhs: &[f64],
        budget: &mut BudgetEnforcer,
    ) -> Result<SolveResult, SolverError> {
        let start = Instant::now();

        // ------------------------------------------------------------------
        // Input validation
        // ------------------------------------------------------------------
        let n = validate_square(matrix)?;
        validate_rhs(rhs, n)?;
        validate_params(self.epsilon, self.max_iterations)?;
        let omega = self.relaxation;
        if !(omega.is_finite() && omega > 0.0 && omega <= 1.0) {
            return Err(ValidationError::out_of_range("relaxation", omega, "(0, 1]").into());
        }

        let mut result = SolveResult::empty(SolverMethod::Neumann);
        if n == 0 {
            result.solution = Some(Vec::new());
            result.wall_time = start.elapsed();
            return Ok(result);
        }

        let split = JacobiSplit::new(matrix)?;
        let nnz = matrix.nnz() as u64;

        // ------------------------------------------------------------------
        // Iteration
        //
        //   x_0 = D^{-1} b
        //   loop:
        //       r     = b - A x_k
        //       delta = omega * D^{-1} r      (= x_{k+1} - x_k)
        //       stop if ||delta|| < eps and ||r|| < eps
        //       x_{k+1} = x_k + delta
        // ------------------------------------------------------------------
        let mut x = split.scaled_rhs(rhs);
        let mut delta = vec![0.0f64; n];
        let mut history = Vec::with_capacity(self.max_iterations.min(256));
        let mut prev_progress = f64::INFINITY;
        let mut stalled = 0usize;
        let mut converged = false;
        let mut residual_norm;

        loop {
            residual_norm = 0.0f64;
            let mut update_norm = 0.0f64;
            let mut weighted_update = 0.0f64;
            let mut x_norm = 0.0f64;
            for i in 0..n {
                let ax: f64 = matrix.row_entries(i).map(|(j, a)| a * x[j]).sum();
                let r = rhs[i] - ax;
                let d = omega * r / split.diag(i);
                delta[i] = d;
                residual_norm = residual_norm.max(r.abs());
                update_norm = update_norm.max(d.abs());
                weighted_update += omega * r.abs();
                x_norm = x_norm.max(x[i].abs());
            }
            let progress = match self.progress_norm {
                ProgressNorm::MaxUpdate => update_norm,
                ProgressNorm::ColumnWeighted => weighted_update,
            };
            result.work += nnz;

            if !residual_norm.is_finite() {
                return Err(SolverError::NumericalInstability {
                    iteration: budget.iterations_used(),
                    detail: format!("residual became {residual_norm}"),
                });
            }

            if update_norm < self.epsilon && residual_norm < self.epsilon {
                converged = true;
                break;
            }

            match budget.check_iteration() {
                BudgetStatus::Continue => {}
                BudgetStatus::IterationsExhausted | BudgetStatus::TimeExhausted => break,
                BudgetStatus::Cancelled => {
                    result.solution = Some(x);
                    result.iterations = budget.iterations_used();
                    result.residual_norm = residual_norm;
                    result.converged = false;
                    result.convergence_history = history;
                    result.wall_time = start.elapsed();
                    return Err(SolverError::Cancelled {
                        partial: Box::new(result),
                    });
                }
            }
            let iteration = budget.iterations_used();

            let roundoff = ROUNDOFF_FACTOR * f64::EPSILON * x_norm.max(1.0);
            if progress >= prev_progress && update_norm > roundoff {
                stalled += 1;
            } else {
                stalled = 0;
            }
            if stalled >= DIVERGENCE_WINDOW {
                warn!(
                    iteration,
                    progress,
                    prev_progress,
                    norm = ?self.progress_norm,
                    "update not shrinking; neumann series diverging",
                );
                result.solution = Some(x);
                result.iterations = iteration;
                result.residual_norm = residual_norm;
                result.converged = false;
                result.convergence_history = history;
                result.wall_time = start.elapsed();
                return Err(SolverError::DivergenceDetected {
                    iteration,
                    partial: Box::new(result),
                });
            }

            for (xi, di) in x.iter_mut().zip(&delta) {
                *xi += di;
            }
            history.push(ConvergenceInfo {
                iteration,
                residual_norm: update_norm,
            });
            debug!(iteration, update_norm, residual_norm, "neumann iteration");
            prev_progress = progress;
        }

        if converged {
            info!(iterations = budget.iterations_used(), residual_norm, "converged");
        } else {
            debug!(iterations = budget.iterations_used(), residual_norm, "budget exhausted before convergence");
        }

        result.solution = Some(x);
        result.iterations = budget.iterations_used();
        result.residual_norm = residual_norm;
        result.converged = converged;
        result.convergence_history = history;
        result.wall_time = start.elapsed();
        Ok(result)
    }
}

impl SolverEngine for NeumannSolver {
    fn solve(
        &self,
        matrix: &dyn MatrixView,
        rhs: &[f64],
        budget: &mut BudgetEnforcer,
    ) -> Result<SolveResult, SolverError> {
        self.solve_with_budget(matrix, rhs, budget)
    }

    fn method(&self) -> SolverMethod {
        SolverMethod::Neumann
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::DenseMatrix;
    use crate::types::CsrMatrix;
    use approx::assert_relative_eq;

    /// Helper: build a diagonally dominant tridiagonal matrix.
    fn tridiag(n: usize, diag_val: f64, off_val: f64) -> CsrMatrix<f64> {
        let mut entries = Vec::new();
        for i in 0..n {
            entries.push((i, i, diag_val));
            if i > 0 {
                entries.push((i, i - 1, off_val));
            }
            if i + 1 < n {
                entries.push((i, i + 1, off_val));
            }
        }
        CsrMatrix::<f64>::from_coo(n, n, entries).unwrap()
    }

    #[test]
    fn test_two_by_two() {
        let a = DenseMatrix::from_rows(vec![vec![4.0, -1.0], vec![-1.0, 4.0]]).unwrap();
        let result = NeumannSolver::new(1e-6, 1000).solve(&a, &[1.0, 2.0]).unwrap();
        assert!(result.converged);
        let x = result.solution.as_ref().unwrap();
        assert_relative_eq!(x[0], 6.0 / 15.0, epsilon = 1e-6);
        assert_relative_eq!(x[1], 9.0 / 15.0, epsilon = 1e-6);
        assert!(result.residual_norm < 1e-6);
        assert_eq!(result.method, SolverMethod::Neumann);
    }

    #[test]
    fn test_solve_diagonal_is_immediate() {
        let a = CsrMatrix::<f64>::from_coo(3, 3, vec![(0, 0, 0.5), (1, 1, 2.0), (2, 2, 4.0)]).unwrap();
        let result = NeumannSolver::new(1e-12, 10).solve(&a, &[1.0, 1.0, 1.0]).unwrap();
        assert!(result.converged);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.solution.unwrap(), vec![2.0, 0.5, 0.25]);
    }

    #[test]
    fn test_update_norm_monotone() {
        let a = tridiag(20, 3.0, -1.0);
        let rhs: Vec<f64> = (0..20).map(|i| (i as f64).sin()).collect();
        let result = NeumannSolver::new(1e-12, 500).solve(&a, &rhs).unwrap();
        assert!(result.converged);
        assert!(result.convergence_history.len() > 2);
        for window in result.convergence_history.windows(2) {
            assert!(
                window[1].residual_norm <= window[0].residual_norm * (1.0 + 1e-12),
                "update norm increased: {} -> {}",
                window[0].residual_norm,
                window[1].residual_norm,
            );
        }
    }

    #[test]
    fn test_relaxed_iteration_converges() {
        let a = tridiag(10, 4.0, -1.0);
        let rhs = vec![1.0; 10];
        let plain = NeumannSolver::new(1e-10, 1000).solve(&a, &rhs).unwrap();
        let damped = NeumannSolver::new(1e-10, 1000)
            .with_relaxation(0.5)
            .solve(&a, &rhs)
            .unwrap();
        assert!(damped.converged);
        assert!(damped.iterations > plain.iterations);
        let (xp, xd) = (plain.solution.unwrap(), damped.solution.unwrap());
        for (p, d) in xp.iter().zip(&xd) {
            assert_relative_eq!(p, d, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_divergence_detected() {
        let a = DenseMatrix::from_rows(vec![vec![1.0, 2.0], vec![2.0, 1.0]]).unwrap();
        let err = NeumannSolver::new(1e-6, 100).solve(&a, &[1.0, 1.0]).unwrap_err();
        match err {
            SolverError::DivergenceDetected { iteration, partial } => {
                assert_eq!(iteration, DIVERGENCE_WINDOW + 1);
                assert!(partial.solution.is_some());
                assert!(!partial.converged);
            }
            other => panic!("expected DivergenceDetected, got {other:?}"),
        }
    }

    #[test]
    fn test_column_weighted_progress_tolerates_growing_updates() {
        // A_ii = 10^i, A_{i,i+1} = 5 * 10^i: column ratio 1/2, rows not dominant
        let n = 5;
        let mut entries = Vec::new();
        for i in 0..n {
            let scale = 10f64.powi(i as i32);
            entries.push((i, i, scale));
            if i + 1 < n {
                entries.push((i, i + 1, 5.0 * scale));
            }
        }
        let a = CsrMatrix::<f64>::from_coo(n, n, entries).unwrap();
        let mut b = vec![0.0; n];
        b[n - 1] = 1e4;

        let err = NeumannSolver::new(1e-8, 100).solve(&a, &b).unwrap_err();
        assert!(
            matches!(err, SolverError::DivergenceDetected { iteration: 4, .. }),
            "{err:?}"
        );

        let result = NeumannSolver::new(1e-8, 100)
            .with_progress_norm(ProgressNorm::ColumnWeighted)
            .solve(&a, &b)
            .unwrap();
        assert!(result.converged);
        assert_eq!(result.iterations, n - 1);
        assert_eq!(result.solution.unwrap(), vec![625.0, -125.0, 25.0, -5.0, 1.0]);
    }

    #[test]
    fn test_column_weighted_progress_still_flags_divergence() {
        let a = DenseMatrix::from_rows(vec![vec![1.0, 2.0], vec![2.0, 1.0]]).unwrap();
        let err = NeumannSolver::new(1e-6, 100)
            .with_progress_norm(ProgressNorm::ColumnWeighted)
            .solve(&a, &[1.0, 1.0])
            .unwrap_err();
        assert!(matches!(err, SolverError::DivergenceDetected { .. }), "{err:?}");
    }

    #[test]
    fn test_budget_exhaustion_is_not_an_error() {
        let a = tridiag(10, 2.1, -1.0);
        let result = NeumannSolver::new(1e-14, 3).solve(&a, &[1.0; 10]).unwrap();
        assert!(!result.converged);
        assert_eq!(result.iterations, 3);
        assert!(result.residual_norm > 1e-14);
    }

    #[test]
    fn test_cancelled_returns_partial() {
        let a = tridiag(10, 4.0, -1.0);
        let token = CancellationToken::new();
        token.cancel();
        let mut budget = BudgetEnforcer::new(100, None, token);
        let err = NeumannSolver::new(1e-12, 100)
            .solve_with_budget(&a, &[1.0; 10], &mut budget)
            .unwrap_err();
        let partial = err.partial().unwrap();
        assert_eq!(partial.iterations, 0);
        assert_eq!(partial.solution.as_ref().unwrap().len(), 10);
    }

    #[test]
    fn test_degenerate_diagonal() {
        let a = DenseMatrix::from_rows(vec![vec![0.0, 1.0], vec![1.0, 2.0]]).unwrap();
        let err = NeumannSolver::new(1e-6, 10).solve(&a, &[1.0, 1.0]).unwrap_err();
        assert!(matches!(err, SolverError::DegenerateDiagonal { row: 0 }));
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = CsrMatrix::<f64>::identity(3);
        let err = NeumannSolver::new(1e-6, 10).solve(&a, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, SolverError::ShapeMismatch(_)));
    }

    #[test]
    fn test_empty_system() {
        let a = CsrMatrix::<f64>::identity(0);
        let result = NeumannSolver::new(1e-6, 10).solve(&a, &[]).unwrap();
        assert!(result.converged);
        assert_eq!(result.solution, Some(vec![]));
    }

    #[test]
    fn test_invalid_relaxation() {
        let a = CsrMatrix::<f64>::identity(2);
        let err = NeumannSolver::new(1e-6, 10)
            .with_relaxation(1.5)
            .solve(&a, &[1.0, 1.0])
            .unwrap_err();
        assert!(matches!(err, SolverError::InvalidInput(_)));
    }

    #[test]
    fn test_estimate_iterations() {
        assert_eq!(NeumannSolver::estimate_iterations(0.5, 1e-3, 1.0), 10);
        assert_eq!(NeumannSolver::estimate_iterations(0.5, 1.0, 0.5), 0);
        assert_eq!(NeumannSolver::estimate_iterations(1.0, 1e-3, 1.0), usize::MAX);
    }

    #[test]
    fn test_engine_trait() {
        let solver = NeumannSolver::new(1e-8, 100);
        let engine: &dyn SolverEngine = &solver;
        let a = tridiag(5, 4.0, -1.0);
        let mut budget = BudgetEnforcer::new(100, None, CancellationToken::new());
        let result = engine.solve(&a, &[1.0; 5], &mut budget).unwrap();
        assert!(result.converged);
        assert_eq!(engine.method(), SolverMethod::Neumann);
    }
}
