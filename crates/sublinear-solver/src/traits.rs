//! Solver trait.
//!
//! Every estimator implements [`SolverEngine`] so benchmarks and tests can
//! drive them uniformly. The facade itself dispatches on
//! [`SolverMethod`] with an exhaustive `match` rather than through trait
//! objects.

use crate::budget::BudgetEnforcer;
use crate::error::SolverError;
use crate::matrix::MatrixView;
use crate::types::{SolveResult, SolverMethod};

/// Core trait that every estimator implements.
///
/// Entry-wise estimators (random walk, forward and bidirectional push) carry
/// their target entries in their own configuration; `rhs` is always the full
/// right-hand side `b`.
pub trait SolverEngine: Send + Sync {
    /// Approximate the solution of `A x = b` under `budget`.
    ///
    /// # Errors
    ///
    /// Returns [`SolverError`] on invalid input, structural problems,
    /// divergence, or cancellation. Exhausting the budget is not an error.
    fn solve(
        &self,
        matrix: &dyn MatrixView,
        rhs: &[f64],
        budget: &mut BudgetEnforcer,
    ) -> Result<SolveResult, SolverError>;

    /// The method this engine implements.
    fn method(&self) -> SolverMethod;
}
