//! Uniform entry point: validation, dominance gate, dispatch.
//!
//! [`SolverFacade::solve`] validates the request, optionally runs the
//! [`DominanceAnalyzer`], dispatches on [`SolverMethod`] and normalises the
//! result. [`SolverRouter`] picks a method when the caller asks for `auto`.
//!
//! # Routing decision tree
//!
//! | Request | Condition | Method |
//! |---------|-----------|--------|
//! | full vector or many targets | always | Neumann |
//! | few targets | not row dominant | Neumann |
//! | few targets | `n <= small_system_threshold` | ForwardPush |
//! | few targets | `epsilon < walk_epsilon_threshold` | ForwardPush |
//! | few targets | else | RandomWalk |
//!
//! Bidirectional is never picked automatically: its backward half starts
//! from the dense `D^-1 b` and transposes `M`, both linear in the input.
//!
//! # `residual_norm` by method
//!
//! | Method | `residual_norm` |
//! |--------|-----------------|
//! | Neumann, BackwardPush | `||b - A x||_inf` |
//! | RandomWalk | largest standard error |
//! | ForwardPush, Bidirectional | largest certified error bound |

use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::analysis::{DominanceAnalyzer, DominanceReport};
use crate::backward_push::BackwardPushSolver;
use crate::bidirectional::BidirectionalSolver;
use crate::budget::{BudgetEnforcer, CancellationToken};
use crate::error::SolverError;
use crate::forward_push::ForwardPushSolver;
use crate::matrix::MatrixView;
use crate::neumann::{NeumannSolver, ProgressNorm};
use crate::random_walk::RandomWalkSolver;
use crate::types::{SolveResult, SolverConfig, SolverMethod};
use crate::validation::{
    validate_config, validate_matrix_values, validate_output, validate_rhs, validate_square,
};

/// Dominance ratios below this are accepted with a warning.
pub const WEAK_DOMINANCE_WARNING: f64 = 1e-3;

// ---------------------------------------------------------------------------
// RouterConfig
// ---------------------------------------------------------------------------

/// Thresholds for automatic method selection.
///
/// ```rust
/// use sublinear_solver::facade::RouterConfig;
///
/// let config = RouterConfig {
///     small_system_threshold: 500,
///     ..Default::default()
/// };
/// assert_eq!(config.few_targets_threshold, 16);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// Largest `n` for which forward push is preferred for entry queries.
    ///
    /// Default: `1_000`.
    pub small_system_threshold: usize,

    /// Most targets treated as an entry query rather than a full solve.
    ///
    /// Default: `16`.
    pub few_targets_threshold: usize,

    /// Below this epsilon, large entry queries use forward push instead of
    /// random walks (whose cost grows as `1/epsilon^2`).
    ///
    /// Default: `1e-4`.
    pub walk_epsilon_threshold: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            small_system_threshold: 1_000,
            few_targets_threshold: 16,
            walk_epsilon_threshold: 1e-4,
        }
    }
}

// ---------------------------------------------------------------------------
// SolverRouter
// ---------------------------------------------------------------------------

/// Stateless method selector.
#[derive(Debug, Clone, Default)]
pub struct SolverRouter {
    config: RouterConfig,
}

impl SolverRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Pick a method for an `n`-dimensional request on `targets`.
    ///
    /// Pure function of its arguments.
    ///
    /// ```rust
    /// use sublinear_solver::facade::SolverRouter;
    /// use sublinear_solver::types::SolverMethod;
    ///
    /// let router = SolverRouter::default();
    /// assert_eq!(router.select_method(None, 100, &[], 1e-6), SolverMethod::Neumann);
    /// assert_eq!(router.select_method(None, 100, &[3], 1e-6), SolverMethod::ForwardPush);
    /// assert_eq!(router.select_method(None, 1_000_000, &[3], 1e-2), SolverMethod::RandomWalk);
    /// assert_eq!(router.select_method(None, 1_000_000, &[3], 1e-8), SolverMethod::ForwardPush);
    /// ```
    pub fn select_method(
        &self,
        report: Option<&DominanceReport>,
        n: usize,
        targets: &[usize],
        epsilon: f64,
    ) -> SolverMethod {
        if targets.is_empty() || targets.len() > self.config.few_targets_threshold {
            debug!(n, targets = targets.len(), "routing to Neumann (full vector)");
            return SolverMethod::Neumann;
        }
        if report.is_some_and(|r| !r.is_dominant) {
            debug!("routing to Neumann (not row dominant)");
            return SolverMethod::Neumann;
        }
        if n <= self.config.small_system_threshold {
            debug!(n, "routing to ForwardPush (small system)");
            SolverMethod::ForwardPush
        } else if epsilon < self.config.walk_epsilon_threshold {
            debug!(n, epsilon, "routing to ForwardPush (tight tolerance)");
            SolverMethod::ForwardPush
        } else {
            debug!(n, epsilon, "routing to RandomWalk (large system)");
            SolverMethod::RandomWalk
        }
    }
}

// ---------------------------------------------------------------------------
// SolverFacade
// ---------------------------------------------------------------------------

/// Options for [`SolverFacade::analyze`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzeOptions {
    pub check_symmetry: bool,
    pub estimate_condition: bool,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            check_symmetry: true,
            estimate_condition: true,
        }
    }
}

/// Validates, gates on dominance, dispatches, and normalises results.
///
/// ```rust
/// use sublinear_solver::facade::SolverFacade;
/// use sublinear_solver::matrix::DenseMatrix;
/// use sublinear_solver::types::{SolverConfig, SolverMethod};
///
/// let a = DenseMatrix::from_rows(vec![vec![4.0, -1.0], vec![-1.0, 4.0]]).unwrap();
/// let config = SolverConfig::new(SolverMethod::Neumann).with_epsilon(1e-8);
/// let result = SolverFacade::new().solve(&a, &[1.0, 2.0], &config).unwrap();
/// assert!(result.converged);
/// assert!(result.residual_norm < 1e-8);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SolverFacade {
    router: SolverRouter,
}

impl SolverFacade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_router(router: SolverRouter) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &SolverRouter {
        &self.router
    }

    /// Solve `A x = b` with `config.method`.
    ///
    /// # Errors
    ///
    /// - [`SolverError::ShapeMismatch`] for a non-square matrix or wrong rhs
    ///   length; [`SolverError::IndexOutOfRange`] for bad targets.
    /// - [`SolverError::InvalidInput`] for a bad configuration or non-finite
    ///   input.
    /// - [`SolverError::NonDominantMatrix`] when the dominance gate rejects
    ///   the matrix.
    /// - Any estimator error, with warnings attached to partial results.
    pub fn solve(
        &self,
        matrix: &dyn MatrixView,
        rhs: &[f64],
        config: &SolverConfig,
    ) -> Result<SolveResult, SolverError> {
        self.solve_inner(matrix, rhs, config, &CancellationToken::new(), None)
    }

    /// [`solve`](Self::solve) with a caller-held cancellation token.
    ///
    /// # Errors
    ///
    /// As [`solve`](Self::solve), plus [`SolverError::Cancelled`].
    pub fn solve_with_cancel(
        &self,
        matrix: &dyn MatrixView,
        rhs: &[f64],
        config: &SolverConfig,
        cancel: &CancellationToken,
    ) -> Result<SolveResult, SolverError> {
        self.solve_inner(matrix, rhs, config, cancel, None)
    }

    /// Select a method with the router, then solve.
    ///
    /// # Errors
    ///
    /// As [`solve_with_cancel`](Self::solve_with_cancel).
    pub fn solve_auto(
        &self,
        matrix: &dyn MatrixView,
        rhs: &[f64],
        config: &SolverConfig,
        cancel: &CancellationToken,
    ) -> Result<SolveResult, SolverError> {
        let n = validate_square(matrix)?;
        validate_matrix_values(matrix)?;
        let report = DominanceAnalyzer::analyze(matrix, false, false)?;
        let method = self
            .router
            .select_method(Some(&report), n, &config.targets, config.epsilon);
        info!(%method, n, "auto-selected method");
        let mut routed = config.clone();
        routed.method = method;
        self.solve_inner(matrix, rhs, &routed, cancel, Some(report))
    }

    /// Run the analyzer.
    ///
    /// # Errors
    ///
    /// [`SolverError::ShapeMismatch`], [`SolverError::DegenerateDiagonal`],
    /// or [`SolverError::InvalidInput`] for non-finite entries.
    pub fn analyze(
        &self,
        matrix: &dyn MatrixView,
        options: AnalyzeOptions,
    ) -> Result<DominanceReport, SolverError> {
        validate_matrix_values(matrix)?;
        DominanceAnalyzer::analyze(matrix, options.check_symmetry, options.estimate_condition)
    }

    #[instrument(skip_all, fields(method = %config.method, n = matrix.dim(), targets = config.targets.len()))]
    fn solve_inner(
        &self,
        matrix: &dyn MatrixView,
        rhs: &[f64],
        config: &SolverConfig,
        cancel: &CancellationToken,
        report: Option<DominanceReport>,
    ) -> Result<SolveResult, SolverError> {
        let start = Instant::now();
        let n = validate_square(matrix)?;
        validate_rhs(rhs, n)?;
        validate_config(config, n)?;
        validate_matrix_values(matrix)?;

        let mut warnings = Vec::new();
        let mut progress = ProgressNorm::MaxUpdate;
        if config.check_dominance && n > 0 {
            let report = match report {
                Some(r) => r,
                None => DominanceAnalyzer::analyze(matrix, false, false)?,
            };
            progress = gate_dominance(&report, config.method, &mut warnings)?;
        }

        let mut budget = BudgetEnforcer::new(config.max_iterations, config.max_time, cancel.clone());
        let outcome = dispatch(matrix, rhs, config, progress, &mut budget);

        let mut result = match outcome {
            Ok(result) => result,
            Err(err) => return Err(attach_warnings(err, &warnings, start)),
        };
        if !warnings.is_empty() {
            warnings.append(&mut result.warnings);
            result.warnings = warnings;
        }
        result.wall_time = start.elapsed();

        if let Err(e) = validate_output(&result) {
            return Err(SolverError::NumericalInstability {
                iteration: result.iterations,
                detail: e.to_string(),
            });
        }
        if !result.converged {
            warn!(
                method = %result.method,
                iterations = result.iterations,
                residual = result.residual_norm,
                "solve finished without reaching epsilon",
            );
        }
        Ok(result)
    }
}

/// Exhaustive dispatch on the method. `progress` only affects Neumann.
fn dispatch(
    matrix: &dyn MatrixView,
    rhs: &[f64],
    config: &SolverConfig,
    progress: ProgressNorm,
    budget: &mut BudgetEnforcer,
) -> Result<SolveResult, SolverError> {
    match config.method {
        SolverMethod::Neumann => {
            let solver = NeumannSolver::new(config.epsilon, config.max_iterations)
                .with_relaxation(config.alpha.unwrap_or(1.0))
                .with_progress_norm(progress);
            let mut result = solver.solve_with_budget(matrix, rhs, budget)?;
            if !config.targets.is_empty() {
                if let Some(x) = &result.solution {
                    result.entry_estimates =
                        Some(config.targets.iter().map(|&t| (t, x[t])).collect());
                }
            }
            Ok(result)
        }
        SolverMethod::RandomWalk => {
            RandomWalkSolver::from_config(config).solve_with_budget(matrix, rhs, budget)
        }
        SolverMethod::ForwardPush => {
            ForwardPushSolver::from_config(config).solve_with_budget(matrix, rhs, budget)
        }
        SolverMethod::BackwardPush => {
            BackwardPushSolver::from_config(config).solve_with_budget(matrix, rhs, budget)
        }
        SolverMethod::Bidirectional => BidirectionalSolver::from_config(config)
            .solve_detailed(matrix, rhs, budget)
            .map(|(result, _)| result),
    }
}

/// Apply the dominance policy for `method`.
///
/// Returns the norm Neumann should watch for divergence: the column-weighted
/// one when only column dominance admitted the matrix.
fn gate_dominance(
    report: &DominanceReport,
    method: SolverMethod,
    warnings: &mut Vec<String>,
) -> Result<ProgressNorm, SolverError> {
    if report.is_dominant {
        if report.dominance_ratio < WEAK_DOMINANCE_WARNING {
            let msg = format!(
                "dominance ratio {:.3e} is close to zero; convergence will be slow",
                report.dominance_ratio
            );
            warn!("{msg}");
            warnings.push(msg);
        }
        return Ok(ProgressNorm::MaxUpdate);
    }

    if method == SolverMethod::Neumann && report.is_column_dominant() {
        let msg = format!(
            "matrix is column but not row dominant (row ratio {:.3e}); Neumann convergence \
             follows from column dominance",
            report.dominance_ratio
        );
        warn!("{msg}");
        warnings.push(msg);
        return Ok(ProgressNorm::ColumnWeighted);
    }

    if report.is_weakly_dominant {
        warn!(method = %method, "matrix is only weakly diagonally dominant");
    }
    Err(SolverError::NonDominantMatrix {
        ratio: report.dominance_ratio,
    })
}

/// Fold facade warnings and timing into partial results carried by errors.
fn attach_warnings(mut err: SolverError, warnings: &[String], start: Instant) -> SolverError {
    match &mut err {
        SolverError::Cancelled { partial } | SolverError::DivergenceDetected { partial, .. } => {
            let mut merged = warnings.to_vec();
            merged.append(&mut partial.warnings);
            partial.warnings = merged;
            partial.wall_time = start.elapsed();
        }
        _ => {}
    }
    err
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::DenseMatrix;

    fn two_by_two() -> DenseMatrix {
        DenseMatrix::from_rows(vec![vec![4.0, -1.0], vec![-1.0, 4.0]]).unwrap()
    }

    #[test]
    fn every_method_solves_two_by_two() {
        let facade = SolverFacade::new();
        for method in SolverMethod::ALL {
            let config = SolverConfig::new(method)
                .with_epsilon(1e-3)
                .with_seed(11)
                .with_targets(vec![0, 1]);
            let result = facade.solve(&two_by_two(), &[1.0, 2.0], &config).unwrap();
            assert_eq!(result.method, method);
            let x0 = result.entry(0).unwrap();
            let x1 = result.entry(1).unwrap();
            assert!((x0 - 0.4).abs() < 1e-2, "{method}: x0 = {x0}");
            assert!((x1 - 0.6).abs() < 1e-2, "{method}: x1 = {x1}");
        }
    }

    #[test]
    fn rejects_non_dominant() {
        let a = DenseMatrix::from_rows(vec![vec![1.0, 2.0], vec![2.0, 1.0]]).unwrap();
        for method in SolverMethod::ALL {
            let err = SolverFacade::new()
                .solve(&a, &[1.0, 1.0], &SolverConfig::new(method))
                .unwrap_err();
            assert!(matches!(err, SolverError::NonDominantMatrix { .. }), "{method}");
        }
    }

    #[test]
    fn neumann_accepts_column_dominance() {
        // Row 0 is not dominant, every column is.
        let a = DenseMatrix::from_rows(vec![
            vec![2.0, 2.5, 0.0],
            vec![0.1, 4.0, 0.0],
            vec![0.1, 0.1, 1.0],
        ])
        .unwrap();
        let config = SolverConfig::new(SolverMethod::Neumann).with_epsilon(1e-8);
        let result = SolverFacade::new().solve(&a, &[1.0, 1.0, 1.0], &config).unwrap();
        assert!(result.converged);
        assert!(result.warnings.iter().any(|w| w.contains("column")));

        let push = SolverConfig::new(SolverMethod::BackwardPush);
        assert!(matches!(
            SolverFacade::new().solve(&a, &[1.0, 1.0, 1.0], &push),
            Err(SolverError::NonDominantMatrix { .. })
        ));
    }

    #[test]
    fn shape_and_index_errors() {
        let facade = SolverFacade::new();
        let config = SolverConfig::default();
        assert!(matches!(
            facade.solve(&two_by_two(), &[1.0], &config),
            Err(SolverError::ShapeMismatch(_))
        ));
        let rect = DenseMatrix::new(2, 3, vec![1.0; 6]).unwrap();
        assert!(matches!(
            facade.solve(&rect, &[1.0, 1.0], &config),
            Err(SolverError::ShapeMismatch(_))
        ));
        let targeted = SolverConfig::new(SolverMethod::ForwardPush).with_targets(vec![2]);
        assert!(matches!(
            facade.solve(&two_by_two(), &[1.0, 1.0], &targeted),
            Err(SolverError::IndexOutOfRange { index: 2, dim: 2 })
        ));
    }

    #[test]
    fn invalid_config() {
        let config = SolverConfig::default().with_epsilon(-1.0);
        assert!(matches!(
            SolverFacade::new().solve(&two_by_two(), &[1.0, 1.0], &config),
            Err(SolverError::InvalidInput(_))
        ));
        let config = SolverConfig::default().with_max_iterations(0);
        assert!(matches!(
            SolverFacade::new().solve(&two_by_two(), &[1.0, 1.0], &config),
            Err(SolverError::InvalidInput(_))
        ));
    }

    #[test]
    fn cancelled_solve_returns_partial() {
        let token = CancellationToken::new();
        token.cancel();
        let err = SolverFacade::new()
            .solve_with_cancel(&two_by_two(), &[1.0, 2.0], &SolverConfig::default(), &token)
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
        assert!(err.partial().is_some());
    }

    #[test]
    fn neumann_targets_are_reported() {
        let config = SolverConfig::new(SolverMethod::Neumann).with_targets(vec![1]);
        let result = SolverFacade::new().solve(&two_by_two(), &[1.0, 2.0], &config).unwrap();
        assert!(result.solution.is_some());
        assert!((result.entry_estimates.unwrap()[&1] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn auto_routes_and_solves() {
        let config = SolverConfig::default().with_targets(vec![0]).with_epsilon(1e-6);
        let result = SolverFacade::new()
            .solve_auto(&two_by_two(), &[1.0, 2.0], &config, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.method, SolverMethod::ForwardPush);
        assert!((result.entry(0).unwrap() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn router_prefers_neumann_without_row_dominance() {
        let a = DenseMatrix::from_rows(vec![vec![2.0, 1.5], vec![0.1, 4.0]]).unwrap();
        let mut report = DominanceAnalyzer::analyze(&a, false, false).unwrap();
        report.is_dominant = false;
        let router = SolverRouter::default();
        assert_eq!(router.select_method(Some(&report), 2, &[0], 1e-6), SolverMethod::Neumann);
    }

    #[test]
    fn router_never_picks_bidirectional() {
        let router = SolverRouter::default();
        for n in [10, 1_001, 1_000_000] {
            for epsilon in [1e-2, 1e-4, 1e-8, 1e-12] {
                let method = router.select_method(None, n, &[0, n - 1], epsilon);
                assert_ne!(method, SolverMethod::Bidirectional, "n={n} epsilon={epsilon}");
            }
        }
        assert_eq!(
            router.select_method(None, 1_000_000, &[0], 1e-8),
            SolverMethod::ForwardPush
        );
        assert_eq!(
            router.select_method(None, 1_000_000, &[0], 1e-3),
            SolverMethod::RandomWalk
        );
    }

    #[test]
    fn analyze_reports_dominance() {
        let report = SolverFacade::new()
            .analyze(&two_by_two(), AnalyzeOptions::default())
            .unwrap();
        assert!(report.is_dominant);
        assert!(report.is_symmetric);
        assert!((report.dominance_ratio - 0.75).abs() < 1e-12);
        assert_eq!(report.condition_estimate, Some(1.0 / 0.75));
    }
}
