//! Backward push from the right-hand side.
//!
//! Starts from `r = z = D^{-1}b`, `p = 0` and maintains
//!
//! ```text
//! G z = p + G r,        b - A p = D r
//! ```
//!
//! Pushing node `u` moves `alpha * r_u` into `p_u` and spreads
//! `alpha * r_u * M_ju` down column `u` of `M` (read from the transposed
//! CSR). A node is active while `|r_u| > theta`; the default
//! `theta = epsilon * (1 - rho_max)` guarantees `||x - p||_inf <= epsilon`
//! once the queue drains.
//!
//! With `alpha = 1` each push satisfies equation `u` exactly, so this is
//! Gauss-Southwell relaxation on `A x = b`.

use std::collections::VecDeque;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::analysis::JacobiSplit;
use crate::budget::{BudgetEnforcer, BudgetStatus, CancellationToken};
use crate::error::SolverError;
use crate::forward_push::{check_threshold, SweepOutcome, CANCEL_CHECK_INTERVAL};
use crate::matrix::MatrixView;
use crate::traits::SolverEngine;
use crate::types::{ConvergenceInfo, CsrMatrix, SolveResult, SolverConfig, SolverMethod};
use crate::validation::{
    validate_alpha, validate_params, validate_rhs, validate_square, validate_targets,
};

// ---------------------------------------------------------------------------
// Column access
// ---------------------------------------------------------------------------

/// Columns of `M` backed by the transpose of `A`.
#[derive(Debug, Clone)]
pub(crate) struct MColumns {
    transposed: CsrMatrix<f64>,
}

impl MColumns {
    pub(crate) fn new(matrix: &dyn MatrixView) -> Self {
        Self {
            transposed: matrix.to_csr().transpose(),
        }
    }

    /// Off-diagonal entries of column `u` of `M`: `(j, -A_ju / A_jj)`.
    #[inline]
    pub(crate) fn column<'a>(
        &'a self,
        split: &'a JacobiSplit,
        u: usize,
    ) -> impl Iterator<Item = (usize, f64)> + 'a {
        self.transposed
            .row_entries(u)
            .filter(move |&(j, a)| j != u && *a != 0.0)
            .map(move |(j, a)| (j, -a / split.diag(j)))
    }
}

// ---------------------------------------------------------------------------
// BackwardState
// ---------------------------------------------------------------------------

/// Dense backward-push state.
#[derive(Debug, Clone)]
pub(crate) struct BackwardState {
    pub(crate) estimate: Vec<f64>,
    pub(crate) residual: Vec<f64>,
    pub(crate) threshold: f64,
    pub(crate) pushed: Vec<bool>,
    pub(crate) pushes: u64,
    /// `||r^0||_inf`, the scale of the round-off floor.
    pub(crate) initial_norm: f64,
    pub(crate) work: u64,
    queue: VecDeque<usize>,
    in_queue: Vec<bool>,
}

impl BackwardState {
    pub(crate) fn new(residual: Vec<f64>, threshold: f64) -> Self {
        let n = residual.len();
        let initial_norm = residual.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let mut state = Self {
            estimate: vec![0.0; n],
            residual,
            threshold,
            pushed: vec![false; n],
            pushes: 0,
            initial_norm,
            work: 0,
            queue: VecDeque::new(),
            in_queue: vec![false; n],
        };
        state.enqueue_active();
        state
    }

    fn enqueue_active(&mut self) {
        for u in 0..self.residual.len() {
            if !self.in_queue[u] && self.residual[u].abs() > self.threshold {
                self.queue.push_back(u);
                self.in_queue[u] = true;
            }
        }
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.queue.is_empty()
    }

    /// Push every node that was queued when the sweep started.
    pub(crate) fn sweep(
        &mut self,
        columns: &MColumns,
        split: &JacobiSplit,
        alpha: f64,
        budget: &BudgetEnforcer,
    ) -> SweepOutcome {
        let frontier = self.queue.len();
        for _ in 0..frontier {
            let Some(u) = self.queue.pop_front() else {
                break;
            };
            self.in_queue[u] = false;

            let r_u = self.residual[u];
            if r_u.abs() <= self.threshold {
                continue;
            }

            let mass = alpha * r_u;
            self.estimate[u] += mass;
            self.residual[u] -= mass;
            self.pushed[u] = true;

            for (j, m) in columns.column(split, u) {
                self.residual[j] += mass * m;
                if !self.in_queue[j] && self.residual[j].abs() > self.threshold {
                    self.queue.push_back(j);
                    self.in_queue[j] = true;
                }
                self.work += 1;
            }
            if !self.in_queue[u] && self.residual[u].abs() > self.threshold {
                self.queue.push_back(u);
                self.in_queue[u] = true;
            }

            self.pushes += 1;
            if self.pushes % CANCEL_CHECK_INTERVAL == 0 && budget.is_cancelled() {
                return SweepOutcome::Cancelled;
            }
        }
        if self.queue.is_empty() {
            SweepOutcome::Drained
        } else {
            SweepOutcome::Pending
        }
    }

    /// Halve the threshold and re-queue the nodes it activates.
    pub(crate) fn refine(&mut self) {
        self.threshold *= 0.5;
        self.enqueue_active();
    }

    pub(crate) fn residual_inf_norm(&self) -> f64 {
        self.residual.iter().fold(0.0f64, |m, v| m.max(v.abs()))
    }
}

// ---------------------------------------------------------------------------
// BackwardPushSolver
// ---------------------------------------------------------------------------

/// Single entry of `G = (I - M)^{-1}` estimated by [`BackwardPushSolver::pairwise`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairwiseEstimate {
    /// Estimate of `G[source][target]`.
    pub value: f64,
    /// Certified bound on `|value - G[source][target]|`.
    pub error_bound: f64,
    /// Pushes performed.
    pub pushes: u64,
    /// Whether `error_bound <= epsilon`.
    pub converged: bool,
}

/// Backward push solver producing the whole approximate vector.
#[derive(Debug, Clone)]
pub struct BackwardPushSolver {
    /// Target `||x - p||_inf` accuracy.
    pub epsilon: f64,
    /// Maximum push rounds.
    pub max_rounds: usize,
    /// Entries additionally reported in `entry_estimates`.
    pub targets: Vec<usize>,
    /// Push damping in `(0, 1]`; `None` means 1.
    pub alpha: Option<f64>,
    /// Threshold override; `None` uses `epsilon * (1 - rho_max)`.
    pub threshold: Option<f64>,
}

impl BackwardPushSolver {
    pub fn new(epsilon: f64, max_rounds: usize) -> Self {
        Self {
            epsilon,
            max_rounds,
            targets: Vec::new(),
            alpha: None,
            threshold: None,
        }
    }

    /// Build from a facade configuration.
    pub fn from_config(config: &SolverConfig) -> Self {
        Self {
            epsilon: config.epsilon,
            max_rounds: config.max_iterations,
            targets: config.targets.clone(),
            alpha: config.alpha,
            threshold: config.push_threshold,
        }
    }

    pub fn with_targets(mut self, targets: impl Into<Vec<usize>>) -> Self {
        self.targets = targets.into();
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = Some(alpha);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Solve without a wall-clock limit or cancellation.
    ///
    /// # Errors
    ///
    /// See [`solve_with_budget`](Self::solve_with_budget).
    pub fn solve(&self, matrix: &dyn MatrixView, rhs: &[f64]) -> Result<SolveResult, SolverError> {
        let mut budget = BudgetEnforcer::new(self.max_rounds, None, CancellationToken::new());
        self.solve_with_budget(matrix, rhs, &mut budget)
    }

    fn validate(&self, matrix: &dyn MatrixView) -> Result<usize, SolverError> {
        let n = validate_square(matrix)?;
        validate_params(self.epsilon, self.max_rounds)?;
        validate_alpha(self.alpha)?;
        validate_targets(&self.targets, n)?;
        Ok(n)
    }

    /// Run the push loop on `state` until the bound drops below `epsilon`,
    /// the budget runs out, or the threshold hits round-off.
    ///
    /// Returns `(cancelled, floor_hit)`.
    fn drive(
        &self,
        state: &mut BackwardState,
        columns: &MColumns,
        split: &JacobiSplit,
        budget: &mut BudgetEnforcer,
        history: &mut Vec<ConvergenceInfo>,
    ) -> (bool, bool) {
        let alpha = self.alpha.unwrap_or(1.0);
        let scale = split.inverse_bound();
        if state.residual_inf_norm() * scale <= self.epsilon {
            return (false, false);
        }
        loop {
            match budget.check_iteration() {
                BudgetStatus::Continue => {}
                BudgetStatus::IterationsExhausted | BudgetStatus::TimeExhausted => {
                    return (false, false)
                }
                BudgetStatus::Cancelled => return (true, false),
            }
            let round = budget.iterations_used();
            let outcome = state.sweep(columns, split, alpha, budget);
            let bound = state.residual_inf_norm() * scale;
            history.push(ConvergenceInfo {
                iteration: round,
                residual_norm: bound,
            });
            debug!(round, error_bound = bound, pushes = state.pushes, "backward push round");
            match outcome {
                SweepOutcome::Cancelled => return (true, false),
                SweepOutcome::Pending => {}
                SweepOutcome::Drained => {
                    if bound <= self.epsilon {
                        return (false, false);
                    }
                    if state.threshold * 0.5 < f64::EPSILON * state.initial_norm {
                        return (false, true);
                    }
                    state.refine();
                }
            }
        }
    }

    /// Approximate the full solution vector.
    ///
    /// # Errors
    ///
    /// - [`SolverError::NonDominantMatrix`] unless `rho_max < 1`.
    /// - [`SolverError::ResidualOverflow`] for an unusable threshold.
    /// - [`SolverError::Cancelled`] carrying the current iterate.
    #[instrument(skip(self, matrix, rhs, budget), fields(n = matrix.dim()))]
    pub fn solve_with_budget(
        &self,
        matrix: &dyn MatrixView,
        rhs: &[f64],
        budget: &mut BudgetEnforcer,
    ) -> Result<SolveResult, SolverError> {
        let start = Instant::now();
        let n = self.validate(matrix)?;
        validate_rhs(rhs, n)?;

        let mut result = SolveResult::empty(SolverMethod::BackwardPush);
        if n == 0 {
            result.solution = Some(Vec::new());
            return Ok(result);
        }

        let split = JacobiSplit::new(matrix)?;
        split.require_contraction()?;
        let z = split.scaled_rhs(rhs);
        let z_norm = z.iter().fold(0.0f64, |m, v| m.max(v.abs()));

        let mut state = if z_norm == 0.0 {
            BackwardState::new(z, f64::INFINITY)
        } else {
            let threshold = self.threshold.unwrap_or(self.epsilon * split.dominance_ratio());
            check_threshold(threshold, z_norm)?;
            BackwardState::new(z, threshold)
        };

        let columns = MColumns::new(matrix);
        let (cancelled, floor_hit) = self.drive(
            &mut state,
            &columns,
            &split,
            budget,
            &mut result.convergence_history,
        );
        if floor_hit {
            let msg = "push threshold reached round-off floor before the error bound".to_string();
            warn!("{msg}");
            result.warnings.push(msg);
        }

        let bound = state.residual_inf_norm() * split.inverse_bound();
        result.residual_norm = matrix.residual_inf_norm(&state.estimate, rhs);
        result.error_bound = Some(bound);
        result.converged = bound <= self.epsilon && !cancelled;
        result.iterations = budget.iterations_used();
        result.work = state.work;
        if !self.targets.is_empty() {
            result.entry_estimates =
                Some(self.targets.iter().map(|&t| (t, state.estimate[t])).collect());
        }
        result.solution = Some(state.estimate);
        result.wall_time = start.elapsed();

        if cancelled {
            return Err(SolverError::Cancelled {
                partial: Box::new(result),
            });
        }
        info!(
            rounds = result.iterations,
            pushes = state.pushes,
            error_bound = bound,
            residual = result.residual_norm,
            converged = result.converged,
            "backward push finished",
        );
        Ok(result)
    }

    /// Estimate the single entry `G[source][target]` of `(I - M)^{-1}` by
    /// pushing back from `e_target`.
    ///
    /// # Errors
    ///
    /// [`SolverError::IndexOutOfRange`] for bad indices, otherwise as
    /// [`solve_with_budget`](Self::solve_with_budget).
    pub fn pairwise(
        &self,
        matrix: &dyn MatrixView,
        source: usize,
        target: usize,
    ) -> Result<PairwiseEstimate, SolverError> {
        let n = self.validate(matrix)?;
        validate_targets(&[source, target], n)?;

        let split = JacobiSplit::new(matrix)?;
        split.require_contraction()?;
        let threshold = self.threshold.unwrap_or(self.epsilon * split.dominance_ratio());
        check_threshold(threshold, 1.0)?;

        let mut seed = vec![0.0; n];
        seed[target] = 1.0;
        let mut state = BackwardState::new(seed, threshold);
        let columns = MColumns::new(matrix);
        let mut budget = BudgetEnforcer::new(self.max_rounds, None, CancellationToken::new());
        let mut history = Vec::new();
        self.drive(&mut state, &columns, &split, &mut budget, &mut history);

        let error_bound = state.residual_inf_norm() * split.inverse_bound();
        Ok(PairwiseEstimate {
            value: state.estimate[source],
            error_bound,
            pushes: state.pushes,
            converged: error_bound <= self.epsilon,
        })
    }
}

impl SolverEngine for BackwardPushSolver {
    fn solve(
        &self,
        matrix: &dyn MatrixView,
        rhs: &[f64],
        budget: &mut BudgetEnforcer,
    ) -> Result<SolveResult, SolverError> {
        self.solve_with_budget(matrix, rhs, budget)
    }

    fn method(&self) -> SolverMethod {
        SolverMethod::BackwardPush
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
