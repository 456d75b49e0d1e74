//! Forward push: local estimation of `x_i` from the source row.
//!
//! With `M = I - D^{-1}A`, `z = D^{-1}b` and `G = (I - M)^{-1}`, the entry
//! `x_i = e_i^T G z`. Forward push maintains a sparse estimate `p` and
//! residual `r` with the invariant
//!
//! ```text
//! e_i^T G = p^T + r^T G
//! ```
//!
//! starting from `r = e_i`, `p = 0`. Pushing node `u` with damping `alpha`
//! moves `alpha * r_u` into `p_u` and spreads `alpha * r_u * M_uj` onto the
//! residual of every neighbour `j`. A node is active while
//! `|r_u| > theta * max(1, deg(u))`.
//!
//! The estimate is `p . z` with certified error `||r||_1 ||z||_inf / (1 - rho_max)`.
//! When the queue drains above `epsilon`, `theta` is halved and pushing
//! resumes.
//!
//! Only rows of touched nodes are read, so the work is independent of `n`
//! for well-conditioned systems.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::analysis::JacobiSplit;
use crate::budget::{BudgetEnforcer, BudgetStatus, CancellationToken};
use crate::error::SolverError;
use crate::matrix::MatrixView;
use crate::traits::SolverEngine;
use crate::types::{ConvergenceInfo, SolveResult, SolverConfig, SolverMethod};
use crate::validation::{
    validate_alpha, validate_params, validate_rhs, validate_square, validate_targets,
};

/// Pushes between cancellation checks inside a sweep.
pub(crate) const CANCEL_CHECK_INTERVAL: u64 = 4096;

// ---------------------------------------------------------------------------
// SparseVector
// ---------------------------------------------------------------------------

/// Sparse vector with deterministic (insertion-ordered) iteration.
#[derive(Debug, Clone, Default)]
pub(crate) struct SparseVector {
    index: HashMap<usize, usize>,
    entries: Vec<(usize, f64)>,
}

impl SparseVector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn get(&self, i: usize) -> f64 {
        self.index.get(&i).map_or(0.0, |&k| self.entries[k].1)
    }

    /// Add `delta` to entry `i` and return the new value.
    #[inline]
    pub(crate) fn add(&mut self, i: usize, delta: f64) -> f64 {
        match self.index.get(&i) {
            Some(&k) => {
                self.entries[k].1 += delta;
                self.entries[k].1
            }
            None => {
                self.index.insert(i, self.entries.len());
                self.entries.push((i, delta));
                delta
            }
        }
    }

    #[inline]
    pub(crate) fn set(&mut self, i: usize, value: f64) {
        match self.index.get(&i) {
            Some(&k) => self.entries[k].1 = value,
            None => {
                self.index.insert(i, self.entries.len());
                self.entries.push((i, value));
            }
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.entries.iter().copied()
    }

    /// Indices ever written, in insertion order.
    pub(crate) fn support(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|&(i, _)| i)
    }

    pub(crate) fn l1_norm(&self) -> f64 {
        self.entries.iter().map(|(_, v)| v.abs()).sum()
    }

    /// `sum_i self_i * dense_i`.
    pub(crate) fn dot(&self, dense: &[f64]) -> f64 {
        self.entries.iter().map(|&(i, v)| v * dense[i]).sum()
    }
}

// ---------------------------------------------------------------------------
// Push helpers
// ---------------------------------------------------------------------------

/// Whether a node with the given `residual` and off-diagonal `degree` should
/// be pushed. Isolated nodes use `threshold` itself.
#[inline]
pub(crate) fn should_push(residual: f64, degree: usize, threshold: f64) -> bool {
    residual.abs() > threshold * degree.max(1) as f64
}

/// Reject thresholds that can never drain.
///
/// # Errors
///
/// [`SolverError::ResidualOverflow`] if `threshold` is non-positive,
/// non-finite, or below round-off relative to the initial residual.
pub(crate) fn check_threshold(threshold: f64, initial_residual_norm: f64) -> Result<(), SolverError> {
    if !threshold.is_finite() || threshold <= 0.0 {
        return Err(SolverError::ResidualOverflow {
            threshold,
            detail: "push threshold must be positive and finite".into(),
        });
    }
    if threshold < f64::EPSILON * initial_residual_norm {
        return Err(SolverError::ResidualOverflow {
            threshold,
            detail: format!(
                "threshold below round-off of initial residual norm {initial_residual_norm:.3e}"
            ),
        });
    }
    Ok(())
}

/// Outcome of one push sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SweepOutcome {
    /// Nodes remain active after this sweep.
    Pending,
    /// The queue is empty at the current threshold.
    Drained,
    /// Cancellation fired mid-sweep.
    Cancelled,
}

// ---------------------------------------------------------------------------
// ForwardState
// ---------------------------------------------------------------------------

/// Push state for one source row.
#[derive(Debug, Clone)]
pub(crate) struct ForwardState {
    pub(crate) source: usize,
    pub(crate) estimate: SparseVector,
    pub(crate) residual: SparseVector,
    pub(crate) threshold: f64,
    pub(crate) pushes: u64,
    pub(crate) work: u64,
    queue: VecDeque<usize>,
    in_queue: HashSet<usize>,
    degrees: HashMap<usize, usize>,
}

impl ForwardState {
    pub(crate) fn new(matrix: &dyn MatrixView, source: usize, threshold: f64) -> Self {
        let mut state = Self {
            source,
            estimate: SparseVector::new(),
            residual: SparseVector::new(),
            threshold,
            pushes: 0,
            work: 0,
            queue: VecDeque::new(),
            in_queue: HashSet::new(),
            degrees: HashMap::new(),
        };
        state.residual.set(source, 1.0);
        state.enqueue_if_active(matrix, source, 1.0);
        state
    }

    #[inline]
    fn degree(&mut self, matrix: &dyn MatrixView, u: usize) -> usize {
        *self.degrees.entry(u).or_insert_with(|| matrix.row_degree(u))
    }

    #[inline]
    fn enqueue_if_active(&mut self, matrix: &dyn MatrixView, u: usize, r_u: f64) {
        if self.in_queue.contains(&u) {
            return;
        }
        let degree = self.degree(matrix, u);
        if should_push(r_u, degree, self.threshold) {
            self.queue.push_back(u);
            self.in_queue.insert(u);
        }
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.queue.is_empty()
    }

    /// Push every node that was queued when the sweep started.
    pub(crate) fn sweep(
        &mut self,
        matrix: &dyn MatrixView,
        split: &JacobiSplit,
        alpha: f64,
        budget: &BudgetEnforcer,
    ) -> SweepOutcome {
        let frontier = self.queue.len();
        for _ in 0..frontier {
            let Some(u) = self.queue.pop_front() else {
                break;
            };
            self.in_queue.remove(&u);

            // The residual may have changed sign or shrunk since enqueue.
            let r_u = self.residual.get(u);
            let degree = self.degree(matrix, u);
            if !should_push(r_u, degree, self.threshold) {
                continue;
            }

            let mass = alpha * r_u;
            self.estimate.add(u, mass);
            let left = self.residual.add(u, -mass);

            for (j, m) in split.m_row(matrix, u) {
                let r_j = self.residual.add(j, mass * m);
                self.enqueue_if_active(matrix, j, r_j);
                self.work += 1;
            }
            if left != 0.0 {
                self.enqueue_if_active(matrix, u, left);
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
    pub(crate) fn refine(&mut self, matrix: &dyn MatrixView) {
        self.threshold *= 0.5;
        let candidates: Vec<(usize, f64)> = self.residual.iter().collect();
        for (u, r_u) in candidates {
            self.enqueue_if_active(matrix, u, r_u);
        }
    }

    /// `||r||_1 * scale`, with `scale = ||z||_inf / (1 - rho_max)`.
    pub(crate) fn error_bound(&self, scale: f64) -> f64 {
        self.residual.l1_norm() * scale
    }
}

// ---------------------------------------------------------------------------
// ForwardPushSolver
// ---------------------------------------------------------------------------

/// Forward push estimator for selected entries of `x`.
///
/// ```rust
/// use sublinear_solver::forward_push::ForwardPushSolver;
/// use sublinear_solver::matrix::DenseMatrix;
///
/// let a = DenseMatrix::from_rows(vec![vec![4.0, -1.0], vec![-1.0, 4.0]]).unwrap();
/// let result = ForwardPushSolver::new(1e-8, 100)
///     .with_targets(vec![1])
///     .solve(&a, &[1.0, 2.0])
///     .unwrap();
/// assert!((result.entry(1).unwrap() - 0.6).abs() < 1e-8);
/// ```
#[derive(Debug, Clone)]
pub struct ForwardPushSolver {
    /// Target additive accuracy for each entry.
    pub epsilon: f64,
    /// Maximum push rounds (queue sweeps).
    pub max_rounds: usize,
    /// Entries to estimate; empty means all.
    pub targets: Vec<usize>,
    /// Push damping in `(0, 1]`; `None` means 1.
    pub alpha: Option<f64>,
    /// Initial threshold; `None` derives `epsilon * (1 - rho_max) / ||z||_inf`.
    pub threshold: Option<f64>,
}

impl ForwardPushSolver {
    /// Create a solver that estimates every entry.
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

    /// Set the entries to estimate.
    pub fn with_targets(mut self, targets: impl Into<Vec<usize>>) -> Self {
        self.targets = targets.into();
        self
    }

    /// Set the push damping.
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = Some(alpha);
        self
    }

    /// Override the initial push threshold.
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

    /// Estimate the configured entries.
    ///
    /// All targets advance in lockstep: each budget round is one sweep of
    /// every unfinished target.
    ///
    /// # Errors
    ///
    /// - [`SolverError::NonDominantMatrix`] unless `rho_max < 1`.
    /// - [`SolverError::ResidualOverflow`] for an unusable threshold.
    /// - [`SolverError::Cancelled`] carrying the estimates so far.
    #[instrument(skip(self, matrix, rhs, budget), fields(n = matrix.dim(), targets = self.targets.len()))]
    pub fn solve_with_budget(
        &self,
        matrix: &dyn MatrixView,
        rhs: &[f64],
        budget: &mut BudgetEnforcer,
    ) -> Result<SolveResult, SolverError> {
        let start = Instant::now();
        let n = validate_square(matrix)?;
        validate_rhs(rhs, n)?;
        validate_params(self.epsilon, self.max_rounds)?;
        validate_alpha(self.alpha)?;
        validate_targets(&self.targets, n)?;

        let mut result = SolveResult::empty(SolverMethod::ForwardPush);
        if n == 0 {
            result.solution = Some(Vec::new());
            return Ok(result);
        }

        let split = JacobiSplit::new(matrix)?;
        split.require_contraction()?;
        let z = split.scaled_rhs(rhs);
        let z_norm = z.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let scale = z_norm * split.inverse_bound();
        let alpha = self.alpha.unwrap_or(1.0);

        let full_vector = self.targets.is_empty();
        let targets: Vec<usize> = if full_vector {
            (0..n).collect()
        } else {
            self.targets.clone()
        };

        if z_norm == 0.0 {
            result.entry_estimates = Some(targets.iter().map(|&t| (t, 0.0)).collect());
            if full_vector {
                result.solution = Some(vec![0.0; n]);
            }
            result.error_bound = Some(0.0);
            result.residual_norm = 0.0;
            return Ok(result);
        }

        let threshold = match self.threshold {
            Some(t) => t,
            None => self.epsilon / scale,
        };
        check_threshold(threshold, 1.0)?;

        let mut states: Vec<ForwardState> =
            targets.iter().map(|&t| ForwardState::new(matrix, t, threshold)).collect();
        let mut done: Vec<bool> = states.iter().map(|s| s.error_bound(scale) <= self.epsilon).collect();
        let mut floor_hit = false;
        let mut cancelled = false;

        'rounds: while done.iter().any(|d| !d) {
            match budget.check_iteration() {
                BudgetStatus::Continue => {}
                BudgetStatus::IterationsExhausted | BudgetStatus::TimeExhausted => break,
                BudgetStatus::Cancelled => {
                    cancelled = true;
                    break;
                }
            }
            let round = budget.iterations_used();

            let mut worst = 0.0f64;
            for (state, finished) in states.iter_mut().zip(done.iter_mut()) {
                if *finished {
                    continue;
                }
                match state.sweep(matrix, &split, alpha, budget) {
                    SweepOutcome::Cancelled => {
                        cancelled = true;
                        break 'rounds;
                    }
                    SweepOutcome::Pending => {}
                    SweepOutcome::Drained => {
                        let bound = state.error_bound(scale);
                        if bound <= self.epsilon {
                            *finished = true;
                        } else if state.threshold * 0.5 < f64::EPSILON {
                            floor_hit = true;
                            *finished = true;
                        } else {
                            state.refine(matrix);
                        }
                    }
                }
                worst = worst.max(state.error_bound(scale));
            }
            result.convergence_history.push(ConvergenceInfo {
                iteration: round,
                residual_norm: worst,
            });
            debug!(round, worst_error_bound = worst, "forward push round");
        }

        if floor_hit {
            let msg = "push threshold reached round-off floor before the error bound".to_string();
            warn!("{msg}");
            result.warnings.push(msg);
        }

        let estimates: BTreeMap<usize, f64> =
            states.iter().map(|s| (s.source, s.estimate.dot(&z))).collect();
        let bound = states.iter().map(|s| s.error_bound(scale)).fold(0.0f64, f64::max);
        if full_vector {
            result.solution = Some(states.iter().map(|s| s.estimate.dot(&z)).collect());
        }
        result.entry_estimates = Some(estimates);
        result.iterations = budget.iterations_used();
        result.error_bound = Some(bound);
        result.residual_norm = bound;
        result.converged = bound <= self.epsilon;
        result.work = states.iter().map(|s| s.work).sum();
        result.wall_time = start.elapsed();

        if cancelled {
            result.converged = false;
            return Err(SolverError::Cancelled {
                partial: Box::new(result),
            });
        }
        info!(
            rounds = result.iterations,
            pushes = states.iter().map(|s| s.pushes).sum::<u64>(),
            error_bound = bound,
            converged = result.converged,
            "forward push finished",
        );
        Ok(result)
    }
}

impl SolverEngine for ForwardPushSolver {
    fn solve(
        &self,
        matrix: &dyn MatrixView,
        rhs: &[f64],
        budget: &mut BudgetEnforcer,
    ) -> Result<SolveResult, SolverError> {
        self.solve_with_budget(matrix, rhs, budget)
    }

    fn method(&self) -> SolverMethod {
        SolverMethod::ForwardPush
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
