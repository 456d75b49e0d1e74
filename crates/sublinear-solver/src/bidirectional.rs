//! Bidirectional push: forward push from the target row combined with
//! backward push from the right-hand side.
//!
//! With the forward invariant `e_i^T G = p_f^T + r_f^T G` and the backward
//! invariant `G z = p_b + G r_b`,
//!
//! ```text
//! x_i = p_f . z + r_f . p_b + r_f^T G r_b
//! ```
//!
//! so `p_f . z + r_f . p_b` estimates `x_i` with certified error
//! `||r_f||_1 ||r_b||_inf / (1 - rho_max)`. Both sides start at thresholds
//! whose product is `epsilon * (1 - rho_max)` and are halved together when
//! both queues drain above the target accuracy.
//!
//! One backward state is shared by every target.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::analysis::JacobiSplit;
use crate::backward_push::{BackwardState, MColumns};
use crate::budget::{BudgetEnforcer, BudgetStatus, CancellationToken};
use crate::error::SolverError;
use crate::forward_push::{check_threshold, ForwardState, SweepOutcome};
use crate::matrix::MatrixView;
use crate::traits::SolverEngine;
use crate::types::{ConvergenceInfo, SolveResult, SolverConfig, SolverMethod};
use crate::validation::{
    validate_alpha, validate_params, validate_rhs, validate_square, validate_targets,
};

/// Per-target diagnostics from a bidirectional solve.
#[derive(Debug, Clone, PartialEq)]
pub struct MeetingDiagnostics {
    /// Estimated entry.
    pub target: usize,
    /// First round at which forward-touched and backward-pushed nodes
    /// intersected, if they ever did.
    pub meeting_round: Option<usize>,
    /// Pushes performed by this target's forward side.
    pub forward_pushes: u64,
    /// Final certified error bound.
    pub error_bound: f64,
}

/// Bidirectional estimator for selected entries of `x`.
#[derive(Debug, Clone)]
pub struct BidirectionalSolver {
    pub epsilon: f64,
    pub max_rounds: usize,
    /// Entries to estimate; empty means all.
    pub targets: Vec<usize>,
    /// Push damping for both sides; `None` means 1.
    pub alpha: Option<f64>,
    /// Forward threshold override. The backward threshold is chosen so the
    /// product stays `epsilon * (1 - rho_max)`.
    pub threshold: Option<f64>,
}

impl BidirectionalSolver {
    pub fn new(epsilon: f64, max_rounds: usize) -> Self {
        Self {
            epsilon,
            max_rounds,
            targets: Vec::new(),
            alpha: None,
            threshold: None,
        }
    }

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
    /// See [`solve_detailed`](Self::solve_detailed).
    pub fn solve(&self, matrix: &dyn MatrixView, rhs: &[f64]) -> Result<SolveResult, SolverError> {
        let mut budget = BudgetEnforcer::new(self.max_rounds, None, CancellationToken::new());
        self.solve_detailed(matrix, rhs, &mut budget).map(|(result, _)| result)
    }

    /// Solve under `budget`, also returning per-target meeting diagnostics.
    ///
    /// # Errors
    ///
    /// - [`SolverError::NonDominantMatrix`] unless `rho_max < 1`.
    /// - [`SolverError::ResidualOverflow`] for unusable thresholds.
    /// - [`SolverError::Cancelled`] carrying the estimates so far.
    #[instrument(skip(self, matrix, rhs, budget), fields(n = matrix.dim(), targets = self.targets.len()))]
    pub fn solve_detailed(
        &self,
        matrix: &dyn MatrixView,
        rhs: &[f64],
        budget: &mut BudgetEnforcer,
    ) -> Result<(SolveResult, Vec<MeetingDiagnostics>), SolverError> {
        let start = Instant::now();
        let n = validate_square(matrix)?;
        validate_rhs(rhs, n)?;
        validate_params(self.epsilon, self.max_rounds)?;
        validate_alpha(self.alpha)?;
        validate_targets(&self.targets, n)?;

        let mut result = SolveResult::empty(SolverMethod::Bidirectional);
        if n == 0 {
            result.solution = Some(Vec::new());
            return Ok((result, Vec::new()));
        }

        let split = JacobiSplit::new(matrix)?;
        split.require_contraction()?;
        let z = split.scaled_rhs(rhs);
        let z_norm = z.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let inverse = split.inverse_bound();
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
            let diagnostics = targets
                .iter()
                .map(|&t| MeetingDiagnostics {
                    target: t,
                    meeting_round: None,
                    forward_pushes: 0,
                    error_bound: 0.0,
                })
                .collect();
            return Ok((result, diagnostics));
        }

        // Balanced split of epsilon * (1 - rho_max) between the two sides.
        let product = self.epsilon * split.dominance_ratio();
        let forward_threshold = self.threshold.unwrap_or_else(|| (product / z_norm).sqrt());
        check_threshold(forward_threshold, 1.0)?;
        let backward_threshold = product / forward_threshold;
        check_threshold(backward_threshold, z_norm)?;
        debug!(forward_threshold, backward_threshold, "bidirectional thresholds");

        let columns = MColumns::new(matrix);
        let mut backward = BackwardState::new(z.clone(), backward_threshold);
        let mut forwards: Vec<ForwardState> = targets
            .iter()
            .map(|&t| ForwardState::new(matrix, t, forward_threshold))
            .collect();
        let mut meeting: Vec<Option<usize>> = vec![None; targets.len()];

        let bound_of = |f: &ForwardState, b: &BackwardState| {
            f.residual.l1_norm() * b.residual_inf_norm() * inverse
        };
        let mut done: Vec<bool> = forwards
            .iter()
            .map(|f| bound_of(f, &backward) <= self.epsilon)
            .collect();
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

            if !backward.is_drained()
                && backward.sweep(&columns, &split, alpha, budget) == SweepOutcome::Cancelled
            {
                cancelled = true;
                break;
            }

            for (k, forward) in forwards.iter_mut().enumerate() {
                if done[k] {
                    continue;
                }
                if !forward.is_drained()
                    && forward.sweep(matrix, &split, alpha, budget) == SweepOutcome::Cancelled
                {
                    cancelled = true;
                    break 'rounds;
                }
                if meeting[k].is_none() && forward.residual.support().any(|u| backward.pushed[u]) {
                    meeting[k] = Some(round);
                    debug!(target = forward.source, round, "forward and backward frontiers met");
                }
            }

            let mut refine_backward = false;
            let mut worst = 0.0f64;
            for (k, forward) in forwards.iter_mut().enumerate() {
                if done[k] {
                    continue;
                }
                let bound = bound_of(forward, &backward);
                worst = worst.max(bound);
                if bound <= self.epsilon {
                    done[k] = true;
                } else if forward.is_drained() && backward.is_drained() {
                    if forward.threshold * 0.5 < f64::EPSILON {
                        floor_hit = true;
                        done[k] = true;
                    } else {
                        forward.refine(matrix);
                        refine_backward = true;
                    }
                }
            }
            if refine_backward {
                if backward.threshold * 0.5 < f64::EPSILON * backward.initial_norm {
                    floor_hit = true;
                } else {
                    backward.refine();
                }
            }

            result.convergence_history.push(ConvergenceInfo {
                iteration: round,
                residual_norm: worst,
            });
            debug!(round, worst_error_bound = worst, "bidirectional round");
        }

        if floor_hit {
            let msg = "push threshold reached round-off floor before the error bound".to_string();
            warn!("{msg}");
            result.warnings.push(msg);
        }

        let estimates: Vec<f64> = forwards
            .iter()
            .map(|f| f.estimate.dot(&z) + f.residual.dot(&backward.estimate))
            .collect();
        let bounds: Vec<f64> = forwards.iter().map(|f| bound_of(f, &backward)).collect();
        let bound = bounds.iter().copied().fold(0.0f64, f64::max);

        let diagnostics: Vec<MeetingDiagnostics> = forwards
            .iter()
            .zip(&meeting)
            .zip(&bounds)
            .map(|((f, &m), &b)| MeetingDiagnostics {
                target: f.source,
                meeting_round: m,
                forward_pushes: f.pushes,
                error_bound: b,
            })
            .collect();

        result.entry_estimates = Some(
            targets
                .iter()
                .copied()
                .zip(estimates.iter().copied())
                .collect::<BTreeMap<_, _>>(),
        );
        if full_vector {
            result.solution = Some(estimates);
        }
        result.iterations = budget.iterations_used();
        result.error_bound = Some(bound);
        result.residual_norm = bound;
        result.converged = bound <= self.epsilon && !cancelled;
        result.work = backward.work + forwards.iter().map(|f| f.work).sum::<u64>();
        result.wall_time = start.elapsed();

        if cancelled {
            return Err(SolverError::Cancelled {
                partial: Box::new(result),
            });
        }
        info!(
            rounds = result.iterations,
            backward_pushes = backward.pushes,
            error_bound = bound,
            converged = result.converged,
            "bidirectional push finished",
        );
        Ok((result, diagnostics))
    }
}

impl SolverEngine for BidirectionalSolver {
    fn solve(
        &self,
        matrix: &dyn MatrixView,
        rhs: &[f64],
        budget: &mut BudgetEnforcer,
    ) -> Result<SolveResult, SolverError> {
        self.solve_detailed(matrix, rhs, budget).map(|(result, _)| result)
    }

    fn method(&self) -> SolverMethod {
        SolverMethod::Bidirectional
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::DenseMatrix;
    use crate::types::CsrMatrix;

    fn path(n: usize) -> CsrMatrix<f64> {
        let mut entries = Vec::new();
        for i in 0..n {
            entries.push((i, i, 3.0));
            if i + 1 < n {
                entries.push((i, i + 1, -1.0));
                entries.push((i + 1, i, -1.0));
            }
        }
        CsrMatrix::<f64>::from_coo(n, n, entries).unwrap()
    }

    #[test]
    fn two_by_two() {
        let a = DenseMatrix::from_rows(vec![vec![4.0, -1.0], vec![-1.0, 4.0]]).unwrap();
        let result = BidirectionalSolver::new(1e-10, 500).solve(&a, &[1.0, 2.0]).unwrap();
        let x = result.solution.unwrap();
        assert!((x[0] - 0.4).abs() < 1e-10);
        assert!((x[1] - 0.6).abs() < 1e-10);
        assert!(result.converged);
    }

    #[test]
    fn bound_is_certified() {
        let n = 120;
        let a = path(n);
        let b: Vec<f64> = (0..n).map(|i| ((i * 7) % 5) as f64 - 2.0).collect();
        let exact = crate::neumann::NeumannSolver::new(1e-13, 10_000)
            .solve(&a, &b)
            .unwrap()
            .solution
            .unwrap();
        let result = BidirectionalSolver::new(1e-6, 1000)
            .with_targets(vec![3, 60, 119])
            .solve(&a, &b)
            .unwrap();
        let bound = result.error_bound.unwrap();
        assert!(result.converged);
        for (t, est) in result.entry_estimates.unwrap() {
            assert!((est - exact[t]).abs() <= bound + 1e-12, "target {t}");
        }
    }

    #[test]
    fn meeting_is_reported() {
        let a = path(30);
        let b = vec![1.0; 30];
        let mut budget = BudgetEnforcer::new(500, None, CancellationToken::new());
        let (_, diagnostics) = BidirectionalSolver::new(1e-8, 500)
            .with_targets(vec![15])
            .solve_detailed(&a, &b, &mut budget)
            .unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].target, 15);
        assert!(diagnostics[0].meeting_round.is_some());
        assert!(diagnostics[0].error_bound <= 1e-8);
    }

    #[test]
    fn zero_rhs() {
        let a = path(4);
        let result = BidirectionalSolver::new(1e-6, 10).with_targets(vec![1]).solve(&a, &[0.0; 4]).unwrap();
        assert_eq!(result.entry(1), Some(0.0));
        assert_eq!(result.error_bound, Some(0.0));
    }

    #[test]
    fn negative_threshold_overflows() {
        let a = path(4);
        let err = BidirectionalSolver::new(1e-6, 10)
            .with_threshold(-1.0)
            .solve(&a, &[1.0; 4])
            .unwrap_err();
        assert!(matches!(err, SolverError::ResidualOverflow { .. }));
    }
}
