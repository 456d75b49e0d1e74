//! Random-walk Monte Carlo estimation of single solution entries.
//!
//! Estimates `x_i = sum_k (M^k z)_i` (with `M = I - D^{-1}A`, `z = D^{-1}b`)
//! by Ulam-von Neumann walks on the chain `P(u -> j) = |M_uj| / rho_u`.
//! At each node the walk continues with probability `rho_u` (or `1 - alpha`
//! when an absorption probability is forced) and its weight is multiplied by
//! `sign(M_uj) * rho_u / P(continue)`, which keeps both estimators unbiased:
//!
//! - [`WalkEstimator::Collision`]: every visited node contributes `W * z_u`.
//! - [`WalkEstimator::Absorption`]: the absorbing node contributes
//!   `W * z_u / P(absorb at u)`.
//!
//! # Walk count
//!
//! With `B = ||z||_inf / (1 - rho_max)` bounding every partial sum, Hoeffding
//! gives `num_walks = ceil(3 * ln(2/delta) * B^2 / epsilon^2)` for additive
//! error `epsilon` with probability `1 - delta`. Walks are truncated at the
//! length `L` where `rho_max^L * B <= epsilon / 2`.
//!
//! # Determinism
//!
//! Walks run in fixed-size chunks. Each chunk owns a [`StdRng`] seeded from
//! `(seed, target, chunk index)`, and per-chunk Welford accumulators are
//! merged in chunk order, so a fixed seed gives bit-identical results
//! regardless of the rayon thread count or the `parallel` feature.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, instrument, warn};

use crate::analysis::JacobiSplit;
use crate::budget::{BudgetEnforcer, BudgetStatus, CancellationToken};
use crate::error::{SolverError, ValidationError};
use crate::matrix::MatrixView;
use crate::traits::SolverEngine;
use crate::types::{
    ConvergenceInfo, SolveResult, SolverConfig, SolverMethod, WalkEstimator,
    DEFAULT_CONFIDENCE_DELTA, DEFAULT_MAX_WALKS,
};
use crate::validation::{validate_params, validate_rhs, validate_square, validate_targets};

// ---------------------------------------------------------------------------
// Welford's online variance tracker
// ---------------------------------------------------------------------------

/// Running mean and variance via Welford's numerically stable online
/// algorithm, with Chan's pairwise merge for combining chunks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WelfordAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
}

impl WelfordAccumulator {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one sample.
    #[inline]
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Fold another accumulator into this one.
    pub fn merge(&mut self, other: &WelfordAccumulator) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        let total = self.count + other.count;
        let delta = other.mean - self.mean;
        let (na, nb) = (self.count as f64, other.count as f64);
        self.mean += delta * nb / total as f64;
        self.m2 += other.m2 + delta * delta * na * nb / total as f64;
        self.count = total;
    }

    /// Number of samples.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Sample mean.
    #[inline]
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Unbiased sample variance.
    #[inline]
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return f64::INFINITY;
        }
        self.m2 / (self.count - 1) as f64
    }

    /// Standard error of the mean, `sqrt(variance / count)`.
    #[inline]
    pub fn standard_error(&self) -> f64 {
        if self.count < 2 {
            return f64::INFINITY;
        }
        (self.variance() / self.count as f64).sqrt()
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Walks simulated by one chunk (one RNG stream).
pub const CHUNK_WALKS: usize = 1024;

/// Chunks per target per round; cancellation and convergence are checked
/// between rounds.
const CHUNKS_PER_ROUND: usize = 16;

/// Lower clamp on the derived walk count.
pub const MIN_WALKS: usize = 256;

/// Hard cap on walk length.
pub const MAX_WALK_LENGTH: usize = 10_000;

/// Multiplier spreading targets across seed space.
const TARGET_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

// ---------------------------------------------------------------------------
// Solver struct
// ---------------------------------------------------------------------------

/// Monte Carlo estimator for selected entries of `x`.
///
/// # Example
///
/// ```rust
/// use sublinear_solver::matrix::DenseMatrix;
/// use sublinear_solver::random_walk::RandomWalkSolver;
///
/// let a = DenseMatrix::from_rows(vec![vec![4.0, -1.0], vec![-1.0, 4.0]]).unwrap();
/// let solver = RandomWalkSolver::new(1e-2, 1000)
///     .with_targets(vec![0])
///     .with_seed(7);
/// let result = solver.solve(&a, &[1.0, 2.0]).unwrap();
/// let x0 = result.entry(0).unwrap();
/// assert!((x0 - 0.4).abs() < 0.05);
/// ```
#[derive(Debug, Clone)]
pub struct RandomWalkSolver {
    /// Target additive accuracy.
    pub epsilon: f64,
    /// Maximum number of walk rounds.
    pub max_rounds: usize,
    /// Failure probability for the walk-count formula.
    pub delta: f64,
    /// Explicit walk count per target. Disables early termination.
    pub num_walks: Option<usize>,
    /// Cap on the derived walk count.
    pub max_walks: usize,
    /// Forced absorption probability; `None` absorbs with `1 - rho_u`.
    pub absorption: Option<f64>,
    /// RNG seed; `None` draws one from entropy per solve.
    pub seed: Option<u64>,
    /// Which estimator to accumulate.
    pub estimator: WalkEstimator,
    /// Entries to estimate; empty means all.
    pub targets: Vec<usize>,
}

impl RandomWalkSolver {
    /// Create a solver with default confidence and walk cap.
    pub fn new(epsilon: f64, max_rounds: usize) -> Self {
        Self {
            epsilon,
            max_rounds,
            delta: DEFAULT_CONFIDENCE_DELTA,
            num_walks: None,
            max_walks: DEFAULT_MAX_WALKS,
            absorption: None,
            seed: None,
            estimator: WalkEstimator::Collision,
            targets: Vec::new(),
        }
    }

    /// Build from a facade configuration.
    pub fn from_config(config: &SolverConfig) -> Self {
        Self {
            epsilon: config.epsilon,
            max_rounds: config.max_iterations,
            delta: config.confidence_delta,
            num_walks: config.num_walks,
            max_walks: config.max_walks,
            absorption: config.alpha,
            seed: config.seed,
            estimator: config.estimator,
            targets: config.targets.clone(),
        }
    }

    /// Set the RNG seed for reproducible results.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the entries to estimate.
    pub fn with_targets(mut self, targets: impl Into<Vec<usize>>) -> Self {
        self.targets = targets.into();
        self
    }

    /// Set an explicit number of walks per target.
    pub fn with_num_walks(mut self, num_walks: usize) -> Self {
        self.num_walks = Some(num_walks);
        self
    }

    /// Force a uniform absorption probability.
    pub fn with_absorption(mut self, alpha: f64) -> Self {
        self.absorption = Some(alpha);
        self
    }

    /// Select the estimator.
    pub fn with_estimator(mut self, estimator: WalkEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Hoeffding walk count `ceil(3 * ln(2/delta) * bound^2 / epsilon^2)`.
    pub fn walks_for_epsilon(epsilon: f64, delta: f64, bound: f64) -> usize {
        let eps = epsilon.max(1e-12);
        let d = delta.clamp(1e-15, 1.0 - 1e-15);
        let walks = (3.0 * (2.0 / d).ln() * bound * bound / (eps * eps)).ceil();
        if walks >= usize::MAX as f64 {
            usize::MAX
        } else {
            walks as usize
        }
    }

    /// Truncation length `L` with `rho^L * bound <= epsilon / 2`.
    pub fn walk_length_for(epsilon: f64, rho_max: f64, bound: f64) -> usize {
        if rho_max <= 0.0 || bound <= 0.0 || bound <= epsilon / 2.0 {
            return 1;
        }
        if rho_max >= 1.0 {
            return MAX_WALK_LENGTH;
        }
        let steps = ((epsilon / (2.0 * bound)).ln() / rho_max.ln()).ceil();
        (steps as usize).clamp(1, MAX_WALK_LENGTH)
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

    fn validate(&self, n: usize) -> Result<(), SolverError> {
        validate_params(self.epsilon, self.max_rounds)?;
        validate_targets(&self.targets, n)?;
        if !(self.delta.is_finite() && self.delta > 0.0 && self.delta < 1.0) {
            return Err(ValidationError::out_of_range("delta", self.delta, "(0, 1)").into());
        }
        if let Some(a) = self.absorption {
            if !(a.is_finite() && a > 0.0 && a <= 1.0) {
                return Err(ValidationError::out_of_range("alpha", a, "(0, 1]").into());
            }
        }
        if self.num_walks == Some(0) || self.max_walks == 0 {
            return Err(ValidationError::out_of_range("num_walks", 0, "> 0").into());
        }
        Ok(())
    }

    /// Estimate the configured target entries.
    ///
    /// # Errors
    ///
    /// - [`SolverError::ShapeMismatch`] / [`SolverError::IndexOutOfRange`]
    ///   for inconsistent inputs.
    /// - [`SolverError::DegenerateDiagonal`] if some `A_ii == 0`.
    /// - [`SolverError::NonDominantMatrix`] unless `rho_max < 1`.
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
        self.validate(n)?;

        let mut result = SolveResult::empty(SolverMethod::RandomWalk);
        if n == 0 {
            result.solution = Some(Vec::new());
            return Ok(result);
        }

        let split = JacobiSplit::new(matrix)?;
        split.require_contraction()?;
        let z = split.scaled_rhs(rhs);
        let z_norm = z.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let bound = z_norm * split.inverse_bound();

        let full_vector = self.targets.is_empty();
        let targets: Vec<usize> = if full_vector {
            (0..n).collect()
        } else {
            self.targets.clone()
        };

        let num_walks = match self.num_walks {
            Some(w) => w,
            None => {
                let derived = Self::walks_for_epsilon(self.epsilon, self.delta, bound);
                if derived > self.max_walks {
                    let msg = format!(
                        "walk count {derived} clamped to {}; accuracy guarantee weakened",
                        self.max_walks
                    );
                    warn!("{msg}");
                    result.warnings.push(msg);
                }
                derived.clamp(MIN_WALKS.min(self.max_walks), self.max_walks)
            }
        };
        let early_stop = self.num_walks.is_none();
        let max_length = Self::walk_length_for(self.epsilon, split.max_contraction(), bound);
        if max_length == MAX_WALK_LENGTH {
            let msg = format!("walk length capped at {MAX_WALK_LENGTH}; truncation bias may exceed epsilon/2");
            warn!("{msg}");
            result.warnings.push(msg);
        }
        let early_stop_z = (2.0 * (2.0 / self.delta).ln()).sqrt();

        let base_seed = match self.seed {
            Some(s) => s,
            None => StdRng::from_entropy().gen::<u64>(),
        };
        debug!(num_walks, max_length, bound, base_seed, "random walk plan");

        let params = WalkParams {
            matrix,
            split: &split,
            z: &z,
            absorption: self.absorption,
            estimator: self.estimator,
            max_length,
        };

        let mut states: Vec<TargetState> = targets
            .iter()
            .map(|&t| TargetState {
                target: t,
                acc: WelfordAccumulator::new(),
                next_chunk: 0,
                done: false,
            })
            .collect();
        let total_chunks = num_walks.div_ceil(CHUNK_WALKS);

        // ------------------------------------------------------------------
        // Rounds
        // ------------------------------------------------------------------
        let mut cancelled = false;
        while states.iter().any(|s| !s.done) {
            match budget.check_iteration() {
                BudgetStatus::Continue => {}
                BudgetStatus::IterationsExhausted | BudgetStatus::TimeExhausted => break,
                BudgetStatus::Cancelled => {
                    cancelled = true;
                    break;
                }
            }
            let round = budget.iterations_used();

            let mut jobs: Vec<ChunkJob> = Vec::new();
            for (slot, state) in states.iter_mut().enumerate() {
                if state.done {
                    continue;
                }
                let end = (state.next_chunk + CHUNKS_PER_ROUND).min(total_chunks);
                for chunk in state.next_chunk..end {
                    let walks = CHUNK_WALKS.min(num_walks - chunk * CHUNK_WALKS);
                    jobs.push(ChunkJob {
                        slot,
                        seed: chunk_seed(base_seed, state.target, chunk),
                        target: state.target,
                        walks,
                    });
                }
                state.next_chunk = end;
            }

            let outcomes = run_jobs(&params, &jobs);
            for (job, outcome) in jobs.iter().zip(outcomes) {
                states[job.slot].acc.merge(&outcome.acc);
                result.work += outcome.steps;
            }

            let mut worst = 0.0f64;
            for state in states.iter_mut().filter(|s| !s.done) {
                let se = state.acc.standard_error();
                worst = worst.max(se);
                if state.next_chunk >= total_chunks
                    || (early_stop && se * early_stop_z < self.epsilon)
                {
                    state.done = true;
                }
            }
            result.convergence_history.push(ConvergenceInfo {
                iteration: round,
                residual_norm: worst,
            });
            debug!(round, worst_standard_error = worst, "random walk round");
        }

        // ------------------------------------------------------------------
        // Assemble
        // ------------------------------------------------------------------
        let standard_error = states
            .iter()
            .map(|s| if s.acc.count() > 0 { s.acc.standard_error() } else { f64::INFINITY })
            .fold(0.0f64, f64::max);
        let estimates: std::collections::BTreeMap<usize, f64> =
            states.iter().map(|s| (s.target, s.acc.mean())).collect();
        if full_vector {
            result.solution = Some(states.iter().map(|s| s.acc.mean()).collect());
        }
        result.entry_estimates = Some(estimates);
        result.iterations = budget.iterations_used();
        result.standard_error = Some(standard_error);
        result.residual_norm = standard_error;
        result.converged = standard_error < self.epsilon;
        result.wall_time = start.elapsed();

        if cancelled {
            result.converged = false;
            return Err(SolverError::Cancelled {
                partial: Box::new(result),
            });
        }
        info!(
            rounds = result.iterations,
            walk_steps = result.work,
            standard_error,
            converged = result.converged,
            "random walk estimation finished",
        );
        Ok(result)
    }
}

impl SolverEngine for RandomWalkSolver {
    fn solve(
        &self,
        matrix: &dyn MatrixView,
        rhs: &[f64],
        budget: &mut BudgetEnforcer,
    ) -> Result<SolveResult, SolverError> {
        self.solve_with_budget(matrix, rhs, budget)
    }

    fn method(&self) -> SolverMethod {
        SolverMethod::RandomWalk
    }
}

// ---------------------------------------------------------------------------
// Walk simulation
// ---------------------------------------------------------------------------

struct TargetState {
    target: usize,
    acc: WelfordAccumulator,
    next_chunk: usize,
    done: bool,
}

struct ChunkJob {
    slot: usize,
    seed: u64,
    target: usize,
    walks: usize,
}

struct ChunkOutcome {
    acc: WelfordAccumulator,
    steps: u64,
}

struct WalkParams<'a> {
    matrix: &'a dyn MatrixView,
    split: &'a JacobiSplit,
    z: &'a [f64],
    absorption: Option<f64>,
    estimator: WalkEstimator,
    max_length: usize,
}

/// Seed for chunk `chunk` of `target`.
#[inline]
fn chunk_seed(base: u64, target: usize, chunk: usize) -> u64 {
    base.wrapping_add((target as u64).wrapping_mul(TARGET_SEED_STRIDE))
        .wrapping_add(chunk as u64 * 1000003)
}

#[cfg(feature = "parallel")]
fn run_jobs(params: &WalkParams<'_>, jobs: &[ChunkJob]) -> Vec<ChunkOutcome> {
    use rayon::prelude::*;
    jobs.par_iter().map(|job| run_chunk(params, job)).collect()
}

#[cfg(not(feature = "parallel"))]
fn run_jobs(params: &WalkParams<'_>, jobs: &[ChunkJob]) -> Vec<ChunkOutcome> {
    jobs.iter().map(|job| run_chunk(params, job)).collect()
}

fn run_chunk(params: &WalkParams<'_>, job: &ChunkJob) -> ChunkOutcome {
    let mut rng = StdRng::seed_from_u64(job.seed);
    let mut acc = WelfordAccumulator::new();
    let mut steps = 0u64;
    for _ in 0..job.walks {
        let (value, taken) = single_walk(params, job.target, &mut rng);
        acc.update(value);
        steps += taken;
    }
    ChunkOutcome { acc, steps }
}

/// Simulate one walk from `start`. Returns the sample and the number of
/// transitions taken.
fn single_walk(params: &WalkParams<'_>, start: usize, rng: &mut StdRng) -> (f64, u64) {
    let split = params.split;
    let mut current = start;
    let mut weight = 1.0f64;
    let mut value = 0.0f64;
    let mut steps = 0u64;

    for _ in 0..params.max_length {
        let rho = split.contraction(current);
        let p_continue = match params.absorption {
            Some(alpha) if rho > 0.0 => 1.0 - alpha,
            _ => rho,
        };

        if params.estimator == WalkEstimator::Collision {
            value += weight * params.z[current];
        }

        if p_continue <= 0.0 || rng.gen::<f64>() >= p_continue {
            if params.estimator == WalkEstimator::Absorption {
                value += weight * params.z[current] / (1.0 - p_continue);
            }
            return (value, steps);
        }

        let (next, m) = sample_transition(params.matrix, split, current, rho, rng);
        weight *= m.signum() * rho / p_continue;
        current = next;
        steps += 1;
    }

    // Truncated: the collision estimator already holds the partial sum; the
    // absorption estimator drops the tail.
    (value, steps)
}

/// Draw `j` with probability `|M_uj| / rho_u`. Returns `(j, M_uj)`.
#[inline]
fn sample_transition(
    matrix: &dyn MatrixView,
    split: &JacobiSplit,
    u: usize,
    rho: f64,
    rng: &mut StdRng,
) -> (usize, f64) {
    let threshold = rng.gen::<f64>() * rho;
    let mut cumulative = 0.0f64;
    let mut last = (u, 0.0);
    for (j, m) in split.m_row(matrix, u) {
        cumulative += m.abs();
        last = (j, m);
        if cumulative > threshold {
            return (j, m);
        }
    }
    last
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
