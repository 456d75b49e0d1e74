//! Compute budget enforcement and cooperative cancellation.
//!
//! [`BudgetEnforcer`] tracks wall-clock time and iteration count for one
//! solve. Solvers call [`check_iteration`](BudgetEnforcer::check_iteration)
//! at the top of each iteration, walk round, or push round and stop as soon
//! as it reports anything other than [`BudgetStatus::Continue`].
//!
//! Exhausting the budget is not an error: the solver returns its best
//! estimate with `converged == false`. Only cancellation turns into
//! [`SolverError::Cancelled`](crate::error::SolverError::Cancelled).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// CancellationToken
// ---------------------------------------------------------------------------

/// Shared cancellation flag.
///
/// Clones share the same flag, so a token handed to a solve can be cancelled
/// from another thread.
///
/// ```
/// use sublinear_solver::budget::CancellationToken;
///
/// let token = CancellationToken::new();
/// let remote = token.clone();
/// remote.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// BudgetEnforcer
// ---------------------------------------------------------------------------

/// Outcome of a budget check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    /// Keep going.
    Continue,
    /// The iteration limit has been reached.
    IterationsExhausted,
    /// The wall-clock limit has been reached.
    TimeExhausted,
    /// The cancellation token fired.
    Cancelled,
}

/// Enforces iteration, wall-time, and cancellation limits during a solve.
///
/// Create one at the start of a solve. The enforcer is intentionally
/// non-`Clone` so that each solve owns exactly one.
///
/// ```
/// use sublinear_solver::budget::{BudgetEnforcer, BudgetStatus, CancellationToken};
///
/// let mut enforcer = BudgetEnforcer::new(2, None, CancellationToken::new());
/// assert_eq!(enforcer.check_iteration(), BudgetStatus::Continue);
/// assert_eq!(enforcer.check_iteration(), BudgetStatus::Continue);
/// assert_eq!(enforcer.check_iteration(), BudgetStatus::IterationsExhausted);
/// assert_eq!(enforcer.iterations_used(), 2);
/// ```
#[derive(Debug)]
pub struct BudgetEnforcer {
    start_time: Instant,
    max_iterations: usize,
    max_time: Option<Duration>,
    cancel: CancellationToken,
    iterations_used: usize,
}

impl BudgetEnforcer {
    /// Create a new enforcer. The wall-clock timer starts immediately.
    pub fn new(max_iterations: usize, max_time: Option<Duration>, cancel: CancellationToken) -> Self {
        Self {
            start_time: Instant::now(),
            max_iterations,
            max_time,
            cancel,
            iterations_used: 0,
        }
    }

    /// Check whether another iteration may start.
    ///
    /// Must be called **once per iteration**, at the top of the loop body.
    /// On [`BudgetStatus::Continue`] the iteration counter is incremented.
    /// Cancellation is checked first so that a cancelled solve never reports
    /// plain exhaustion.
    pub fn check_iteration(&mut self) -> BudgetStatus {
        let status = self.status();
        if status == BudgetStatus::Continue {
            self.iterations_used += 1;
        }
        status
    }

    /// Current status without consuming an iteration.
    pub fn status(&self) -> BudgetStatus {
        if self.cancel.is_cancelled() {
            return BudgetStatus::Cancelled;
        }
        if self.iterations_used >= self.max_iterations {
            return BudgetStatus::IterationsExhausted;
        }
        if let Some(limit) = self.max_time {
            if self.start_time.elapsed() > limit {
                return BudgetStatus::TimeExhausted;
            }
        }
        BudgetStatus::Continue
    }

    /// Whether the cancellation token has fired.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wall-clock duration elapsed since the enforcer was created.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Number of iterations started so far.
    #[inline]
    pub fn iterations_used(&self) -> usize {
        self.iterations_used
    }

    /// The iteration limit.
    #[inline]
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
