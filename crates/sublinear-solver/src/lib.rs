//! Sublinear-time estimators for diagonally dominant linear systems.
//!
//! Given `A x = b` with `A` strictly diagonally dominant, every estimator
//! works on the Jacobi splitting `M = I - D^{-1} A`, `z = D^{-1} b`, where
//! `x = (I - M)^{-1} z`. Entry-wise methods read only the rows they visit,
//! so a handful of solution entries costs far less than a full solve.
//!
//! # Available Solvers
//!
//! | Solver | Output | Method |
//! |--------|--------|--------|
//! | [`NeumannSolver`](neumann::NeumannSolver) | full vector | Jacobi iteration `x_{k+1} = x_k + D^{-1}(b - A x_k)` |
//! | [`RandomWalkSolver`](random_walk::RandomWalkSolver) | selected entries | Ulam-von Neumann walks with Hoeffding walk counts |
//! | [`ForwardPushSolver`](forward_push::ForwardPushSolver) | selected entries | local residual push from each target row |
//! | [`BackwardPushSolver`](backward_push::BackwardPushSolver) | full vector | residual push over the columns of `M` |
//! | [`BidirectionalSolver`](bidirectional::BidirectionalSolver) | selected entries | backward push meeting forward push |
//!
//! [`SolverFacade`](facade::SolverFacade) validates input, gates on
//! dominance, enforces the iteration/time budget, and dispatches. The
//! [`api`] module wraps it in the JSON request/response contract.
//!
//! # Example
//!
//! ```rust
//! use sublinear_solver::facade::SolverFacade;
//! use sublinear_solver::types::{CsrMatrix, SolverConfig, SolverMethod};
//!
//! let a = CsrMatrix::<f64>::from_coo(3, 3, vec![
//!     (0, 0, 4.0), (0, 1, -1.0),
//!     (1, 0, -1.0), (1, 1, 4.0), (1, 2, -1.0),
//!     (2, 1, -1.0), (2, 2, 4.0),
//! ]).unwrap();
//! let b = [1.0, 2.0, 3.0];
//!
//! let config = SolverConfig::new(SolverMethod::ForwardPush)
//!     .with_epsilon(1e-6)
//!     .with_targets(vec![1]);
//! let result = SolverFacade::new().solve(&a, &b, &config).unwrap();
//! let x1 = result.entry(1).unwrap();
//! assert!(result.error_bound.unwrap() <= 1e-6);
//! assert!((x1 - 6.0 / 7.0).abs() < 1e-6);
//! ```

pub mod analysis;
pub mod api;
pub mod backward_push;
pub mod bidirectional;
pub mod budget;
pub mod error;
pub mod facade;
pub mod forward_push;
pub mod matrix;
pub mod neumann;
pub mod random_walk;
pub mod traits;
pub mod types;
pub mod validation;

pub use error::{SolverError, ValidationError};
pub use facade::SolverFacade;
pub use matrix::{DenseMatrix, Matrix, MatrixView};
pub use types::{CsrMatrix, SolveResult, SolverConfig, SolverMethod};
