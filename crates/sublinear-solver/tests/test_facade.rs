//! End-to-end tests through `SolverFacade`.

mod helpers;

use std::time::Duration;

use proptest::prelude::*;
use sublinear_solver::budget::CancellationToken;
use sublinear_solver::error::SolverError;
use sublinear_solver::facade::{RouterConfig, SolverFacade, SolverRouter};
use sublinear_solver::matrix::{DenseMatrix, Matrix};
use sublinear_solver::types::{SolverConfig, SolverMethod};

use helpers::{
    bidiagonal_rhs, column_dominant_bidiagonal, dense_solve, inf_distance,
    random_dominant_csr_with_margin, random_vector, spread_targets, tridiagonal,
};

#[test]
fn test_every_method_on_random_system() {
    let n = 25;
    let matrix = random_dominant_csr_with_margin(n, 0.2, 1.5, 404);
    let rhs = random_vector(n, 405);
    let exact = dense_solve(&matrix, &rhs);
    let facade = SolverFacade::new();
    let targets = spread_targets(n, 3);

    for method in SolverMethod::ALL {
        let config = SolverConfig::new(method)
            .with_epsilon(5e-3)
            .with_max_iterations(10_000)
            .with_targets(targets.clone())
            .with_seed(8);
        let result = facade.solve(&matrix, &rhs, &config).unwrap();
        assert_eq!(result.method, method);
        for &t in &targets {
            let err = (result.entry(t).unwrap() - exact[t]).abs();
            assert!(err < 2e-2, "{method}: target {t} error {err}");
        }
    }
}

#[test]
fn test_owned_matrix_enum_dispatches() {
    let matrix: Matrix = tridiagonal(10, 3.0).into();
    let rhs = vec![1.0; 10];
    let config = SolverConfig::new(SolverMethod::BackwardPush).with_epsilon(1e-9);

    let result = SolverFacade::new().solve(&matrix, &rhs, &config).unwrap();
    let x = result.solution.unwrap();
    let Matrix::Sparse(csr) = &matrix else {
        panic!("expected sparse storage");
    };
    assert!(inf_distance(&x, &dense_solve(csr, &rhs)) < 1e-8);
}

#[test]
fn test_iteration_budget_is_not_an_error() {
    let matrix = tridiagonal(200, 2.5);
    let rhs = vec![1.0; 200];
    let config = SolverConfig::new(SolverMethod::Neumann)
        .with_epsilon(1e-14)
        .with_max_iterations(3);

    let result = SolverFacade::new().solve(&matrix, &rhs, &config).unwrap();
    assert!(!result.converged);
    assert_eq!(result.iterations, 3);
    assert!(result.solution.is_some());
}

#[test]
fn test_pre_cancelled_token_returns_partial() {
    let matrix = tridiagonal(50, 3.0);
    let rhs = vec![1.0; 50];
    let cancel = CancellationToken::new();
    cancel.cancel();

    for method in [SolverMethod::Neumann, SolverMethod::ForwardPush, SolverMethod::RandomWalk] {
        let config = SolverConfig::new(method).with_targets(vec![25]).with_seed(1);
        let err = SolverFacade::new()
            .solve_with_cancel(&matrix, &rhs, &config, &cancel)
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled", "{method}");
        let partial = err.partial().unwrap();
        assert!(!partial.converged);
        assert_eq!(partial.method, method);
    }
}

#[test]
fn test_zero_time_budget_stops_early() {
    let matrix = tridiagonal(100, 2.1);
    let rhs = vec![1.0; 100];
    let mut config = SolverConfig::new(SolverMethod::Neumann)
        .with_epsilon(1e-15)
        .with_max_iterations(1_000_000);
    config.max_time = Some(Duration::ZERO);

    let result = SolverFacade::new().solve(&matrix, &rhs, &config).unwrap();
    assert!(!result.converged);
    assert!(result.iterations <= 1);
}

#[test]
fn test_dominance_gate_rejects_non_dominant() {
    let a = DenseMatrix::from_rows(vec![vec![1.0, 3.0], vec![3.0, 1.0]]).unwrap();
    for method in SolverMethod::ALL {
        let config = SolverConfig::new(method).with_targets(vec![0]);
        let err = SolverFacade::new().solve(&a, &[1.0, 1.0], &config).unwrap_err();
        assert!(
            matches!(err, SolverError::NonDominantMatrix { .. }),
            "{method}: {err:?}"
        );
    }
}

#[test]
fn test_column_dominant_neumann_converges_through_growing_updates() {
    let n = 5;
    let matrix = column_dominant_bidiagonal(n);
    let (rhs, exact) = bidiagonal_rhs(n);
    let config = SolverConfig::new(SolverMethod::Neumann).with_epsilon(1e-8);

    let result = SolverFacade::new().solve(&matrix, &rhs, &config).unwrap();
    assert!(result.converged);
    assert!(result.warnings.iter().any(|w| w.contains("column")));

    // max-norm updates 5, 25, 125, 625 before the nilpotent sweep lands
    let updates: Vec<f64> = result.convergence_history.iter().map(|c| c.residual_norm).collect();
    assert_eq!(updates.len(), n - 1);
    assert!(updates.windows(2).all(|w| w[1] > w[0]), "{updates:?}");

    let x = result.solution.unwrap();
    assert!(inf_distance(&x, &exact) < 1e-9);
    assert!(inf_distance(&x, &dense_solve(&matrix, &rhs)) < 1e-9);
}

#[test]
fn test_column_dominant_system_still_rejected_for_push() {
    let matrix = column_dominant_bidiagonal(4);
    let (rhs, _) = bidiagonal_rhs(4);
    let config = SolverConfig::new(SolverMethod::ForwardPush).with_targets(vec![0]);
    let err = SolverFacade::new().solve(&matrix, &rhs, &config).unwrap_err();
    assert!(matches!(err, SolverError::NonDominantMatrix { .. }), "{err:?}");
}

#[test]
fn test_auto_routes_by_size() {
    let router = SolverRouter::new(RouterConfig {
        small_system_threshold: 10,
        ..Default::default()
    });
    let facade = SolverFacade::with_router(router);
    let matrix = tridiagonal(40, 4.0);
    let rhs = vec![1.0; 40];
    let cancel = CancellationToken::new();

    let config = SolverConfig::new(SolverMethod::Neumann)
        .with_epsilon(1e-6)
        .with_targets(vec![20]);
    let routed = facade.solve_auto(&matrix, &rhs, &config, &cancel).unwrap();
    assert_eq!(routed.method, SolverMethod::ForwardPush);
    assert!(routed.converged);
    assert!(routed.error_bound.unwrap() <= 1e-6);

    let config = SolverConfig::new(SolverMethod::Neumann)
        .with_epsilon(1e-2)
        .with_targets(vec![20])
        .with_seed(3);
    let routed = facade.solve_auto(&matrix, &rhs, &config, &cancel).unwrap();
    assert_eq!(routed.method, SolverMethod::RandomWalk);

    let config = SolverConfig::new(SolverMethod::Neumann).with_epsilon(1e-6);
    let routed = facade.solve_auto(&matrix, &rhs, &config, &cancel).unwrap();
    assert_eq!(routed.method, SolverMethod::Neumann);
}

// ---------------------------------------------------------------------------
// Property tests
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_deterministic_methods_respect_epsilon(
        n in 2usize..16,
        density in 0.1f64..0.6,
        seed in any::<u64>(),
    ) {
        let matrix = random_dominant_csr_with_margin(n, density, 1.2, seed);
        let rhs = random_vector(n, seed ^ 0xABCD);
        let exact = dense_solve(&matrix, &rhs);
        let facade = SolverFacade::new();
        let eps = 1e-6;

        for method in [
            SolverMethod::ForwardPush,
            SolverMethod::BackwardPush,
            SolverMethod::Bidirectional,
        ] {
            let config = SolverConfig::new(method)
                .with_epsilon(eps)
                .with_max_iterations(100_000);
            let result = facade.solve(&matrix, &rhs, &config).unwrap();
            prop_assert!(result.converged);
            let bound = result.error_bound.unwrap();
            prop_assert!(bound <= eps);
            for (i, xi) in exact.iter().enumerate() {
                let err = (result.entry(i).unwrap() - xi).abs();
                prop_assert!(err <= bound + 1e-12, "{} entry {}: {} > {}", method, i, err, bound);
            }
        }
    }

    #[test]
    fn prop_neumann_residual_below_epsilon(
        n in 1usize..20,
        seed in any::<u64>(),
    ) {
        let matrix = random_dominant_csr_with_margin(n, 0.3, 1.2, seed);
        let rhs = random_vector(n, seed.wrapping_add(1));
        let config = SolverConfig::new(SolverMethod::Neumann)
            .with_epsilon(1e-9)
            .with_max_iterations(100_000);
        let result = SolverFacade::new().solve(&matrix, &rhs, &config).unwrap();
        prop_assert!(result.converged);
        prop_assert!(result.residual_norm < 1e-9);
    }
}
