//! Fixtures for the integration tests: seeded system generators, a dense
//! reference solve, and the error measures the assertions use.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sublinear_solver::matrix::MatrixView;
use sublinear_solver::types::CsrMatrix;

fn coo(n: usize, entries: Vec<(usize, usize, f64)>) -> CsrMatrix<f64> {
    CsrMatrix::<f64>::from_coo(n, n, entries).unwrap()
}

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

/// Seeded strictly row dominant system matrix.
///
/// Every off-diagonal position of row `i` is kept with probability `density`
/// and drawn from `[-1, 1)`. A row that keeps nothing is linked to `i + 1`.
/// The diagonal is `margin * sum_j |A_ij| + U[1, 2)`, so for `margin >= 1`
/// each row ratio lies in `(1 - 1/margin, 1]`.
pub fn random_dominant_csr_with_margin(n: usize, density: f64, margin: f64, seed: u64) -> CsrMatrix<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut entries = Vec::new();
    for i in 0..n {
        let first = entries.len();
        for j in (0..n).filter(|&j| j != i) {
            if rng.gen_bool(density) {
                entries.push((i, j, rng.gen_range(-1.0..1.0)));
            }
        }
        if entries.len() == first && n > 1 {
            entries.push((i, (i + 1) % n, rng.gen_range(0.1..0.5)));
        }
        let off: f64 = entries[first..].iter().map(|&(_, _, v): &(usize, usize, f64)| v.abs()).sum();
        entries.push((i, i, margin * off + rng.gen_range(1.0..2.0)));
    }
    coo(n, entries)
}

/// `[-1, d, -1]` on the three central diagonals.
pub fn tridiagonal(n: usize, d: f64) -> CsrMatrix<f64> {
    let entries = (0..n)
        .flat_map(|i| {
            let left = i.checked_sub(1).map(|j| (i, j, -1.0));
            let right = (i + 1 < n).then_some((i, i + 1, -1.0));
            left.into_iter().chain(Some((i, i, d))).chain(right)
        })
        .collect();
    coo(n, entries)
}

/// Upper bidiagonal with `A_ii = 10^i` and `A_{i,i+1} = 5 * 10^i`.
///
/// Columns are strictly dominant (ratio 1/2) while rows are not. `M` is
/// nilpotent, so Jacobi is exact after `n` sweeps, yet on
/// [`bidiagonal_rhs`] its max-norm update grows fivefold per sweep.
pub fn column_dominant_bidiagonal(n: usize) -> CsrMatrix<f64> {
    let mut entries = Vec::with_capacity(2 * n);
    let mut scale = 1.0;
    for i in 0..n {
        entries.push((i, i, scale));
        if i + 1 < n {
            entries.push((i, i + 1, 5.0 * scale));
        }
        scale *= 10.0;
    }
    coo(n, entries)
}

/// `10^(n-1) e_{n-1}`; the solution of [`column_dominant_bidiagonal`] is
/// then `x_i = (-5)^(n-1-i)`.
pub fn bidiagonal_rhs(n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut rhs = vec![0.0; n];
    rhs[n - 1] = 10f64.powi(n as i32 - 1);
    let exact = (0..n).map(|i| (-5f64).powi((n - 1 - i) as i32)).collect();
    (rhs, exact)
}

/// Seeded vector in `[-1, 1)^n`.
pub fn random_vector(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// `count` targets spread evenly over `0..n`, both ends included.
pub fn spread_targets(n: usize, count: usize) -> Vec<usize> {
    match count {
        0 => Vec::new(),
        1 => vec![0],
        _ => (0..count).map(|k| k * (n - 1) / (count - 1)).collect(),
    }
}

// ---------------------------------------------------------------------------
// Reference answers
// ---------------------------------------------------------------------------

/// Solve `A x = b` on a dense row-major copy with partial pivoting.
///
/// Cubic in `n`; meant for systems of a few hundred unknowns at most.
/// Panics when a pivot vanishes.
pub fn dense_solve(matrix: &dyn MatrixView, rhs: &[f64]) -> Vec<f64> {
    let n = matrix.dim();
    assert_eq!(matrix.shape(), (n, n), "reference solve needs a square matrix");
    assert_eq!(rhs.len(), n);

    let mut a = vec![0.0f64; n * n];
    for i in 0..n {
        for (j, v) in matrix.row_entries(i) {
            a[i * n + j] = v;
        }
    }
    let mut x = rhs.to_vec();

    for k in 0..n {
        let p = (k..n)
            .max_by(|&r, &s| a[r * n + k].abs().total_cmp(&a[s * n + k].abs()))
            .unwrap();
        assert!(a[p * n + k].abs() > 1e-15, "vanishing pivot in column {k}");
        if p != k {
            for j in k..n {
                a.swap(k * n + j, p * n + j);
            }
            x.swap(k, p);
        }
        for r in k + 1..n {
            let f = a[r * n + k] / a[k * n + k];
            if f == 0.0 {
                continue;
            }
            for j in k..n {
                a[r * n + j] -= f * a[k * n + j];
            }
            x[r] -= f * x[k];
        }
    }

    for k in (0..n).rev() {
        let tail: f64 = (k + 1..n).map(|j| a[k * n + j] * x[j]).sum();
        x[k] = (x[k] - tail) / a[k * n + k];
    }
    x
}

pub fn inf_distance(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
}

/// `||b - A x||_inf` straight from the CSR arrays.
pub fn residual_inf(matrix: &CsrMatrix<f64>, x: &[f64], rhs: &[f64]) -> f64 {
    matrix
        .row_ptr
        .windows(2)
        .zip(rhs)
        .map(|(span, b)| {
            let ax: f64 = (span[0]..span[1])
                .map(|k| matrix.values[k] * x[matrix.col_indices[k]])
                .sum();
            (b - ax).abs()
        })
        .fold(0.0, f64::max)
}
