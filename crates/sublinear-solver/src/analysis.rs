//! Diagonal-dominance analysis and the Jacobi splitting shared by every
//! estimator.
//!
//! Every solver in this crate works with the splitting
//!
//! ```text
//! A = D (I - M),   M = I - D^{-1} A,   z = D^{-1} b,   x = sum_k M^k z
//! ```
//!
//! [`JacobiSplit`] holds `D` together with the per-row contraction
//! `rho_u = sum_{j != u} |A_uj| / |A_uu|` (the absolute row sum of `M`).
//! Strict row dominance is exactly `rho_max = ||M||_inf < 1`, which gives
//! the bounds the estimators certify against:
//!
//! ```text
//! ||x||_inf <= ||z||_inf / (1 - rho_max)
//! ||(I - M)^{-1}||_inf <= 1 / (1 - rho_max)
//! ```
//!
//! [`DominanceAnalyzer`] produces a [`DominanceReport`] in one O(nnz) pass,
//! plus an optional symmetry check and a power-iteration estimate of the
//! spectral radius of `M`.

use tracing::{debug, instrument};

use crate::error::SolverError;
use crate::matrix::MatrixView;

/// Relative tolerance for the symmetry check.
pub const SYMMETRY_RTOL: f64 = 1e-10;

/// Absolute floor for the symmetry check; subnormal mismatches are ignored.
pub const SYMMETRY_ATOL: f64 = f64::MIN_POSITIVE;

/// Power-iteration steps for the spectral radius estimate.
const POWER_ITERATION_STEPS: usize = 30;

// ---------------------------------------------------------------------------
// JacobiSplit
// ---------------------------------------------------------------------------

/// Diagonal, inverse diagonal, and row contractions of `A`.
#[derive(Debug, Clone)]
pub struct JacobiSplit {
    diag: Vec<f64>,
    row_contraction: Vec<f64>,
    max_contraction: f64,
}

impl JacobiSplit {
    /// Extract the splitting from a square matrix. O(nnz).
    ///
    /// # Errors
    ///
    /// [`SolverError::DegenerateDiagonal`] if any `A_ii` is zero.
    pub fn new(matrix: &dyn MatrixView) -> Result<Self, SolverError> {
        let n = matrix.dim();
        let mut diag = Vec::with_capacity(n);
        let mut row_contraction = Vec::with_capacity(n);
        let mut max_contraction = 0.0f64;

        for i in 0..n {
            let d = matrix.diagonal(i)?;
            if d.abs() < f64::MIN_POSITIVE {
                return Err(SolverError::DegenerateDiagonal { row: i });
            }
            let rho = matrix.row_abs_sum_excluding_diagonal(i) / d.abs();
            max_contraction = max_contraction.max(rho);
            diag.push(d);
            row_contraction.push(rho);
        }

        Ok(Self {
            diag,
            row_contraction,
            max_contraction,
        })
    }

    /// System dimension.
    #[inline]
    pub fn dim(&self) -> usize {
        self.diag.len()
    }

    /// `A_ii`.
    #[inline]
    pub fn diag(&self, i: usize) -> f64 {
        self.diag[i]
    }

    /// `rho_i = sum_{j != i} |M_ij|`.
    #[inline]
    pub fn contraction(&self, i: usize) -> f64 {
        self.row_contraction[i]
    }

    /// `rho_max = ||M||_inf`.
    #[inline]
    pub fn max_contraction(&self) -> f64 {
        self.max_contraction
    }

    /// `1 - rho_max`, the row dominance ratio.
    #[inline]
    pub fn dominance_ratio(&self) -> f64 {
        1.0 - self.max_contraction
    }

    /// Off-diagonal entries of row `u` of `M`: `(j, -A_uj / A_uu)`.
    #[inline]
    pub fn m_row<'a>(
        &'a self,
        matrix: &'a dyn MatrixView,
        u: usize,
    ) -> impl Iterator<Item = (usize, f64)> + Clone + 'a {
        let d = self.diag[u];
        matrix
            .row_entries(u)
            .filter(move |&(j, _)| j != u)
            .map(move |(j, a)| (j, -a / d))
    }

    /// `z = D^{-1} b`.
    pub fn scaled_rhs(&self, b: &[f64]) -> Vec<f64> {
        b.iter().zip(&self.diag).map(|(bi, di)| bi / di).collect()
    }

    /// `1 / (1 - rho_max)`, an upper bound on `||(I - M)^{-1}||_inf`.
    ///
    /// Infinite when the matrix is not strictly row dominant.
    pub fn inverse_bound(&self) -> f64 {
        let margin = self.dominance_ratio();
        if margin > 0.0 {
            1.0 / margin
        } else {
            f64::INFINITY
        }
    }

    /// Fail unless `rho_max < 1`.
    ///
    /// # Errors
    ///
    /// [`SolverError::NonDominantMatrix`] carrying the dominance ratio.
    pub fn require_contraction(&self) -> Result<(), SolverError> {
        if self.max_contraction < 1.0 {
            Ok(())
        } else {
            Err(SolverError::NonDominantMatrix {
                ratio: self.dominance_ratio(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// DominanceReport
// ---------------------------------------------------------------------------

/// Structural and numerical properties of a matrix.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DominanceReport {
    /// Dimension.
    pub n: usize,
    /// Non-zero entries.
    pub nnz: usize,
    /// `dominance_ratio > 0` (strict row dominance).
    pub is_dominant: bool,
    /// `dominance_ratio >= 0`.
    pub is_weakly_dominant: bool,
    /// `min_i (|A_ii| - sum_{j != i} |A_ij|) / |A_ii|`.
    pub dominance_ratio: f64,
    /// The same ratio computed over columns.
    pub column_dominance_ratio: f64,
    /// `||M||_inf = 1 - dominance_ratio`.
    pub max_row_contraction: f64,
    /// `A_ij == A_ji` within [`SYMMETRY_RTOL`]. `false` when not checked.
    pub is_symmetric: bool,
    /// Whether the symmetry check ran.
    pub symmetry_checked: bool,
    /// Fraction of zero entries, `1 - nnz / n^2`.
    pub sparsity: f64,
    /// `1 / dominance_ratio` (a proxy, not a true condition number).
    pub condition_estimate: Option<f64>,
    /// Power-iteration estimate of the spectral radius of `M`.
    pub spectral_radius_estimate: Option<f64>,
}

impl DominanceReport {
    /// Strictly dominant by columns.
    pub fn is_column_dominant(&self) -> bool {
        self.column_dominance_ratio > 0.0
    }
}

// ---------------------------------------------------------------------------
// DominanceAnalyzer
// ---------------------------------------------------------------------------

/// Computes [`DominanceReport`]s. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct DominanceAnalyzer;

impl DominanceAnalyzer {
    /// Analyse `matrix`.
    ///
    /// The dominance pass is O(nnz). `check_symmetry` adds one lookup per
    /// stored entry; `estimate_condition` adds the condition proxy and a
    /// power-iteration estimate of `rho(M)`.
    ///
    /// # Errors
    ///
    /// - [`SolverError::ShapeMismatch`] if `matrix` is not square.
    /// - [`SolverError::DegenerateDiagonal`] if any `A_ii` is zero.
    #[instrument(skip(matrix), fields(n = matrix.dim(), nnz = matrix.nnz()))]
    pub fn analyze(
        matrix: &dyn MatrixView,
        check_symmetry: bool,
        estimate_condition: bool,
    ) -> Result<DominanceReport, SolverError> {
        let (rows, cols) = matrix.shape();
        if rows != cols {
            return Err(SolverError::ShapeMismatch(format!(
                "matrix must be square: got {rows}x{cols}"
            )));
        }
        let n = rows;
        let split = JacobiSplit::new(matrix)?;

        let mut nnz = 0usize;
        let mut column_off = vec![0.0f64; n];
        let mut symmetric = true;

        for i in 0..n {
            for (j, v) in matrix.row_entries(i) {
                nnz += 1;
                if j == i {
                    continue;
                }
                column_off[j] += v.abs();
                if check_symmetry && symmetric {
                    let w = matrix.get(j, i);
                    let tol = (SYMMETRY_RTOL * v.abs().max(w.abs())).max(SYMMETRY_ATOL);
                    if (v - w).abs() > tol {
                        symmetric = false;
                    }
                }
            }
        }

        let dominance_ratio = if n == 0 { 1.0 } else { split.dominance_ratio() };
        let column_dominance_ratio = (0..n)
            .map(|j| {
                let d = split.diag(j).abs();
                (d - column_off[j]) / d
            })
            .fold(1.0, f64::min);

        let total = (n as f64) * (n as f64);
        let sparsity = if total > 0.0 { 1.0 - nnz as f64 / total } else { 1.0 };

        let (condition_estimate, spectral_radius_estimate) = if estimate_condition {
            let condition = if dominance_ratio > 0.0 {
                1.0 / dominance_ratio
            } else {
                f64::INFINITY
            };
            (
                Some(condition),
                Some(estimate_spectral_radius(matrix, &split)),
            )
        } else {
            (None, None)
        };

        let report = DominanceReport {
            n,
            nnz,
            is_dominant: dominance_ratio > 0.0,
            is_weakly_dominant: dominance_ratio >= 0.0,
            dominance_ratio,
            column_dominance_ratio,
            max_row_contraction: 1.0 - dominance_ratio,
            is_symmetric: check_symmetry && symmetric,
            symmetry_checked: check_symmetry,
            sparsity,
            condition_estimate,
            spectral_radius_estimate,
        };
        debug!(
            dominance_ratio = report.dominance_ratio,
            column_ratio = report.column_dominance_ratio,
            is_symmetric = report.is_symmetric,
            "dominance analysis complete",
        );
        Ok(report)
    }
}

/// Estimate `rho(M)` for `M = I - D^{-1}A` by power iteration.
///
/// Uses the growth ratio `||M v|| / ||v||` of a deterministic start vector,
/// which also behaves for non-symmetric `M` with a complex or `+/-` pair of
/// dominant eigenvalues.
pub fn estimate_spectral_radius(matrix: &dyn MatrixView, split: &JacobiSplit) -> f64 {
    let n = split.dim();
    if n == 0 {
        return 0.0;
    }

    let mut v: Vec<f64> = (0..n)
        .map(|i| 1.0 + ((i.wrapping_mul(7).wrapping_add(13)) % 100) as f64 / 100.0)
        .collect();
    normalize(&mut v);
    let mut w = vec![0.0f64; n];
    let mut estimate = 0.0f64;

    for _ in 0..POWER_ITERATION_STEPS {
        for (u, wu) in w.iter_mut().enumerate() {
            *wu = split.m_row(matrix, u).map(|(j, m)| m * v[j]).sum();
        }
        let norm = l2_norm(&w);
        estimate = norm;
        if norm < 1e-300 {
            break;
        }
        for (vi, wi) in v.iter_mut().zip(&w) {
            *vi = wi / norm;
        }
    }

    debug!(rho = estimate, "estimated spectral radius of (I - D^-1 A)");
    estimate
}

#[inline]
fn l2_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

#[inline]
fn normalize(v: &mut [f64]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
