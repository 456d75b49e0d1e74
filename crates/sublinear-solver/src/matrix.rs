//! Read-only matrix abstraction shared by every estimator.
//!
//! [`MatrixView`] is the only thing solvers see of `A`. It exposes lazy row
//! iteration so that walk and push estimators touch only the rows they visit;
//! nothing here materialises a full copy of the matrix.
//!
//! Two storage formats implement it:
//!
//! | Type | Layout | `row_entries` cost |
//! |------|--------|--------------------|
//! | [`DenseMatrix`] | row-major `Vec<f64>` | O(n), exact zeros skipped |
//! | [`CsrMatrix<f64>`] | compressed sparse row | O(nnz in row) |
//!
//! [`Matrix`] owns either one and is what the JSON interface builds.

use crate::error::SolverError;
use crate::types::CsrMatrix;

// ---------------------------------------------------------------------------
// MatrixView
// ---------------------------------------------------------------------------

/// Read-only access to a square (or rectangular) real matrix.
///
/// Implementations must be cheap to share across threads; the random-walk
/// estimator reads rows concurrently from a rayon pool.
pub trait MatrixView: Send + Sync {
    /// `(rows, cols)`.
    fn shape(&self) -> (usize, usize);

    /// Number of rows.
    #[inline]
    fn dim(&self) -> usize {
        self.shape().0
    }

    /// Number of non-zero entries.
    fn nnz(&self) -> usize;

    /// Entry `A[row][col]`; zero for absent or out-of-range positions.
    fn get(&self, row: usize, col: usize) -> f64;

    /// Lazy iterator over the non-zero `(col, value)` pairs of `row`.
    ///
    /// Out-of-range rows yield nothing. The iterator is `Clone`, so it can
    /// be restarted cheaply.
    fn row_entries(&self, row: usize) -> RowEntries<'_>;

    /// Diagonal entry `A[i][i]`.
    ///
    /// # Errors
    ///
    /// [`SolverError::IndexOutOfRange`] if `i` is not a valid diagonal index.
    fn diagonal(&self, i: usize) -> Result<f64, SolverError> {
        let (rows, cols) = self.shape();
        let dim = rows.min(cols);
        if i >= dim {
            return Err(SolverError::IndexOutOfRange { index: i, dim });
        }
        Ok(self.get(i, i))
    }

    /// `sum_{j != row} |A[row][j]|`.
    fn row_abs_sum_excluding_diagonal(&self, row: usize) -> f64 {
        self.row_entries(row)
            .filter(|&(col, _)| col != row)
            .map(|(_, v)| v.abs())
            .sum()
    }

    /// Number of off-diagonal non-zeros in `row`.
    fn row_degree(&self, row: usize) -> usize {
        self.row_entries(row).filter(|&(col, _)| col != row).count()
    }

    /// `y = A * x`.
    fn spmv(&self, x: &[f64], y: &mut [f64]) {
        let (rows, cols) = self.shape();
        debug_assert!(x.len() >= cols && y.len() >= rows);
        for (i, yi) in y.iter_mut().enumerate().take(rows) {
            *yi = self.row_entries(i).map(|(j, v)| v * x[j]).sum();
        }
    }

    /// `||b - A x||_inf`.
    fn residual_inf_norm(&self, x: &[f64], b: &[f64]) -> f64 {
        let rows = self.shape().0;
        (0..rows)
            .map(|i| {
                let ax: f64 = self.row_entries(i).map(|(j, v)| v * x[j]).sum();
                (b[i] - ax).abs()
            })
            .fold(0.0, f64::max)
    }

    /// Copy into CSR form.
    fn to_csr(&self) -> CsrMatrix<f64> {
        let (rows, cols) = self.shape();
        let mut row_ptr = Vec::with_capacity(rows + 1);
        let mut col_indices = Vec::with_capacity(self.nnz());
        let mut values = Vec::with_capacity(self.nnz());
        row_ptr.push(0);
        for i in 0..rows {
            for (j, v) in self.row_entries(i) {
                col_indices.push(j);
                values.push(v);
            }
            row_ptr.push(values.len());
        }
        CsrMatrix {
            row_ptr,
            col_indices,
            values,
            rows,
            cols,
        }
    }
}

// ---------------------------------------------------------------------------
// RowEntries
// ---------------------------------------------------------------------------

/// Iterator over the non-zero entries of one row.
#[derive(Debug, Clone)]
pub enum RowEntries<'a> {
    /// A slice of a dense row; exact zeros are skipped.
    Dense {
        /// Remaining values of the row.
        values: &'a [f64],
        /// Column index of `values[0]`.
        col: usize,
    },
    /// A CSR row segment.
    Sparse {
        /// Column indices of the segment.
        cols: std::slice::Iter<'a, usize>,
        /// Values of the segment.
        values: std::slice::Iter<'a, f64>,
    },
    /// No entries (out-of-range row).
    Empty,
}

impl<'a> Iterator for RowEntries<'a> {
    type Item = (usize, f64);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        match self {
            RowEntries::Dense { values, col } => {
                let mut slice: &'a [f64] = *values;
                let mut c = *col;
                let mut found = None;
                while let Some((&v, rest)) = slice.split_first() {
                    slice = rest;
                    c += 1;
                    if v != 0.0 {
                        found = Some((c - 1, v));
                        break;
                    }
                }
                *values = slice;
                *col = c;
                found
            }
            RowEntries::Sparse { cols, values } => loop {
                let c = *cols.next()?;
                let v = *values.next()?;
                if v != 0.0 {
                    return Some((c, v));
                }
            },
            RowEntries::Empty => None,
        }
    }
}

// ---------------------------------------------------------------------------
// DenseMatrix
// ---------------------------------------------------------------------------

/// Row-major dense matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl DenseMatrix {
    /// Wrap a row-major buffer.
    ///
    /// # Errors
    ///
    /// [`SolverError::ShapeMismatch`] if `data.len() != rows * cols`.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, SolverError> {
        let expected = rows.checked_mul(cols).ok_or_else(|| {
            SolverError::ShapeMismatch(format!("{rows}x{cols} overflows usize"))
        })?;
        if data.len() != expected {
            return Err(SolverError::ShapeMismatch(format!(
                "dense data has {} values, expected {rows}x{cols} = {expected}",
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from nested rows.
    ///
    /// # Errors
    ///
    /// [`SolverError::ShapeMismatch`] if the rows are ragged.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, SolverError> {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(n_rows * n_cols);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != n_cols {
                return Err(SolverError::ShapeMismatch(format!(
                    "row {i} has {} columns, expected {n_cols}",
                    row.len()
                )));
            }
            data.extend(row);
        }
        Ok(Self {
            rows: n_rows,
            cols: n_cols,
            data,
        })
    }

    /// `n x n` identity.
    pub fn identity(n: usize) -> Self {
        let mut data = vec![0.0; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0;
        }
        Self {
            rows: n,
            cols: n,
            data,
        }
    }

    /// Row `i` as a slice.
    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Underlying row-major buffer.
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

impl MatrixView for DenseMatrix {
    #[inline]
    fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn nnz(&self) -> usize {
        self.data.iter().filter(|v| **v != 0.0).count()
    }

    #[inline]
    fn get(&self, row: usize, col: usize) -> f64 {
        if row < self.rows && col < self.cols {
            self.data[row * self.cols + col]
        } else {
            0.0
        }
    }

    #[inline]
    fn row_entries(&self, row: usize) -> RowEntries<'_> {
        if row >= self.rows {
            return RowEntries::Empty;
        }
        RowEntries::Dense {
            values: self.row(row),
            col: 0,
        }
    }
}

impl MatrixView for CsrMatrix<f64> {
    #[inline]
    fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn nnz(&self) -> usize {
        self.values.iter().filter(|v| **v != 0.0).count()
    }

    #[inline]
    fn get(&self, row: usize, col: usize) -> f64 {
        CsrMatrix::get(self, row, col)
    }

    #[inline]
    fn row_entries(&self, row: usize) -> RowEntries<'_> {
        if row >= self.rows {
            return RowEntries::Empty;
        }
        let start = self.row_ptr[row];
        let end = self.row_ptr[row + 1];
        RowEntries::Sparse {
            cols: self.col_indices[start..end].iter(),
            values: self.values[start..end].iter(),
        }
    }

    fn to_csr(&self) -> CsrMatrix<f64> {
        self.clone()
    }
}

// ---------------------------------------------------------------------------
// Matrix (owning)
// ---------------------------------------------------------------------------

/// An owned matrix in either storage format.
#[derive(Debug, Clone, PartialEq)]
pub enum Matrix {
    /// Row-major dense storage.
    Dense(DenseMatrix),
    /// Compressed sparse row storage.
    Sparse(CsrMatrix<f64>),
}

impl Matrix {
    /// Dense matrix from nested rows.
    ///
    /// # Errors
    ///
    /// See [`DenseMatrix::from_rows`].
    pub fn dense(rows: Vec<Vec<f64>>) -> Result<Self, SolverError> {
        DenseMatrix::from_rows(rows).map(Matrix::Dense)
    }

    /// Sparse matrix from `(row, col, value)` triplets.
    ///
    /// # Errors
    ///
    /// See [`CsrMatrix::from_coo`].
    pub fn coo(
        rows: usize,
        cols: usize,
        entries: impl IntoIterator<Item = (usize, usize, f64)>,
    ) -> Result<Self, SolverError> {
        CsrMatrix::from_coo(rows, cols, entries).map(Matrix::Sparse)
    }

    /// Short storage label, `"dense"` or `"csr"`.
    pub fn format_name(&self) -> &'static str {
        match self {
            Matrix::Dense(_) => "dense",
            Matrix::Sparse(_) => "csr",
        }
    }

    fn view(&self) -> &dyn MatrixView {
        match self {
            Matrix::Dense(m) => m,
            Matrix::Sparse(m) => m,
        }
    }
}

impl MatrixView for Matrix {
    #[inline]
    fn shape(&self) -> (usize, usize) {
        self.view().shape()
    }

    fn nnz(&self) -> usize {
        self.view().nnz()
    }

    #[inline]
    fn get(&self, row: usize, col: usize) -> f64 {
        self.view().get(row, col)
    }

    #[inline]
    fn row_entries(&self, row: usize) -> RowEntries<'_> {
        self.view().row_entries(row)
    }

    fn to_csr(&self) -> CsrMatrix<f64> {
        self.view().to_csr()
    }
}

impl From<DenseMatrix> for Matrix {
    fn from(m: DenseMatrix) -> Self {
        Matrix::Dense(m)
    }
}

impl From<CsrMatrix<f64>> for Matrix {
    fn from(m: CsrMatrix<f64>) -> Self {
        Matrix::Sparse(m)
    }
}
