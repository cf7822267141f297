// SparseMatrix trait and the CSR storage used for subdomain and coarse matrices

use faer::Mat;

use crate::core::traits::{Indexing, MatTransVec, MatVec};
use crate::error::BddcError;

/// A read‐only sparse matrix supporting y = A * x.
pub trait SparseMatrix<T> {
    /// Number of rows.
    fn nrows(&self) -> usize;
    /// Number of columns.
    fn ncols(&self) -> usize;
    /// Compute y = A * x.  `x.len() == ncols()`, `y.len() == nrows()`.
    fn spmv(&self, x: &[T], y: &mut [T]);
}

/// Compressed sparse row matrix with sorted, unique column indices per row.
#[derive(Clone, Debug, PartialEq)]
pub struct CsrMatrix {
    nrows: usize,
    ncols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Build a CSR from raw row‐ptr, col‐idx, and values.
    ///
    /// Column indices must be strictly increasing inside each row.
    pub fn from_csr(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, BddcError> {
        if row_ptr.len() != nrows + 1 {
            return Err(BddcError::SizeMismatch {
                what: "row_ptr length",
                expected: nrows + 1,
                got: row_ptr.len(),
            });
        }
        if col_idx.len() != values.len() || row_ptr[nrows] != col_idx.len() {
            return Err(BddcError::SizeMismatch {
                what: "nonzero count",
                expected: row_ptr[nrows],
                got: col_idx.len(),
            });
        }
        for i in 0..nrows {
            if row_ptr[i] > row_ptr[i + 1] {
                return Err(BddcError::Inconsistent(format!("row_ptr decreases at row {i}")));
            }
            let cols = &col_idx[row_ptr[i]..row_ptr[i + 1]];
            for (k, &c) in cols.iter().enumerate() {
                if c >= ncols {
                    return Err(BddcError::OutOfRange { what: "column", value: c, lo: 0, hi: ncols });
                }
                if k > 0 && cols[k - 1] >= c {
                    return Err(BddcError::Inconsistent(format!("unsorted columns in row {i}")));
                }
            }
        }
        Ok(Self { nrows, ncols, row_ptr, col_idx, values })
    }

    /// Build from `(row, col, value)` triplets; duplicates are summed.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> Result<Self, BddcError> {
        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); nrows];
        for &(i, j, v) in triplets {
            if i >= nrows {
                return Err(BddcError::OutOfRange { what: "row", value: i, lo: 0, hi: nrows });
            }
            if j >= ncols {
                return Err(BddcError::OutOfRange { what: "column", value: j, lo: 0, hi: ncols });
            }
            rows[i].push((j, v));
        }
        Ok(Self::from_rows(nrows, ncols, rows))
    }

    fn from_rows(nrows: usize, ncols: usize, rows: Vec<Vec<(usize, f64)>>) -> Self {
        let mut row_ptr = Vec::with_capacity(nrows + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);
        for mut row in rows {
            row.sort_by_key(|&(j, _)| j);
            for (j, v) in row {
                if col_idx.len() > *row_ptr.last().unwrap_or(&0) && col_idx.last() == Some(&j) {
                    if let Some(last) = values.last_mut() {
                        *last += v;
                    }
                } else {
                    col_idx.push(j);
                    values.push(v);
                }
            }
            row_ptr.push(col_idx.len());
        }
        Self { nrows, ncols, row_ptr, col_idx, values }
    }

    /// Sparse copy of a dense matrix, dropping exact zeros.
    pub fn from_dense(a: &Mat<f64>) -> Self {
        let rows = (0..a.nrows())
            .map(|i| {
                (0..a.ncols())
                    .filter(|&j| a[(i, j)] != 0.0)
                    .map(|j| (j, a[(i, j)]))
                    .collect()
            })
            .collect();
        Self::from_rows(a.nrows(), a.ncols(), rows)
    }

    pub fn identity(n: usize) -> Self {
        Self {
            nrows: n,
            ncols: n,
            row_ptr: (0..=n).collect(),
            col_idx: (0..n).collect(),
            values: vec![1.0; n],
        }
    }

    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self { nrows, ncols, row_ptr: vec![0; nrows + 1], col_idx: Vec::new(), values: Vec::new() }
    }

    pub fn to_dense(&self) -> Mat<f64> {
        let mut out = Mat::<f64>::zeros(self.nrows, self.ncols);
        for i in 0..self.nrows {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                out[(i, j)] = v;
            }
        }
        out
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        (&self.col_idx[range.clone()], &self.values[range])
    }

    /// Entry `(i, j)`, zero when not stored.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (cols, vals) = self.row(i);
        match cols.binary_search(&j) {
            Ok(k) => vals[k],
            Err(_) => 0.0,
        }
    }

    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.nrows.min(self.ncols)).map(|i| self.get(i, i)).collect()
    }

    /// Compute y = A^T * x.
    pub fn spmv_transpose(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.nrows);
        assert_eq!(y.len(), self.ncols);
        y.iter_mut().for_each(|v| *v = 0.0);
        for i in 0..self.nrows {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                y[j] += v * x[i];
            }
        }
    }

    /// Dense copy of the block `A[rows, cols]`.
    pub fn extract_dense(&self, rows: &[usize], cols: &[usize]) -> Mat<f64> {
        let mut pos = vec![usize::MAX; self.ncols];
        for (k, &c) in cols.iter().enumerate() {
            pos[c] = k;
        }
        let mut out = Mat::<f64>::zeros(rows.len(), cols.len());
        for (r, &i) in rows.iter().enumerate() {
            let (cs, vs) = self.row(i);
            for (&j, &v) in cs.iter().zip(vs) {
                if pos[j] != usize::MAX {
                    out[(r, pos[j])] = v;
                }
            }
        }
        out
    }

    /// Sparse block `A[rows, cols]`, columns renumbered by their position in `cols`.
    pub fn extract(&self, rows: &[usize], cols: &[usize]) -> Self {
        let mut pos = vec![usize::MAX; self.ncols];
        for (k, &c) in cols.iter().enumerate() {
            pos[c] = k;
        }
        let out_rows = rows
            .iter()
            .map(|&i| {
                let (cs, vs) = self.row(i);
                cs.iter()
                    .zip(vs)
                    .filter(|(j, _)| pos[**j] != usize::MAX)
                    .map(|(&j, &v)| (pos[j], v))
                    .collect()
            })
            .collect();
        Self::from_rows(rows.len(), cols.len(), out_rows)
    }

    pub fn transpose(&self) -> Self {
        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); self.ncols];
        for i in 0..self.nrows {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                rows[j].push((i, v));
            }
        }
        Self::from_rows(self.ncols, self.nrows, rows)
    }

    /// Whether `|a_ij - a_ji| <= tol * max|a|` for all stored entries.
    pub fn is_symmetric(&self, tol: f64) -> bool {
        if self.nrows != self.ncols {
            return false;
        }
        let scale = self.values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        if scale == 0.0 {
            return true;
        }
        (0..self.nrows).all(|i| {
            let (cols, vals) = self.row(i);
            cols.iter()
                .zip(vals)
                .all(|(&j, &v)| (v - self.get(j, i)).abs() <= tol * scale)
        })
    }

    /// Column adjacency of row `i`, excluding the diagonal.
    pub fn neighbors(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        self.row(i).0.iter().copied().filter(move |&j| j != i)
    }
}

impl SparseMatrix<f64> for CsrMatrix {
    fn nrows(&self) -> usize {
        self.nrows
    }
    fn ncols(&self) -> usize {
        self.ncols
    }
    fn spmv(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.ncols);
        assert_eq!(y.len(), self.nrows);
        for (i, yi) in y.iter_mut().enumerate() {
            let (cols, vals) = self.row(i);
            *yi = cols.iter().zip(vals).map(|(&j, &v)| v * x[j]).sum();
        }
    }
}

impl MatVec<Vec<f64>> for CsrMatrix {
    fn matvec(&self, x: &Vec<f64>, y: &mut Vec<f64>) {
        self.spmv(x, y);
    }
}

impl MatTransVec<Vec<f64>> for CsrMatrix {
    fn mattransvec(&self, x: &Vec<f64>, y: &mut Vec<f64>) {
        self.spmv_transpose(x, y);
    }
}

impl Indexing for CsrMatrix {
    fn nrows(&self) -> usize {
        self.nrows
    }
}
