//! Dense kernels on top of Faer.
//!
//! The preconditioner only ever factorizes or decomposes small dense blocks
//! (subdomain blocks, constraint blocks, coarse contributions). Every call into
//! Faer's decompositions goes through this module so the rest of the crate
//! works with plain `Mat<f64>` / `Vec<f64>` values.

use faer::linalg::solvers::Qr;
use faer::{Mat, Side};

use crate::error::BddcError;

/// Construct from raw column-major storage.
pub fn from_column_major(nrows: usize, ncols: usize, data: &[f64]) -> Mat<f64> {
    Mat::from_fn(nrows, ncols, |i, j| data[j * nrows + i])
}

/// Flatten into column-major storage.
pub fn to_column_major(a: &Mat<f64>) -> Vec<f64> {
    let mut out = Vec::with_capacity(a.nrows() * a.ncols());
    for j in 0..a.ncols() {
        for i in 0..a.nrows() {
            out.push(a[(i, j)]);
        }
    }
    out
}

/// Copy out `a[rows, cols]`.
pub fn gather(a: &Mat<f64>, rows: &[usize], cols: &[usize]) -> Mat<f64> {
    Mat::from_fn(rows.len(), cols.len(), |i, j| a[(rows[i], cols[j])])
}

pub fn transpose(a: &Mat<f64>) -> Mat<f64> {
    a.transpose().to_owned()
}

/// Infinity norm (maximum absolute row sum).
pub fn inf_norm(a: &Mat<f64>) -> f64 {
    (0..a.nrows())
        .map(|i| (0..a.ncols()).map(|j| a[(i, j)].abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

/// Whether `a` is symmetric up to `tol` relative to its largest entry.
pub fn is_symmetric(a: &Mat<f64>, tol: f64) -> bool {
    if a.nrows() != a.ncols() {
        return false;
    }
    let n = a.nrows();
    let scale = (0..n)
        .flat_map(|i| (0..n).map(move |j| (i, j)))
        .map(|(i, j)| a[(i, j)].abs())
        .fold(0.0, f64::max);
    if scale == 0.0 {
        return true;
    }
    for i in 0..n {
        for j in (i + 1)..n {
            if (a[(i, j)] - a[(j, i)]).abs() > tol * scale {
                return false;
            }
        }
    }
    true
}

/// Symmetric eigendecomposition, eigenvalues in ascending order with matching columns.
pub fn sym_eigen(a: &Mat<f64>) -> Result<(Vec<f64>, Mat<f64>), BddcError> {
    let n = a.nrows();
    if n == 0 {
        return Ok((Vec::new(), Mat::zeros(0, 0)));
    }
    let evd = a
        .self_adjoint_eigen(Side::Lower)
        .map_err(|e| BddcError::FactorError(format!("eigendecomposition failed: {e:?}")))?;
    let values: Vec<f64> = evd.S().column_vector().iter().copied().collect();
    let u = evd.U();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));
    let sorted = order.iter().map(|&k| values[k]).collect();
    let vectors = Mat::from_fn(n, n, |i, j| u[(i, order[j])]);
    Ok((sorted, vectors))
}

/// Singular values (descending) and the full left singular basis.
pub fn svd_left(a: &Mat<f64>) -> Result<(Vec<f64>, Mat<f64>), BddcError> {
    let (m, n) = (a.nrows(), a.ncols());
    if m == 0 || n == 0 {
        return Ok((Vec::new(), Mat::identity(m, m)));
    }
    let svd = a
        .svd()
        .map_err(|e| BddcError::FactorError(format!("svd failed: {e:?}")))?;
    let values: Vec<f64> = svd.S().column_vector().iter().copied().collect();
    let u = svd.U();
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| values[j].total_cmp(&values[i]));
    let sorted = order.iter().map(|&k| values[k]).collect();
    // leading columns follow the sorted singular values, the rest keep their order
    let mut cols = order.clone();
    cols.extend(values.len()..m);
    let left = Mat::from_fn(m, m, |i, j| u[(i, cols[j])]);
    Ok((sorted, left))
}

/// Full orthogonal factor `Q` (m x m) of the QR factorization of `a`.
pub fn qr_full_q(a: &Mat<f64>) -> Mat<f64> {
    if a.nrows() == 0 {
        return Mat::zeros(0, 0);
    }
    Qr::new(a.as_ref()).compute_Q()
}

/// `R^{-T}` for a square upper-triangular `R`, by forward substitution on `R^T`.
pub fn upper_inverse_transpose(r: &Mat<f64>) -> Result<Mat<f64>, BddcError> {
    let p = r.nrows();
    let mut y = Mat::<f64>::zeros(p, p);
    for col in 0..p {
        for i in 0..p {
            let mut s = if i == col { 1.0 } else { 0.0 };
            for k in 0..i {
                s -= r[(k, i)] * y[(k, col)];
            }
            let d = r[(i, i)];
            if d.abs() < f64::EPSILON * 16.0 {
                return Err(BddcError::ZeroPivot(i));
            }
            y[(i, col)] = s / d;
        }
    }
    Ok(y)
}

/// Largest absolute entry-wise difference.
pub fn max_abs_diff(a: &Mat<f64>, b: &Mat<f64>) -> f64 {
    assert_eq!((a.nrows(), a.ncols()), (b.nrows(), b.ncols()));
    let mut out = 0.0f64;
    for j in 0..a.ncols() {
        for i in 0..a.nrows() {
            out = out.max((a[(i, j)] - b[(i, j)]).abs());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn column_major_roundtrip_keeps_layout() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let a = from_column_major(2, 3, &data);
        assert_eq!(a[(1, 0)], 2.0);
        assert_eq!(a[(0, 2)], 5.0);
        assert_eq!(to_column_major(&a), data);
    }

    #[test]
    fn qr_gives_orthogonal_q_and_triangular_r() {
        let a = Mat::from_fn(4, 2, |i, j| (i + 2 * j) as f64 + if i == j { 1.0 } else { 0.0 });
        let q = qr_full_q(&a);
        let qtq = &transpose(&q) * &q;
        assert!(max_abs_diff(&qtq, &Mat::identity(4, 4)) < 1e-12);
        let r = &transpose(&q) * &a;
        for i in 1..4 {
            for j in 0..i.min(2) {
                assert_abs_diff_eq!(r[(i, j)], 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn eigen_and_svd_are_sorted() {
        let a = Mat::from_fn(3, 3, |i, j| if i == j { (3 - i) as f64 } else { 0.0 });
        let (ev, _) = sym_eigen(&a).unwrap();
        assert_abs_diff_eq!(ev[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ev[2], 3.0, epsilon = 1e-12);
        let (sv, u) = svd_left(&a).unwrap();
        assert_abs_diff_eq!(sv[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(u[(0, 0)].abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn triangular_inverse_transpose() {
        let r = Mat::from_fn(2, 2, |i, j| match (i, j) {
            (0, 0) => 2.0,
            (0, 1) => 1.0,
            (1, 1) => 4.0,
            _ => 0.0,
        });
        let y = upper_inverse_transpose(&r).unwrap();
        let prod = &transpose(&r) * &y;
        assert!(max_abs_diff(&prod, &Mat::identity(2, 2)) < 1e-14);
    }
}
