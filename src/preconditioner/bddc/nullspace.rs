//! Null spaces of the fine and coarse operators.

use crate::matrix::{MatIs, SparseMatrix};
use crate::preconditioner::bddc::constraints::LocalConstraints;

/// Relative norm under which a vector is considered dependent on the previous ones.
const DEPENDENCE_TOL: f64 = 1e-10;

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Orthonormal basis of `vectors` (modified Gram-Schmidt), dependent vectors dropped.
pub fn orthonormalize(vectors: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(vectors.len());
    for v in vectors {
        let mut w = v.clone();
        let norm0 = dot(&w, &w).sqrt();
        if norm0 == 0.0 {
            continue;
        }
        for q in &basis {
            let h = dot(q, &w);
            w.iter_mut().zip(q).for_each(|(wi, qi)| *wi -= h * qi);
        }
        let norm = dot(&w, &w).sqrt();
        if norm > DEPENDENCE_TOL * norm0 {
            w.iter_mut().for_each(|x| *x /= norm);
            basis.push(w);
        }
    }
    basis
}

/// `x -= Q Q^T x` for an orthonormal `basis`.
pub fn project_out(basis: &[Vec<f64>], x: &mut [f64]) {
    for q in basis {
        let h = dot(q, x);
        x.iter_mut().zip(q).for_each(|(xi, qi)| *xi -= h * qi);
    }
}

/// Primal functionals evaluated on the fine null vectors, orthonormalized.
pub fn coarse_null_space(
    constraints: &[LocalConstraints],
    is: &MatIs,
    primal_global: &[Vec<usize>],
    n_coarse: usize,
    vectors: &[Vec<f64>],
) -> Vec<Vec<f64>> {
    let coarse: Vec<Vec<f64>> = vectors
        .iter()
        .map(|v| {
            let mut out = vec![0.0; n_coarse];
            for ((lc, piece), globals) in constraints.iter().zip(is.pieces()).zip(primal_global) {
                let local: Vec<f64> = piece.l2g.iter().map(|&g| v[g]).collect();
                let mut values = vec![0.0; lc.n_primal()];
                lc.constraint_matrix.spmv(&local, &mut values);
                for (&g, val) in globals.iter().zip(values) {
                    out[g] = val;
                }
            }
            out
        })
        .collect();
    orthonormalize(&coarse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn dependent_vectors_are_dropped() {
        let basis = orthonormalize(&[vec![1.0, 1.0, 0.0], vec![2.0, 2.0, 0.0], vec![1.0, 0.0, 0.0]]);
        assert_eq!(basis.len(), 2);
        assert_abs_diff_eq!(dot(&basis[0], &basis[1]), 0.0, epsilon = 1e-15);
        let mut x = vec![3.0, 1.0, 5.0];
        project_out(&basis, &mut x);
        assert_abs_diff_eq!(x[0], 0.0, epsilon = 1e-14);
        assert_abs_diff_eq!(x[2], 5.0, epsilon = 1e-14);
    }
}
