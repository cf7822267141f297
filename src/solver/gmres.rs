//! Restarted GMRES with right preconditioning (Saad §9.3.2).
//!
//! Used for nonsymmetric problems, where BDDC builds separate `phi`/`psi`
//! bases. Right preconditioning keeps the monitored residual the true one.
//!
//! # Features
//! - Double (iterative) Gram-Schmidt orthogonalization
//! - Happy breakdown detection for early termination
//! - Givens rotations for the least-squares update
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM. §6.4, §9.3

use crate::core::traits::{InnerProduct, MatVec};
use crate::error::BddcError;
use crate::preconditioner::Preconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::{Convergence, SolveStats};
use num_traits::Float;

/// GMRES solver struct with restart.
pub struct GmresSolver<T> {
    /// Number of Arnoldi vectors before restart
    pub restart: usize,
    /// Convergence criteria (tolerance and max iterations)
    pub conv: Convergence<T>,
}

impl<T: Copy + Float> GmresSolver<T> {
    /// Create a new GMRES solver with restart, tolerance, and max iterations.
    pub fn new(restart: usize, tol: T, max_iters: usize) -> Self {
        Self { restart: restart.max(1), conv: Convergence { tol, max_iters } }
    }

    /// Apply Givens rotations to column `j` of the Hessenberg matrix and update g.
    fn apply_givens_and_update_g(h: &mut [Vec<T>], g: &mut [T], cs: &mut [T], sn: &mut [T], j: usize) {
        for i in 0..j {
            let temp = cs[i] * h[i][j] + sn[i] * h[i + 1][j];
            h[i + 1][j] = -sn[i] * h[i][j] + cs[i] * h[i + 1][j];
            h[i][j] = temp;
        }
        let h_kk = h[j][j];
        let h_k1k = h[j + 1][j];
        let r = (h_kk * h_kk + h_k1k * h_k1k).sqrt();
        if r == T::zero() {
            cs[j] = T::one();
            sn[j] = T::zero();
        } else {
            cs[j] = h_kk / r;
            sn[j] = h_k1k / r;
        }
        h[j][j] = cs[j] * h_kk + sn[j] * h_k1k;
        h[j + 1][j] = T::zero();
        let temp = cs[j] * g[j] + sn[j] * g[j + 1];
        g[j + 1] = -sn[j] * g[j] + cs[j] * g[j + 1];
        g[j] = temp;
    }

    /// Solve the upper-triangular system Hy = g, zeroing components at zero pivots.
    fn back_substitution(h: &[Vec<T>], g: &[T], m: usize) -> Vec<T> {
        let mut y = vec![T::zero(); m];
        for i in (0..m).rev() {
            let mut s = g[i];
            for j in (i + 1)..m {
                s = s - h[i][j] * y[j];
            }
            y[i] = if h[i][i] != T::zero() { s / h[i][i] } else { T::zero() };
        }
        y
    }
}

impl<M, V, T> LinearSolver<M, V> for GmresSolver<T>
where
    M: MatVec<V>,
    (): InnerProduct<V, Scalar = T>,
    V: AsMut<[T]> + AsRef<[T]> + From<Vec<T>> + Clone,
    T: Float + From<f64>,
{
    type Error = BddcError;
    type Scalar = T;

    fn solve(&mut self, a: &M, pc: Option<&dyn Preconditioner<M, V>>, b: &V, x: &mut V) -> Result<SolveStats<T>, BddcError> {
        let n = b.as_ref().len();
        let ip = ();
        let precondition = |v: &V| -> Result<V, BddcError> {
            match pc {
                Some(pc) => {
                    let mut z = V::from(vec![T::zero(); n]);
                    pc.apply(v, &mut z)?;
                    Ok(z)
                }
                None => Ok(v.clone()),
            }
        };
        let residual = |x: &V| -> V {
            let mut ax = V::from(vec![T::zero(); n]);
            a.matvec(x, &mut ax);
            V::from(b.as_ref().iter().zip(ax.as_ref()).map(|(&bi, &ai)| bi - ai).collect::<Vec<_>>())
        };
        let mut r = residual(x);
        let res0 = ip.norm(&r);
        if !res0.is_finite() {
            return Err(BddcError::SolveError("non-finite initial residual".into()));
        }
        let mut stats = SolveStats { iterations: 0, final_residual: res0, converged: res0 == T::zero() };
        if stats.converged {
            return Ok(stats);
        }
        let eps: T = From::from(1e-14);
        let mut iters = 0;
        while iters < self.conv.max_iters {
            let beta = ip.norm(&r);
            let m = self.restart;
            let mut v_basis = vec![V::from(r.as_ref().iter().map(|&ri| ri / beta).collect::<Vec<_>>())];
            let mut h = vec![vec![T::zero(); m]; m + 1];
            let mut g = vec![T::zero(); m + 1];
            g[0] = beta;
            let (mut cs, mut sn) = (vec![T::zero(); m], vec![T::zero(); m]);
            let mut z_basis = Vec::with_capacity(m);
            let mut k = 0;
            let mut stop = false;
            while k < m && iters < self.conv.max_iters {
                let zk = precondition(&v_basis[k])?;
                let mut w = V::from(vec![T::zero(); n]);
                a.matvec(&zk, &mut w);
                z_basis.push(zk);
                for _pass in 0..2 {
                    for i in 0..=k {
                        let hij = ip.dot(&w, &v_basis[i]);
                        h[i][k] = h[i][k] + hij;
                        for (wl, vl) in w.as_mut().iter_mut().zip(v_basis[i].as_ref()) {
                            *wl = *wl - hij * *vl;
                        }
                    }
                }
                h[k + 1][k] = ip.norm(&w);
                let breakdown = h[k + 1][k] <= eps * beta;
                if !breakdown {
                    let inv = T::one() / h[k + 1][k];
                    v_basis.push(V::from(w.as_ref().iter().map(|&wl| wl * inv).collect::<Vec<_>>()));
                }
                Self::apply_givens_and_update_g(&mut h, &mut g, &mut cs, &mut sn, k);
                k += 1;
                iters += 1;
                if !g[k].is_finite() {
                    return Err(BddcError::SolveError(format!("non-finite residual at iteration {iters}")));
                }
                let (done, s) = self.conv.check(g[k].abs(), res0, iters);
                stats = s;
                if done || breakdown {
                    stop = stats.converged || breakdown;
                    break;
                }
            }
            let y = Self::back_substitution(&h, &g, k);
            for (yj, zj) in y.iter().zip(&z_basis) {
                for (xl, zl) in x.as_mut().iter_mut().zip(zj.as_ref()) {
                    *xl = *xl + *yj * *zl;
                }
            }
            r = residual(x);
            stats.final_residual = ip.norm(&r);
            if stop {
                break;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::MatVec;
    use faer::Mat;
    use approx::assert_abs_diff_eq;

    #[test]
    fn gmres_solves_nonsymmetric_system() {
        let n = 8;
        let a = Mat::from_fn(n, n, |i, j| {
            if i == j {
                4.0
            } else if j == i + 1 {
                -1.5
            } else if i == j + 1 {
                -0.5
            } else {
                0.0
            }
        });
        let b: Vec<f64> = (0..n).map(|i| 1.0 + i as f64).collect();
        let mut x = vec![0.0; n];
        let mut solver = GmresSolver::new(4, 1e-12, 200);
        let stats = solver.solve(&a, None, &b, &mut x).unwrap();
        assert!(stats.converged);
        let mut ax = vec![0.0; n];
        a.matvec(&x, &mut ax);
        for (axi, bi) in ax.iter().zip(&b) {
            assert_abs_diff_eq!(*axi, *bi, epsilon = 1e-9);
        }
    }

    struct NanPC;
    impl Preconditioner<Mat<f64>, Vec<f64>> for NanPC {
        fn apply(&self, _r: &Vec<f64>, z: &mut Vec<f64>) -> Result<(), BddcError> {
            z.fill(f64::NAN);
            Ok(())
        }
    }

    #[test]
    fn non_finite_residual_is_a_breakdown() {
        let a = Mat::from_fn(3, 3, |i, j| if i == j { 2.0 } else { 0.0 });
        let mut x = vec![0.0; 3];
        let err = GmresSolver::new(3, 1e-10, 50).solve(&a, Some(&NanPC), &vec![1.0, 0.0, 1.0], &mut x).unwrap_err();
        assert_eq!(err, BddcError::SolveError("non-finite residual at iteration 1".into()));
    }
}
