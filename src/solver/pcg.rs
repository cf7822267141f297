//! Preconditioned Conjugate Gradient (PCG) per Saad §9.2
//!
//! Optionally records the CG coefficients so the extreme eigenvalues of the
//! preconditioned operator can be estimated from the associated Lanczos
//! tridiagonal matrix (Saad §6.7.3).

use crate::core::traits::{InnerProduct, MatVec};
use crate::error::BddcError;
use crate::matrix::dense;
use crate::preconditioner::Preconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::{Convergence, SolveStats};

pub enum CgNormType { Preconditioned, Unpreconditioned, Natural }

pub struct PcgSolver<T> {
    pub conv: Convergence<T>,
    pub norm_type: CgNormType,
    pub compute_eigenvalues: bool,
    pub monitor: Option<Box<dyn FnMut(usize, T)>>,
    pub residual_history: Vec<T>,
    alphas: Vec<T>,
    betas: Vec<T>,
}

impl<T: Copy + num_traits::Float> PcgSolver<T> {
    pub fn new(tol: T, max_iters: usize) -> Self {
        Self {
            conv: Convergence { tol, max_iters },
            norm_type: CgNormType::Unpreconditioned,
            compute_eigenvalues: false,
            monitor: None,
            residual_history: Vec::new(),
            alphas: Vec::new(),
            betas: Vec::new(),
        }
    }
    pub fn with_norm(mut self, norm_type: CgNormType) -> Self {
        self.norm_type = norm_type;
        self
    }
    pub fn with_eigen_estimates(mut self, flag: bool) -> Self {
        self.compute_eigenvalues = flag;
        self
    }
    pub fn with_monitor<F>(mut self, f: F) -> Self
    where F: FnMut(usize, T) + 'static {
        self.monitor = Some(Box::new(f));
        self
    }
    pub fn clear_history(&mut self) {
        self.residual_history.clear();
    }

    /// Extreme eigenvalues `(min, max)` of the preconditioned operator from the
    /// last solve. Requires `with_eigen_estimates(true)`.
    pub fn eigen_estimates(&self) -> Result<(f64, f64), BddcError> {
        let k = self.alphas.len();
        if k == 0 {
            return Err(BddcError::Setup("PcgSolver::eigen_estimates"));
        }
        let a: Vec<f64> = self.alphas.iter().map(|v| v.to_f64().unwrap_or(f64::NAN)).collect();
        let b: Vec<f64> = self.betas.iter().map(|v| v.to_f64().unwrap_or(f64::NAN)).collect();
        let mut t = faer::Mat::<f64>::zeros(k, k);
        for j in 0..k {
            t[(j, j)] = 1.0 / a[j] + if j > 0 { b[j - 1] / a[j - 1] } else { 0.0 };
            if j + 1 < k && j < b.len() {
                let off = b[j].sqrt() / a[j];
                t[(j, j + 1)] = off;
                t[(j + 1, j)] = off;
            }
        }
        let (values, _) = dense::sym_eigen(&t)?;
        Ok((values[0], values[k - 1]))
    }

    fn norm<V>(&self, r: &V, z: &V) -> T
    where (): InnerProduct<V, Scalar = T> {
        let ip = ();
        match self.norm_type {
            CgNormType::Preconditioned => ip.dot(z, z).sqrt(),
            CgNormType::Unpreconditioned => ip.dot(r, r).sqrt(),
            CgNormType::Natural => ip.dot(r, z).abs().sqrt(),
        }
    }
}

impl<M, V, T> LinearSolver<M, V> for PcgSolver<T>
where
    M: MatVec<V>,
    (): InnerProduct<V, Scalar = T>,
    V: AsMut<[T]> + AsRef<[T]> + From<Vec<T>> + Clone,
    T: num_traits::Float + Clone + From<f64>,
{
    type Error = BddcError;
    type Scalar = T;

    fn solve(&mut self, a: &M, pc: Option<&dyn Preconditioner<M, V>>, b: &V, x: &mut V) -> Result<SolveStats<T>, BddcError> {
        let n = b.as_ref().len();
        let ip = ();
        self.alphas.clear();
        self.betas.clear();
        let mut x_vec = x.as_ref().to_vec();
        let mut r = {
            let mut tmp = V::from(vec![T::zero(); n]);
            a.matvec(&V::from(x_vec.clone()), &mut tmp);
            let r_vec = tmp.as_ref().iter().zip(b.as_ref()).map(|(&ax, &bi)| bi - ax).collect::<Vec<_>>();
            V::from(r_vec)
        };
        let mut z = V::from(vec![T::zero(); n]);
        if let Some(pc) = pc {
            pc.apply(&r, &mut z)?;
        } else {
            z.clone_from(&r);
        }
        let mut p = z.clone();
        let mut rz = ip.dot(&r, &z);
        let res0 = self.norm(&r, &z);
        if !res0.is_finite() || !rz.is_finite() {
            return Err(BddcError::SolveError("non-finite initial residual".into()));
        }
        let mut stats = SolveStats { iterations: 0, final_residual: res0, converged: res0 == T::zero() };
        if let Some(ref mut monitor) = self.monitor {
            monitor(0, res0);
        }
        self.residual_history.push(res0);
        if stats.converged {
            return Ok(stats);
        }
        for i in 0..self.conv.max_iters {
            let mut ap = V::from(vec![T::zero(); n]);
            a.matvec(&p, &mut ap);
            let p_dot_ap = ip.dot(&p, &ap);
            // Indefinite-matrix detection
            if p_dot_ap <= T::zero() {
                return Err(BddcError::IndefiniteMatrix);
            }
            let alpha = rz / p_dot_ap;
            self.alphas.push(alpha);
            for (xj, pj) in x_vec.iter_mut().zip(p.as_ref()) {
                *xj = *xj + alpha * *pj;
            }
            for (rj, apj) in r.as_mut().iter_mut().zip(ap.as_ref()) {
                *rj = *rj - alpha * *apj;
            }
            if let Some(pc) = pc {
                pc.apply(&r, &mut z)?;
            } else {
                z.clone_from(&r);
            }
            let rz_new = ip.dot(&r, &z);
            let res_norm = self.norm(&r, &z);
            if !res_norm.is_finite() || !rz_new.is_finite() {
                return Err(BddcError::SolveError(format!("non-finite residual at iteration {}", i + 1)));
            }
            if let Some(ref mut monitor) = self.monitor {
                monitor(i + 1, res_norm);
            }
            self.residual_history.push(res_norm);
            let (stop, s) = self.conv.check(res_norm, res0, i + 1);
            stats = s;
            if stop {
                break;
            }
            let beta = rz_new / rz;
            // Indefinite-preconditioner detection
            if beta < T::zero() {
                return Err(BddcError::IndefinitePreconditioner);
            }
            self.betas.push(beta);
            for (pj, zj) in p.as_mut().iter_mut().zip(z.as_ref()) {
                *pj = *zj + beta * *pj;
            }
            rz = rz_new;
        }
        *x = V::from(x_vec);
        Ok(stats)
    }
}
