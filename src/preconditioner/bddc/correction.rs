//! Constrained Neumann solves and the coarse basis of a subdomain.
//!
//! Local dofs are split into primal vertices `V` (in the working basis, so
//! changed entities contribute here too) and the rest `R`. With the remaining
//! constraints `C` acting on `R`, the Neumann problem
//!
//! ```text
//! [A_RR  C^T] [x]   [f]
//! [C     0  ] [λ] = [0]
//! ```
//!
//! is solved by `x = y + auxmat2 (auxmat1 y)` with `y = A_RR^{-1} f`,
//! `auxmat2 = -A_RR^{-1} C^T`, `M1 = (C A_RR^{-1} C^T)^{-1}` and
//! `auxmat1 = M1 C`. The same blocks give the coarse basis `Phi` (and `Psi`
//! from the transposed problem when `A` is not symmetric) and the local coarse
//! matrix `Psi^T A Phi` in closed form.
//!
//! A floating subdomain with no primal vertex has a singular `A_RR`. It is
//! then replaced by `A_RR + rho C^T C`, which agrees with `A_RR` on `C x = 0`,
//! so the constrained solution, the multipliers and the coarse blocks are
//! unchanged.

use faer::Mat;

use crate::error::BddcError;
use crate::matrix::dense;
use crate::preconditioner::bddc::constraints::LocalConstraints;
use crate::preconditioner::bddc::local::Subdomain;
use crate::solver::DenseFactor;

/// Dense blocks of the constrained Neumann solve.
#[derive(Clone, Debug)]
pub struct AuxMats {
    /// Constraints restricted to `R`, `n_c x n_R`.
    pub c_cr: Mat<f64>,
    /// `M1 C`, `n_c x n_R`.
    pub auxmat1: Mat<f64>,
    /// `-A_RR^{-1} C^T`, `n_R x n_c`.
    pub auxmat2: Mat<f64>,
    pub m1: Mat<f64>,
    /// `-A_RR^{-T} C^T`, nonsymmetric operators only.
    pub auxmat2_t: Option<Mat<f64>>,
}

impl AuxMats {
    fn zeros(n_r: usize, n_c: usize) -> Self {
        Self {
            c_cr: Mat::zeros(n_c, n_r),
            auxmat1: Mat::zeros(n_c, n_r),
            auxmat2: Mat::zeros(n_r, n_c),
            m1: Mat::zeros(n_c, n_c),
            auxmat2_t: None,
        }
    }

    fn fits(&self, n_r: usize, n_c: usize) -> bool {
        (self.auxmat2.nrows(), self.auxmat2.ncols()) == (n_r, n_c)
    }
}

#[derive(Debug)]
pub struct Correction {
    pub r_dofs: Vec<usize>,
    pub v_dofs: Vec<usize>,
    neumann: DenseFactor,
    pub aux: AuxMats,
    /// Whether the auxiliary buffers of a previous setup were reused.
    pub aux_reused: bool,
    /// Whether `A_RR` was singular and the regularized block was factored.
    pub regularized: bool,
    pub coarse_phi_b: Mat<f64>,
    pub coarse_phi_d: Mat<f64>,
    pub coarse_psi_b: Option<Mat<f64>>,
    pub coarse_psi_d: Option<Mat<f64>>,
    /// Local coarse matrix, column-major, primal order.
    pub coarse_submat_vals: Vec<f64>,
    symmetric: bool,
}

fn zero(a: &mut Mat<f64>) {
    for j in 0..a.ncols() {
        for i in 0..a.nrows() {
            a[(i, j)] = 0.0;
        }
    }
}

fn negate(a: &mut Mat<f64>) {
    for j in 0..a.ncols() {
        for i in 0..a.nrows() {
            a[(i, j)] = -a[(i, j)];
        }
    }
}

impl Correction {
    pub fn new(
        sd: &Subdomain,
        lc: &LocalConstraints,
        symmetric: bool,
        reuse: Option<AuxMats>,
    ) -> Result<Self, BddcError> {
        let n = sd.n;
        let v_dofs = lc.vertices.clone();
        let mut is_vertex = vec![false; n];
        for &v in &v_dofs {
            is_vertex[v] = true;
        }
        let r_dofs: Vec<usize> = (0..n).filter(|&i| !is_vertex[i]).collect();
        let mut pos = vec![usize::MAX; n];
        for (k, &i) in r_dofs.iter().enumerate() {
            pos[i] = k;
        }
        let (n_r, n_v, n_c) = (r_dofs.len(), v_dofs.len(), lc.constraints.len());

        let a_rr = sd.mat.extract_dense(&r_dofs, &r_dofs);
        let a_rv = sd.mat.extract_dense(&r_dofs, &v_dofs);
        let a_vr = sd.mat.extract_dense(&v_dofs, &r_dofs);
        let a_vv = sd.mat.extract_dense(&v_dofs, &v_dofs);

        let (mut aux, aux_reused) = match reuse {
            Some(aux) if aux.fits(n_r, n_c) => (aux, true),
            _ => (AuxMats::zeros(n_r, n_c), false),
        };
        zero(&mut aux.c_cr);
        for (j, row) in lc.constraints.iter().enumerate() {
            for &(d, v) in row {
                let k = pos[d];
                if k == usize::MAX {
                    return Err(BddcError::Inconsistent(format!("constraint {j} touches primal vertex {d}")));
                }
                aux.c_cr[(j, k)] = v;
            }
        }
        let (neumann, regularized) = Self::factor_neumann(&a_rr, &aux.c_cr, symmetric)?;
        let c_t = dense::transpose(&aux.c_cr);
        aux.auxmat2.copy_from(c_t.as_ref());
        neumann.solve_mat_in_place(&mut aux.auxmat2, false);
        negate(&mut aux.auxmat2);
        let mut m3 = &aux.c_cr * &aux.auxmat2;
        negate(&mut m3);
        let m1_factor = DenseFactor::new(&m3, false)?;
        aux.m1.copy_from(Mat::<f64>::identity(n_c, n_c).as_ref());
        m1_factor.solve_mat_in_place(&mut aux.m1, false);
        aux.auxmat1 = &aux.m1 * &aux.c_cr;
        aux.auxmat2_t = if symmetric {
            None
        } else {
            let mut t = c_t;
            neumann.solve_mat_in_place(&mut t, true);
            negate(&mut t);
            Some(t)
        };

        // vertex columns
        let mut f = a_rv.clone();
        negate(&mut f);
        let y = neumann.solve_mat(&f, false);
        let lambda = &aux.auxmat1 * &y;
        let x_r = &y + &(&aux.auxmat2 * &lambda);
        // constraint columns
        let mut x_rc = &aux.auxmat2 * &aux.m1;
        negate(&mut x_rc);

        let n_p = n_v + n_c;
        let phi = Self::full_basis(n, &r_dofs, &v_dofs, &x_r, &x_rc);
        let vv = &(&a_vr * &x_r) + &a_vv;
        let vc = &a_vr * &x_rc;
        let coarse = Mat::from_fn(n_p, n_p, |i, j| match (i < n_v, j < n_v) {
            (true, true) => vv[(i, j)],
            (true, false) => vc[(i, j - n_v)],
            (false, true) => -lambda[(i - n_v, j)],
            (false, false) => aux.m1[(i - n_v, j - n_v)],
        });

        let psi = match &aux.auxmat2_t {
            None => None,
            Some(aux2_t) => {
                let mut f = dense::transpose(&a_vr);
                negate(&mut f);
                let y = neumann.solve_mat(&f, true);
                let mu = &dense::transpose(&aux.m1) * &(&aux.c_cr * &y);
                let z_r = &y + &(aux2_t * &mu);
                let mut z_rc = aux2_t * &dense::transpose(&aux.m1);
                negate(&mut z_rc);
                Some(Self::full_basis(n, &r_dofs, &v_dofs, &z_r, &z_rc))
            }
        };

        let all: Vec<usize> = (0..n_p).collect();
        Ok(Self {
            coarse_phi_b: dense::gather(&phi, &sd.boundary, &all),
            coarse_phi_d: dense::gather(&phi, &sd.interior, &all),
            coarse_psi_b: psi.as_ref().map(|p| dense::gather(p, &sd.boundary, &all)),
            coarse_psi_d: psi.as_ref().map(|p| dense::gather(p, &sd.interior, &all)),
            coarse_submat_vals: dense::to_column_major(&coarse),
            r_dofs,
            v_dofs,
            neumann,
            aux,
            aux_reused,
            regularized,
            symmetric,
        })
    }

    /// Factor `A_RR`, or `A_RR + rho C^T C` when `A_RR` is singular and there
    /// are constraints left to pin its kernel.
    fn factor_neumann(a_rr: &Mat<f64>, c_cr: &Mat<f64>, symmetric: bool) -> Result<(DenseFactor, bool), BddcError> {
        match DenseFactor::new(a_rr, symmetric) {
            Ok(f) => Ok((f, false)),
            Err(BddcError::FactorError(msg)) if c_cr.nrows() > 0 => {
                let rho = match dense::inf_norm(a_rr) {
                    v if v > 0.0 => v,
                    _ => 1.0,
                };
                let mut reg = &dense::transpose(c_cr) * c_cr;
                for j in 0..reg.ncols() {
                    for i in 0..reg.nrows() {
                        reg[(i, j)] = a_rr[(i, j)] + rho * reg[(i, j)];
                    }
                }
                log::debug!("bddc: singular Neumann block ({msg}), regularizing with {} constraints", c_cr.nrows());
                let f = DenseFactor::new(&reg, symmetric).map_err(|e| {
                    BddcError::FactorError(format!("Neumann block stays singular under its constraints: {e}"))
                })?;
                Ok((f, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Basis over all local dofs: `R` rows from the solves, `V` rows `[I | 0]`.
    fn full_basis(n: usize, r_dofs: &[usize], v_dofs: &[usize], x_r: &Mat<f64>, x_rc: &Mat<f64>) -> Mat<f64> {
        let n_v = v_dofs.len();
        let mut phi = Mat::<f64>::zeros(n, n_v + x_rc.ncols());
        for (k, &i) in r_dofs.iter().enumerate() {
            for j in 0..n_v {
                phi[(i, j)] = x_r[(k, j)];
            }
            for j in 0..x_rc.ncols() {
                phi[(i, n_v + j)] = x_rc[(k, j)];
            }
        }
        for (j, &v) in v_dofs.iter().enumerate() {
            phi[(v, j)] = 1.0;
        }
        phi
    }

    pub fn n_primal(&self) -> usize {
        self.coarse_phi_b.ncols()
    }

    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    pub fn into_aux(self) -> AuxMats {
        self.aux
    }

    /// Basis restricting residuals to the coarse space (`Psi`, or `Phi` when transposed).
    pub fn restriction(&self, transpose: bool) -> (&Mat<f64>, &Mat<f64>) {
        match (transpose, &self.coarse_psi_b, &self.coarse_psi_d) {
            (false, Some(b), Some(d)) => (b, d),
            _ => (&self.coarse_phi_b, &self.coarse_phi_d),
        }
    }

    /// Basis interpolating coarse solutions (`Phi`, or `Psi` when transposed).
    pub fn interpolation(&self, transpose: bool) -> (&Mat<f64>, &Mat<f64>) {
        match (transpose, &self.coarse_psi_b, &self.coarse_psi_d) {
            (true, Some(b), Some(d)) => (b, d),
            _ => (&self.coarse_phi_b, &self.coarse_phi_d),
        }
    }

    /// Constrained Neumann solve on a full local vector; vertex entries of
    /// `rhs` are ignored and come back zero.
    pub fn apply(&self, rhs: &[f64], transpose: bool) -> Vec<f64> {
        let mut y: Vec<f64> = self.r_dofs.iter().map(|&i| rhs[i]).collect();
        self.neumann.solve_in_place(&mut y, transpose);
        let n_c = self.aux.c_cr.nrows();
        let n_r = self.r_dofs.len();
        let (lambda, aux2): (Vec<f64>, &Mat<f64>) = if transpose && !self.symmetric {
            let cy: Vec<f64> =
                (0..n_c).map(|i| (0..n_r).map(|k| self.aux.c_cr[(i, k)] * y[k]).sum::<f64>()).collect();
            let l = (0..n_c).map(|i| (0..n_c).map(|k| self.aux.m1[(k, i)] * cy[k]).sum::<f64>()).collect();
            (l, self.aux.auxmat2_t.as_ref().unwrap_or(&self.aux.auxmat2))
        } else {
            let l = (0..n_c).map(|i| (0..n_r).map(|k| self.aux.auxmat1[(i, k)] * y[k]).sum::<f64>()).collect();
            (l, &self.aux.auxmat2)
        };
        let mut out = vec![0.0; rhs.len()];
        for (k, &i) in self.r_dofs.iter().enumerate() {
            out[i] = y[k] + (0..n_c).map(|j| aux2[(k, j)] * lambda[j]).sum::<f64>();
        }
        out
    }

    /// `|| Psi^T A Phi - coarse_submat_vals ||_inf` for the local matrix of `sd`.
    pub fn check_coarse_matrix(&self, sd: &Subdomain) -> f64 {
        let n_p = self.n_primal();
        let assemble = |b: &Mat<f64>, d: &Mat<f64>| {
            let mut full = Mat::<f64>::zeros(sd.n, n_p);
            for (k, &i) in sd.boundary.iter().enumerate() {
                for j in 0..n_p {
                    full[(i, j)] = b[(k, j)];
                }
            }
            for (k, &i) in sd.interior.iter().enumerate() {
                for j in 0..n_p {
                    full[(i, j)] = d[(k, j)];
                }
            }
            full
        };
        let (pb, pd) = self.interpolation(false);
        let (qb, qd) = self.restriction(false);
        let phi = assemble(pb, pd);
        let psi = assemble(qb, qd);
        let a = sd.mat.to_dense();
        let product = &dense::transpose(&psi) * &(&a * &phi);
        let stored = dense::from_column_major(n_p, n_p, &self.coarse_submat_vals);
        dense::inf_norm(&(&product - &stored))
    }
}
