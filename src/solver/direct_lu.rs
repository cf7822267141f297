//! Direct dense solvers using Faer: LU and Cholesky factorizations.
//!
//! Subdomain blocks (interior Dirichlet block, Neumann `A_RR` block) and the
//! redundant coarse matrix are small enough to be factored densely. A
//! factorization is computed once per setup and then reused for repeated
//! forward/backward solves and transposed solves.
//!
//! # References
//! - Faer documentation: https://github.com/sarah-ek/faer-rs
//! - Golub & Van Loan, Matrix Computations

use faer::linalg::solvers::{FullPivLu, Llt, SolveCore};
use faer::{Conj, Mat, MatMut, Side};

use crate::error::BddcError;
use crate::matrix::dense;
use crate::preconditioner::Preconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::SolveStats;

/// Above this condition estimate a factorization is reported as singular.
const SINGULAR_COND: f64 = 1e13;

/// A reusable dense factorization.
pub enum DenseFactor {
    /// Zero-sized block: every solve is a no-op.
    Empty,
    Lu(FullPivLu<f64>),
    Cholesky(Llt<f64>),
}

impl std::fmt::Debug for DenseFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenseFactor::Empty => write!(f, "DenseFactor::Empty"),
            DenseFactor::Lu(_) => write!(f, "DenseFactor::Lu"),
            DenseFactor::Cholesky(_) => write!(f, "DenseFactor::Cholesky"),
        }
    }
}

impl DenseFactor {
    /// Factor `a`, with Cholesky when `symmetric` (falling back to LU if `a` is
    /// not positive definite).
    pub fn new(a: &Mat<f64>, symmetric: bool) -> Result<Self, BddcError> {
        let n = a.nrows();
        if n != a.ncols() {
            return Err(BddcError::SizeMismatch { what: "square matrix", expected: n, got: a.ncols() });
        }
        if n == 0 {
            return Ok(DenseFactor::Empty);
        }
        let factor = if symmetric {
            match Llt::new(a.as_ref(), Side::Lower) {
                Ok(llt) => DenseFactor::Cholesky(llt),
                Err(_) => {
                    log::debug!("cholesky failed on {n}x{n} block, using LU");
                    DenseFactor::Lu(FullPivLu::new(a.as_ref()))
                }
            }
        } else {
            DenseFactor::Lu(FullPivLu::new(a.as_ref()))
        };
        factor.check_singular(a)?;
        Ok(factor)
    }

    /// Condition estimate on a fixed non-smooth test vector.
    fn check_singular(&self, a: &Mat<f64>) -> Result<(), BddcError> {
        let n = a.nrows();
        let b: Vec<f64> = (0..n).map(|i| 1.0 + ((i * 7919) % 113) as f64 / 113.0).collect();
        let x = self.solve(&b);
        if x.iter().any(|v| !v.is_finite()) {
            return Err(BddcError::FactorError(format!("{n}x{n} matrix is singular (non-finite solve)")));
        }
        let b_norm = b.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let x_norm = x.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let cond = dense::inf_norm(a) * x_norm / b_norm;
        if !cond.is_finite() || cond > SINGULAR_COND {
            return Err(BddcError::FactorError(format!(
                "{n}x{n} matrix is singular to working precision (condition estimate {cond:e})"
            )));
        }
        Ok(())
    }

    /// x = A⁻¹ b
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let mut x = b.to_vec();
        self.solve_in_place(&mut x, false);
        x
    }

    /// x = A⁻ᵀ b
    pub fn solve_transpose(&self, b: &[f64]) -> Vec<f64> {
        let mut x = b.to_vec();
        self.solve_in_place(&mut x, true);
        x
    }

    pub fn solve_in_place(&self, x: &mut [f64], transpose: bool) {
        let n = x.len();
        if n == 0 {
            return;
        }
        let rhs = MatMut::from_column_major_slice_mut(x, n, 1);
        match (self, transpose) {
            (DenseFactor::Empty, _) => {}
            (DenseFactor::Lu(lu), false) => lu.solve_in_place_with_conj(Conj::No, rhs),
            (DenseFactor::Lu(lu), true) => lu.solve_transpose_in_place_with_conj(Conj::No, rhs),
            (DenseFactor::Cholesky(llt), _) => llt.solve_in_place_with_conj(Conj::No, rhs),
        }
    }

    /// Solve for every column of `b`.
    pub fn solve_mat(&self, b: &Mat<f64>, transpose: bool) -> Mat<f64> {
        let mut x = b.clone();
        self.solve_mat_in_place(&mut x, transpose);
        x
    }

    /// Overwrite every column of `x` with the solution for it.
    pub fn solve_mat_in_place(&self, x: &mut Mat<f64>, transpose: bool) {
        if x.nrows() == 0 || x.ncols() == 0 {
            return;
        }
        match (self, transpose) {
            (DenseFactor::Empty, _) => {}
            (DenseFactor::Lu(lu), false) => lu.solve_in_place_with_conj(Conj::No, x.as_mut()),
            (DenseFactor::Lu(lu), true) => lu.solve_transpose_in_place_with_conj(Conj::No, x.as_mut()),
            (DenseFactor::Cholesky(llt), _) => llt.solve_in_place_with_conj(Conj::No, x.as_mut()),
        }
    }
}

/// LU solver using full pivoting from Faer.
///
/// Stores the factorization for reuse.
#[derive(Debug, Default)]
pub struct LuSolver {
    factor: Option<DenseFactor>,
}

impl LuSolver {
    /// Create a new LU solver (no factorization yet).
    pub fn new() -> Self {
        LuSolver { factor: None }
    }

    /// Factor `a` without solving.
    pub fn factor(&mut self, a: &Mat<f64>) -> Result<(), BddcError> {
        self.factor = Some(DenseFactor::new(a, false)?);
        Ok(())
    }

    /// Solve using the cached factorization.
    pub fn solve_cached(&self, b: &[f64], x: &mut [f64]) -> Result<(), BddcError> {
        let factor = self.factor.as_ref().ok_or(BddcError::Setup("LuSolver::solve_cached"))?;
        x.copy_from_slice(b);
        factor.solve_in_place(x, false);
        Ok(())
    }

    /// Transposed solve using the cached factorization.
    pub fn solve_transpose_cached(&self, b: &[f64], x: &mut [f64]) -> Result<(), BddcError> {
        let factor = self.factor.as_ref().ok_or(BddcError::Setup("LuSolver::solve_transpose_cached"))?;
        x.copy_from_slice(b);
        factor.solve_in_place(x, true);
        Ok(())
    }
}

impl LinearSolver<Mat<f64>, Vec<f64>> for LuSolver {
    type Error = BddcError;
    type Scalar = f64;

    /// Solve Ax = b using LU factorization (full pivoting). The preconditioner is ignored.
    fn solve(
        &mut self,
        a: &Mat<f64>,
        _pc: Option<&dyn Preconditioner<Mat<f64>, Vec<f64>>>,
        b: &Vec<f64>,
        x: &mut Vec<f64>,
    ) -> Result<SolveStats<f64>, BddcError> {
        self.factor(a)?;
        self.solve_cached(b, x)?;
        Ok(SolveStats { iterations: 1, final_residual: 0.0, converged: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::LinearSolver;
    use approx::assert_abs_diff_eq;

    #[test]
    fn lu_solver_solves_dense_system() {
        // 3x3 system: [[2,1,1],[1,3,2],[1,0,0]] x = [4,5,6]
        // True solution: [6,15,-23]
        let a = Mat::from_fn(3, 3, |i, j| match (i, j) {
            (0, 0) => 2.0, (0, 1) => 1.0, (0, 2) => 1.0,
            (1, 0) => 1.0, (1, 1) => 3.0, (1, 2) => 2.0,
            (2, 0) => 1.0,
            _ => 0.0,
        });
        let b = vec![4.0, 5.0, 6.0];
        let mut x = vec![0.0; 3];
        let mut solver = LuSolver::new();
        let stats = solver.solve(&a, None, &b, &mut x).unwrap();
        for (xi, ei) in x.iter().zip([6.0, 15.0, -23.0]) {
            assert_abs_diff_eq!(*xi, ei, epsilon = 1e-10);
        }
        assert!(stats.converged);
    }

    #[test]
    fn transpose_solve_uses_a_transpose() {
        let a = Mat::from_fn(2, 2, |i, j| [[2.0, 1.0], [0.0, 1.0]][i][j]);
        let f = DenseFactor::new(&a, false).unwrap();
        // A^T x = [2, 2] -> x = [1, 1]
        let x = f.solve_transpose(&[2.0, 2.0]);
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-14);
        assert_abs_diff_eq!(x[1], 1.0, epsilon = 1e-14);
    }

    #[test]
    fn cholesky_and_empty_blocks() {
        let a = Mat::from_fn(2, 2, |i, j| if i == j { 2.0 } else { -1.0 });
        let f = DenseFactor::new(&a, true).unwrap();
        assert!(matches!(f, DenseFactor::Cholesky(_)));
        let x = f.solve(&[1.0, 1.0]);
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-14);
        let e = DenseFactor::new(&Mat::zeros(0, 0), true).unwrap();
        assert!(e.solve(&[]).is_empty());
    }

    #[test]
    fn singular_matrix_is_reported() {
        // 1D Neumann Laplacian, constants in the kernel
        let a = Mat::from_fn(3, 3, |i, j| match (i, j) {
            (0, 0) | (2, 2) => 1.0,
            (1, 1) => 2.0,
            (0, 1) | (1, 0) | (1, 2) | (2, 1) => -1.0,
            _ => 0.0,
        });
        assert!(matches!(DenseFactor::new(&a, false), Err(BddcError::FactorError(_))));
    }

    #[test]
    fn exactly_singular_neumann_block_is_reported() {
        // Q1 Neumann Laplacian of a 2x1 element strip: exact zero pivot
        let q1 = [[4.0, -1.0, -2.0, -1.0], [-1.0, 4.0, -1.0, -2.0], [-2.0, -1.0, 4.0, -1.0], [-1.0, -2.0, -1.0, 4.0]];
        let elements = [[0, 1, 4, 3], [1, 2, 5, 4]];
        let mut a = Mat::<f64>::zeros(6, 6);
        for nodes in elements {
            for i in 0..4 {
                for j in 0..4 {
                    a[(nodes[i], nodes[j])] += q1[i][j] / 6.0;
                }
            }
        }
        for symmetric in [true, false] {
            let err = DenseFactor::new(&a, symmetric).unwrap_err();
            assert!(matches!(err, BddcError::FactorError(_)), "{err:?}");
        }
    }

    #[test]
    fn cached_solve_before_factor_fails() {
        let solver = LuSolver::new();
        let mut x = vec![0.0];
        assert_eq!(solver.solve_cached(&[1.0], &mut x), Err(BddcError::Setup("LuSolver::solve_cached")));
    }
}
