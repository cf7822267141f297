//! Subdomain blocks and the interior (Dirichlet) solver.

use rand::Rng;

use crate::config::DirichletSolver;
use crate::error::BddcError;
use crate::matrix::{CsrMatrix, SparseMatrix};
use crate::preconditioner::Preconditioner;
use crate::preconditioner::jacobi::Jacobi;
use crate::solver::{DenseFactor, GmresSolver, LinearSolver, PcgSolver};

/// Solver for `A_II`.
#[derive(Debug)]
pub enum DirichletFactor {
    Direct(DenseFactor),
    Iterative {
        a_ii_t: CsrMatrix,
        jacobi: Jacobi,
        rtol: f64,
        max_it: usize,
    },
}

/// Local matrix of one rank split into interior and interface blocks.
#[derive(Debug)]
pub struct Subdomain {
    pub n: usize,
    pub interior: Vec<usize>,
    pub boundary: Vec<usize>,
    /// Local matrix in the working basis.
    pub mat: CsrMatrix,
    pub a_ii: CsrMatrix,
    pub a_ib: CsrMatrix,
    pub a_bi: CsrMatrix,
    pub dirichlet: DirichletFactor,
    /// Partition of unity on the interface dofs.
    pub weights: Vec<f64>,
    pub symmetric: bool,
}

impl Subdomain {
    pub fn new(
        mat: CsrMatrix,
        interior: Vec<usize>,
        boundary: Vec<usize>,
        weights: Vec<f64>,
        symmetric: bool,
        solver: DirichletSolver,
    ) -> Result<Self, BddcError> {
        let n = mat.nrows();
        if interior.len() + boundary.len() != n {
            return Err(BddcError::SizeMismatch { what: "interior + interface dofs", expected: n, got: interior.len() + boundary.len() });
        }
        if weights.len() != boundary.len() {
            return Err(BddcError::SizeMismatch { what: "interface weights", expected: boundary.len(), got: weights.len() });
        }
        let a_ii = mat.extract(&interior, &interior);
        let a_ib = mat.extract(&interior, &boundary);
        let a_bi = mat.extract(&boundary, &interior);
        let dirichlet = match solver {
            DirichletSolver::Direct => DirichletFactor::Direct(DenseFactor::new(&a_ii.to_dense(), symmetric)?),
            DirichletSolver::Iterative { rtol, max_it } => DirichletFactor::Iterative {
                a_ii_t: a_ii.transpose(),
                jacobi: Jacobi::from_diagonal(&a_ii.diagonal()),
                rtol,
                max_it,
            },
        };
        Ok(Self { n, interior, boundary, mat, a_ii, a_ib, a_bi, dirichlet, weights, symmetric })
    }

    pub fn n_interior(&self) -> usize {
        self.interior.len()
    }

    pub fn n_boundary(&self) -> usize {
        self.boundary.len()
    }

    /// `A_II^{-1} rhs`, or `A_II^{-T} rhs`.
    pub fn solve_interior(&self, rhs: &[f64], transpose: bool) -> Result<Vec<f64>, BddcError> {
        match &self.dirichlet {
            DirichletFactor::Direct(f) => {
                let mut x = rhs.to_vec();
                f.solve_in_place(&mut x, transpose);
                Ok(x)
            }
            DirichletFactor::Iterative { a_ii_t, jacobi, rtol, max_it } => {
                if rhs.is_empty() {
                    return Ok(Vec::new());
                }
                let a = if transpose { a_ii_t } else { &self.a_ii };
                let b = rhs.to_vec();
                let mut x = vec![0.0; rhs.len()];
                let pc: &dyn Preconditioner<CsrMatrix, Vec<f64>> = jacobi;
                if self.symmetric {
                    PcgSolver::new(*rtol, *max_it).solve(a, Some(pc), &b, &mut x)?;
                } else {
                    GmresSolver::new(30, *rtol, *max_it).solve(a, Some(pc), &b, &mut x)?;
                }
                Ok(x)
            }
        }
    }

    /// Whether the interior solver reproduces a random vector to `tol`.
    pub fn check_exact_dirichlet<R: Rng>(&self, rng: &mut R, tol: f64) -> Result<bool, BddcError> {
        let n_i = self.n_interior();
        if n_i == 0 {
            return Ok(true);
        }
        let x: Vec<f64> = (0..n_i).map(|_| rng.gen_range(-1.0..=1.0)).collect();
        let b = self.mult_ii(&x, false);
        let y = self.solve_interior(&b, false)?;
        if y.iter().any(|v| !v.is_finite()) {
            return Err(BddcError::SolveError(format!("interior solve on {n_i} dofs produced non-finite values")));
        }
        let x_norm = x.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let err = x.iter().zip(&y).fold(0.0f64, |m, (a, b)| m.max((a - b).abs()));
        Ok(err <= tol * x_norm.max(f64::MIN_POSITIVE))
    }

    pub fn mult_ii(&self, x_i: &[f64], transpose: bool) -> Vec<f64> {
        let mut y = vec![0.0; self.n_interior()];
        if transpose {
            self.a_ii.spmv_transpose(x_i, &mut y);
        } else {
            self.a_ii.spmv(x_i, &mut y);
        }
        y
    }

    /// `A_IB x_B` (`A_BI^T x_B` when transposed).
    pub fn mult_ib(&self, x_b: &[f64], transpose: bool) -> Vec<f64> {
        let mut y = vec![0.0; self.n_interior()];
        if transpose {
            self.a_bi.spmv_transpose(x_b, &mut y);
        } else {
            self.a_ib.spmv(x_b, &mut y);
        }
        y
    }

    /// `A_BI x_I` (`A_IB^T x_I` when transposed).
    pub fn mult_bi(&self, x_i: &[f64], transpose: bool) -> Vec<f64> {
        let mut y = vec![0.0; self.n_boundary()];
        if transpose {
            self.a_ib.spmv_transpose(x_i, &mut y);
        } else {
            self.a_bi.spmv(x_i, &mut y);
        }
        y
    }

    pub fn restrict_interior(&self, x: &[f64]) -> Vec<f64> {
        self.interior.iter().map(|&i| x[i]).collect()
    }

    pub fn restrict_boundary(&self, x: &[f64]) -> Vec<f64> {
        self.boundary.iter().map(|&i| x[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn laplace(n: usize) -> CsrMatrix {
        let mut t = Vec::new();
        for i in 0..n {
            t.push((i, i, 2.0));
            if i + 1 < n {
                t.push((i, i + 1, -1.0));
                t.push((i + 1, i, -1.0));
            }
        }
        CsrMatrix::from_triplets(n, n, &t).unwrap()
    }

    #[test]
    fn interior_solve_matches_block() {
        let sd = Subdomain::new(laplace(5), vec![1, 2, 3], vec![0, 4], vec![0.5, 0.5], true, DirichletSolver::Direct)
            .unwrap();
        let x = vec![1.0, -2.0, 0.5];
        let b = sd.mult_ii(&x, false);
        let y = sd.solve_interior(&b, false).unwrap();
        for (a, b) in x.iter().zip(&y) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        assert_eq!(sd.mult_bi(&x, false), vec![-1.0, -0.5]);
    }

    #[test]
    fn exactness_check_flags_loose_iterative_solver() {
        let loose = DirichletSolver::Iterative { rtol: 1e-2, max_it: 1 };
        let sd = Subdomain::new(laplace(12), (1..11).collect(), vec![0, 11], vec![0.5, 0.5], true, loose).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        assert!(!sd.check_exact_dirichlet(&mut rng, 1e-10).unwrap());
        let exact = Subdomain::new(laplace(12), (1..11).collect(), vec![0, 11], vec![0.5, 0.5], true, DirichletSolver::Direct)
            .unwrap();
        assert!(exact.check_exact_dirichlet(&mut rng, 1e-10).unwrap());
    }

    #[test]
    fn non_finite_interior_solve_is_not_exact() {
        let mut t: Vec<(usize, usize, f64)> = (0..4).map(|i| (i, i, 2.0)).collect();
        t.push((1, 2, f64::NAN));
        let mat = CsrMatrix::from_triplets(4, 4, &t).unwrap();
        let iterative = DirichletSolver::Iterative { rtol: 1e-10, max_it: 20 };
        let sd = Subdomain::new(mat, vec![1, 2], vec![0, 3], vec![0.5, 0.5], true, iterative).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(matches!(sd.check_exact_dirichlet(&mut rng, 1e-10), Err(BddcError::SolveError(_))));
    }

    #[test]
    fn iterative_solver_handles_nonsymmetric_interior() {
        let mut t = Vec::new();
        for i in 0..7 {
            t.push((i, i, 3.0));
            if i + 1 < 7 {
                t.push((i, i + 1, -1.5));
                t.push((i + 1, i, -0.5));
            }
        }
        let mat = CsrMatrix::from_triplets(7, 7, &t).unwrap();
        let iterative = DirichletSolver::Iterative { rtol: 1e-13, max_it: 100 };
        let sd = Subdomain::new(mat, (1..6).collect(), vec![0, 6], vec![0.5, 0.5], false, iterative).unwrap();
        let x = vec![1.0, -2.0, 0.5, 3.0, -1.0];
        for transpose in [false, true] {
            let b = sd.mult_ii(&x, transpose);
            let y = sd.solve_interior(&b, transpose).unwrap();
            for (a, b) in x.iter().zip(&y) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
            }
        }
        let mut rng = StdRng::seed_from_u64(11);
        assert!(sd.check_exact_dirichlet(&mut rng, 1e-8).unwrap());
    }
}
