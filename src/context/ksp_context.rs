//! Factory for Krylov Subspace Methods (KSP).
//!
//! This module provides the `KspContext` struct, which selects one of the Krylov
//! methods used around BDDC (and inside it, for multilevel coarse solves) and
//! runs it against an operator and an optional preconditioner.
//!
//! # Supported Solvers
//! - Preonly (a single preconditioner application), PCG, GMRES (right preconditioned)
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems. SIAM.
//! - PETSc documentation: https://petsc.org/release/docs/manualpages/KSP/

use crate::core::traits::{InnerProduct, MatVec};
use crate::error::BddcError;
use crate::preconditioner::Preconditioner;
use crate::solver::{GmresSolver, LinearSolver, PcgSolver};
use crate::utils::convergence::SolveStats;

/// Enum representing the available Krylov solver types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    /// Apply the preconditioner once (`KSPPREONLY`)
    Preonly,
    /// Preconditioned Conjugate Gradient (PCG)
    Pcg,
    /// GMRES with right preconditioning
    Gmres,
}

impl std::fmt::Display for SolverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SolverKind::Preonly => "preonly",
            SolverKind::Pcg => "cg",
            SolverKind::Gmres => "gmres",
        };
        f.write_str(name)
    }
}

/// Context and configuration for a Krylov subspace solver.
#[derive(Debug, Clone)]
pub struct KspContext<T> {
    /// The type of Krylov solver to use
    pub kind: SolverKind,
    /// Relative convergence tolerance
    pub tol: T,
    /// Maximum number of iterations
    pub max_it: usize,
    /// Restart parameter (for GMRES)
    pub restart: usize,
    /// Extreme eigenvalue estimates of the preconditioned operator, if known
    pub eigen_bounds: Option<(f64, f64)>,
}

impl<T> KspContext<T>
where
    T: num_traits::Float + From<f64>,
{
    pub fn new(kind: SolverKind, tol: T, max_it: usize) -> Self {
        Self { kind, tol, max_it, restart: 30, eigen_bounds: None }
    }

    /// Record eigenvalue estimates. For CG this caps the iteration count at
    /// the classical bound `sqrt(k)/2 * ln(2/tol)` for condition number `k`.
    pub fn set_eigen_bounds(&mut self, lo: f64, hi: f64) {
        self.eigen_bounds = Some((lo, hi));
        if self.kind == SolverKind::Pcg && lo > 0.0 && hi >= lo {
            let tol = self.tol.to_f64().unwrap_or(1e-8).max(f64::MIN_POSITIVE);
            let bound = ((hi / lo).sqrt() / 2.0 * (2.0 / tol).ln()).ceil() as usize + 1;
            self.max_it = self.max_it.min(bound.max(1));
        }
    }

    /// Solve the linear system `Ax = b` using the configured solver and preconditioner.
    ///
    /// # Returns
    /// * `Ok(SolveStats)` on success
    /// * `Err(BddcError)` on failure or breakdown
    pub fn solve<M, V>(
        &self,
        a: &M,
        pc: Option<&dyn Preconditioner<M, V>>,
        b: &V,
        x: &mut V,
    ) -> Result<SolveStats<T>, BddcError>
    where
        M: MatVec<V>,
        (): InnerProduct<V, Scalar = T>,
        V: AsMut<[T]> + AsRef<[T]> + From<Vec<T>> + Clone,
    {
        match self.kind {
            SolverKind::Preonly => {
                match pc {
                    Some(pc) => pc.apply(b, x)?,
                    None => x.clone_from(b),
                }
                Ok(SolveStats { iterations: 1, final_residual: T::zero(), converged: true })
            }
            SolverKind::Pcg => {
                let mut solver = PcgSolver::new(self.tol, self.max_it);
                solver.solve(a, pc, b, x)
            }
            SolverKind::Gmres => {
                let mut solver = GmresSolver::new(self.restart, self.tol, self.max_it);
                solver.solve(a, pc, b, x)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;

    #[test]
    fn preonly_without_pc_copies_rhs() {
        let ksp = KspContext::new(SolverKind::Preonly, 1e-8, 10);
        let a = Mat::<f64>::identity(2, 2);
        let mut x = vec![0.0; 2];
        ksp.solve(&a, None, &vec![3.0, 4.0], &mut x).unwrap();
        assert_eq!(x, vec![3.0, 4.0]);
    }

    #[test]
    fn eigen_bounds_cap_cg_iterations() {
        let mut ksp = KspContext::new(SolverKind::Pcg, 1e-8, 1000);
        ksp.set_eigen_bounds(1.0, 4.0);
        // sqrt(4)/2 * ln(2e8) = 19.1 -> 20 + 1
        assert_eq!(ksp.max_it, 21);
        assert_eq!(SolverKind::Pcg.to_string(), "cg");
    }
}
