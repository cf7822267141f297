//! Solver for the coarse problem of a level.
//!
//! The coarse operator is a `MatIs` over the global primal numbering with one
//! piece per fine rank. It is either assembled and factored densely (the
//! redundant direct solve) or merged onto fewer ranks and handed to another
//! BDDC level.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::BddcOptions;
use crate::context::{KspContext, PcType, SolverKind};
use crate::core::wrappers::Transposed;
use crate::error::BddcError;
use crate::matrix::MatIs;
use crate::parallel::LocalComm;
use crate::preconditioner::bddc::nullspace::project_out;
use crate::preconditioner::bddc::subassembly::{subassemble, subassembling_pattern, SubassemblyPattern};
use crate::preconditioner::bddc::Bddc;
use crate::preconditioner::{Preconditioner, TransposePc};
use crate::solver::{LinearSolver, LuSolver, PcgSolver};

/// How the coarse problem changed since the previous setup.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CoarseState {
    Uninitialized,
    /// Same primal numbering: the coarse solver structure is kept.
    SamePattern,
    DifferentPattern,
}

pub enum CoarseBackend {
    /// Dense LU of the assembled coarse matrix.
    Direct { lu: LuSolver },
    Multilevel {
        ksp: KspContext<f64>,
        /// Coarse operator merged onto the next level's ranks.
        merged: MatIs,
        pattern: SubassemblyPattern,
        pc: Box<Bddc>,
    },
}

pub struct CoarseSolver {
    pub backend: CoarseBackend,
    /// Coarse operator, one piece per rank of the level.
    pub matrix: MatIs,
    null_space: Vec<Vec<f64>>,
    pub eigen_estimates: Option<(f64, f64)>,
}

impl std::fmt::Debug for CoarseSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoarseSolver")
            .field("pc_type", &self.pc_type())
            .field("size", &self.matrix.n_global())
            .field("null_space", &self.null_space.len())
            .finish()
    }
}

/// Whether the coarse problem of `level` goes to another BDDC level.
pub fn use_multilevel(level: usize, active: usize, opts: &BddcOptions) -> bool {
    let ratio = opts.coarsening_ratio.max(1);
    level < opts.max_levels && active / ratio >= 2 && active.div_ceil(ratio) / ratio >= 2
}

/// The coarse solver seen as a preconditioner of the coarse operator.
struct CoarseSolverPc<'a>(&'a CoarseSolver);

impl Preconditioner<MatIs, Vec<f64>> for CoarseSolverPc<'_> {
    fn apply(&self, r: &Vec<f64>, z: &mut Vec<f64>) -> Result<(), BddcError> {
        *z = self.0.solve(r, false)?;
        Ok(())
    }

    fn apply_transpose(&self, r: &Vec<f64>, z: &mut Vec<f64>) -> Result<(), BddcError> {
        *z = self.0.solve(r, true)?;
        Ok(())
    }
}

impl CoarseSolver {
    /// Set up the coarse solver for `matrix` on the ranks of `comm`.
    ///
    /// With `SamePattern` and a `previous` solver, the merge pattern and the
    /// next level's preconditioner are kept and only refreshed numerically.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        comm: &LocalComm,
        matrix: MatIs,
        null_space: Vec<Vec<f64>>,
        opts: &BddcOptions,
        level: usize,
        symmetric: bool,
        state: CoarseState,
        previous: Option<CoarseSolver>,
    ) -> Result<Self, BddcError> {
        let active = matrix.active_ranks().len();
        let backend = if use_multilevel(level, active, opts) {
            let kept = match (state, previous.map(|p| p.backend)) {
                (CoarseState::SamePattern, Some(CoarseBackend::Multilevel { pattern, pc, .. })) => Some((pattern, pc)),
                _ => None,
            };
            let (pattern, mut pc) = match kept {
                Some(kept) => kept,
                None => {
                    let pattern = subassembling_pattern(comm, &matrix, opts.coarsening_ratio)?;
                    let sub = comm.split(&pattern.roots())?;
                    (pattern, Box::new(Bddc::with_level(opts.coarse_level(), sub, level + 1)))
                }
            };
            let (merged, _) = subassemble(comm, &matrix, &pattern)?;
            pc.set_null_space(null_space.clone())?;
            pc.setup(&merged)?;
            let ksp = KspContext::new(opts.coarse_ksp, 1e-10, 1000);
            log::debug!(
                "bddc level {level}: coarse problem of size {} on {} ranks goes to level {}",
                matrix.n_global(),
                pattern.n_groups(),
                level + 1
            );
            CoarseBackend::Multilevel { ksp, merged, pattern, pc }
        } else {
            let mut dense = matrix.assemble()?.to_dense();
            for q in &null_space {
                for j in 0..q.len() {
                    for i in 0..q.len() {
                        dense[(i, j)] += q[i] * q[j];
                    }
                }
            }
            let mut lu = LuSolver::new();
            lu.factor(&dense)?;
            if level < opts.max_levels {
                log::debug!("bddc level {level}: {active} active ranks, too few for another level");
            }
            CoarseBackend::Direct { lu }
        };
        let mut solver = Self { backend, matrix, null_space, eigen_estimates: None };
        if symmetric && (opts.dbg_level > 0 || opts.coarse_ksp != SolverKind::Preonly) {
            let (lo, hi) = solver.estimate_eigenvalues(level as u64)?;
            log::info!("bddc level {level}: coarse eigenvalue estimates [{lo:.6e}, {hi:.6e}]");
            solver.eigen_estimates = Some((lo, hi));
            if opts.coarse_estimates {
                if let CoarseBackend::Multilevel { ksp, .. } = &mut solver.backend {
                    if ksp.kind == SolverKind::Pcg {
                        ksp.set_eigen_bounds(lo, hi);
                    }
                }
            }
        }
        Ok(solver)
    }

    pub fn pc_type(&self) -> PcType {
        match self.backend {
            CoarseBackend::Direct { .. } => PcType::Redundant,
            CoarseBackend::Multilevel { .. } => PcType::Bddc,
        }
    }

    pub fn n_global(&self) -> usize {
        self.matrix.n_global()
    }

    pub fn null_space(&self) -> &[Vec<f64>] {
        &self.null_space
    }

    /// The next level, when the coarse problem recursed.
    pub fn next_level(&self) -> Option<&Bddc> {
        match &self.backend {
            CoarseBackend::Multilevel { pc, .. } => Some(pc.as_ref()),
            CoarseBackend::Direct { .. } => None,
        }
    }

    /// Solve the coarse problem (or its transpose) for `rhs`.
    pub fn solve(&self, rhs: &[f64], transpose: bool) -> Result<Vec<f64>, BddcError> {
        let mut b = rhs.to_vec();
        project_out(&self.null_space, &mut b);
        let mut x = vec![0.0; b.len()];
        match &self.backend {
            CoarseBackend::Direct { lu } => {
                if transpose {
                    lu.solve_transpose_cached(&b, &mut x)?;
                } else {
                    lu.solve_cached(&b, &mut x)?;
                }
            }
            CoarseBackend::Multilevel { ksp, merged, pc, .. } => {
                if transpose {
                    let op = Transposed(merged);
                    let tpc = TransposePc(pc.as_ref());
                    let tpc: &dyn Preconditioner<Transposed<'_, MatIs>, Vec<f64>> = &tpc;
                    ksp.solve(&op, Some(tpc), &b, &mut x)?;
                } else {
                    let pc: &dyn Preconditioner<MatIs, Vec<f64>> = pc.as_ref();
                    ksp.solve(merged, Some(pc), &b, &mut x)?;
                }
            }
        }
        project_out(&self.null_space, &mut x);
        Ok(x)
    }

    /// Extreme eigenvalues of the coarse operator preconditioned by the next
    /// level (or by the direct solve), from a CG run on a random right-hand side.
    pub fn estimate_eigenvalues(&self, seed: u64) -> Result<(f64, f64), BddcError> {
        let n = self.n_global();
        if n == 0 {
            return Ok((1.0, 1.0));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut b: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..=1.0)).collect();
        project_out(&self.null_space, &mut b);
        if b.iter().all(|v| v.abs() < f64::EPSILON) {
            return Ok((1.0, 1.0));
        }
        let mut x = vec![0.0; n];
        let mut pcg = PcgSolver::new(1e-12, n.max(10)).with_eigen_estimates(true);
        match &self.backend {
            CoarseBackend::Multilevel { merged, pc, .. } => {
                let pc: &dyn Preconditioner<MatIs, Vec<f64>> = pc.as_ref();
                pcg.solve(merged, Some(pc), &b, &mut x)?;
            }
            CoarseBackend::Direct { .. } => {
                let pc: &dyn Preconditioner<MatIs, Vec<f64>> = &CoarseSolverPc(self);
                pcg.solve(&self.matrix, Some(pc), &b, &mut x)?;
            }
        }
        pcg.eigen_estimates()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{CsrMatrix, LocalPiece};
    use approx::assert_abs_diff_eq;

    fn coarse_chain(k: usize) -> MatIs {
        let pieces = (0..k)
            .map(|r| {
                let t = [(0, 0, 1.0), (0, 1, -1.0), (1, 0, -1.0), (1, 1, 1.0)];
                LocalPiece::new(vec![r, r + 1], CsrMatrix::from_triplets(2, 2, &t).unwrap())
            })
            .collect();
        MatIs::new(k + 1, pieces).unwrap()
    }

    #[test]
    fn multilevel_needs_enough_ranks() {
        let opts = BddcOptions::default().with_coarsening_ratio(2).with_max_levels(3);
        assert!(use_multilevel(0, 16, &opts));
        // 4 ranks merge into 2, which cannot be halved again
        assert!(!use_multilevel(0, 4, &opts));
        assert!(!use_multilevel(0, 3, &opts));
        assert!(!use_multilevel(3, 16, &opts));
    }

    #[test]
    fn direct_solve_with_null_space() {
        // pure Neumann chain: constants are the kernel
        let comm = LocalComm::new(4);
        let n = 5;
        let q = vec![1.0 / (n as f64).sqrt(); n];
        let opts = BddcOptions::default().with_dbg_level(1);
        let coarse = CoarseSolver::build(
            &comm,
            coarse_chain(4),
            vec![q.clone()],
            &opts,
            0,
            true,
            CoarseState::Uninitialized,
            None,
        )
        .unwrap();
        assert_eq!(coarse.pc_type(), PcType::Redundant);
        let b = vec![1.0, 0.0, 0.0, 0.0, -1.0];
        let x = coarse.solve(&b, false).unwrap();
        let mut ax = vec![0.0; n];
        crate::core::traits::MatVec::matvec(&coarse.matrix, &x, &mut ax);
        for (a, b) in ax.iter().zip(&b) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        let mean: f64 = x.iter().sum();
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
        let (lo, hi) = coarse.eigen_estimates.unwrap();
        assert_abs_diff_eq!(lo, 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(hi, 1.0, epsilon = 1e-8);
    }
}
