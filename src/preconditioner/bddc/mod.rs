//! Balancing Domain Decomposition by Constraints.
//!
//! The operator is given as a [`MatIs`]: one local (Neumann) matrix per rank.
//! Setup classifies the interface into vertices, edges and faces, derives the
//! primal constraints on them, factors the interior and the constrained
//! Neumann problems of every subdomain and assembles the coarse problem, which
//! is again a `MatIs` and is solved either directly or by another BDDC level.
//!
//! One application for a residual `r` is
//!
//! 1. `u_I = A_II^{-1} r_I` on every subdomain, and the condensed interface
//!    residual `g = r_B - sum A_BI u_I`;
//! 2. weighted restriction `w = D g`;
//! 3. coarse correction `Phi A_C^{-1} Psi^T w` plus the constrained Neumann
//!    correction of every subdomain;
//! 4. weighted averaging of the interface values and harmonic extension into
//!    the interior.
//!
//! The transposed application swaps `Phi` and `Psi` and uses transposed local
//! solves throughout.

pub mod coarse;
pub mod constraints;
pub mod correction;
pub mod graph;
pub mod label;
pub mod local;
pub mod nullspace;
pub mod numbering;
pub mod subassembly;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::BddcOptions;
use crate::context::PcType;
use crate::error::BddcError;
use crate::matrix::{dense, CsrMatrix, LocalPiece, MatIs, SparseMatrix};
use crate::parallel::LocalComm;
use crate::preconditioner::Preconditioner;

pub use coarse::{CoarseSolver, CoarseState};
pub use constraints::{build_constraints, ConstraintRecord, LocalConstraints, NearNullSpace};
pub use correction::{AuxMats, Correction};
pub use graph::{build_graphs, local_graph, local_sharers, Entity, EntityKind, InterfaceGraph};
pub use label::Label;
pub use local::Subdomain;
pub use numbering::{local_subset_numbering, subset_numbering, SubsetNumbering};
pub use subassembly::{subassemble, subassemble_local, subassembling_pattern, SubassemblyPattern};

/// Run `f` on every rank's item, in parallel with the `rayon` feature.
pub(crate) fn try_map_ranks<T, R, F>(items: &[T], f: F) -> Result<Vec<R>, BddcError>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> Result<R, BddcError> + Sync + Send,
{
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        items.par_iter().enumerate().map(|(r, t)| f(r, t)).collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        items.iter().enumerate().map(|(r, t)| f(r, t)).collect()
    }
}

/// [`try_map_ranks`] consuming the items.
pub(crate) fn try_map_ranks_owned<T, R, F>(items: Vec<T>, f: F) -> Result<Vec<R>, BddcError>
where
    T: Send,
    R: Send,
    F: Fn(usize, T) -> Result<R, BddcError> + Sync + Send,
{
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        items.into_par_iter().enumerate().map(|(r, t)| f(r, t)).collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        items.into_iter().enumerate().map(|(r, t)| f(r, t)).collect()
    }
}

/// Everything computed by [`Bddc::setup`].
#[derive(Debug)]
struct BddcState {
    is: MatIs,
    symmetric: bool,
    graphs: Vec<InterfaceGraph>,
    constraints: Vec<LocalConstraints>,
    subdomains: Vec<Subdomain>,
    corrections: Vec<Correction>,
    /// Local dofs of entities with a change of basis.
    changed: Vec<Vec<usize>>,
    /// Global coarse index of every local primal dof.
    primal_global: Vec<Vec<usize>>,
    coarse: CoarseSolver,
    use_exact_dirichlet: bool,
}

/// BDDC preconditioner for operators in [`MatIs`] form.
///
/// ```no_run
/// # use kryst_bddc::{Bddc, BddcOptions, LocalComm, MatIs};
/// # fn run(a: &MatIs, r: &Vec<f64>) -> Result<(), kryst_bddc::BddcError> {
/// use kryst_bddc::Preconditioner;
/// let mut pc = Bddc::new(BddcOptions::default(), LocalComm::new(a.n_ranks()));
/// pc.setup(a)?;
/// let mut z = vec![0.0; r.len()];
/// pc.apply(r, &mut z)?;
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct Bddc {
    opts: BddcOptions,
    level: usize,
    comm: LocalComm,
    near_null: Option<NearNullSpace>,
    null_space: Vec<Vec<f64>>,
    state: Option<BddcState>,
    coarse_state: CoarseState,
}

impl Bddc {
    pub fn new(opts: BddcOptions, comm: LocalComm) -> Self {
        Self::with_level(opts, comm, 0)
    }

    pub(crate) fn with_level(opts: BddcOptions, comm: LocalComm, level: usize) -> Self {
        Self {
            opts,
            level,
            comm,
            near_null: None,
            null_space: Vec::new(),
            state: None,
            coarse_state: CoarseState::Uninitialized,
        }
    }

    /// Vectors whose interface restrictions should be preserved by the coarse space.
    pub fn set_near_null_space(&mut self, near_null: NearNullSpace) {
        self.near_null = Some(near_null);
    }

    /// Exact null space of the operator; the preconditioned residual is kept
    /// orthogonal to it and the coarse problem is regularized with its image.
    pub fn set_null_space(&mut self, vectors: Vec<Vec<f64>>) -> Result<(), BddcError> {
        if let Some(first) = vectors.first() {
            if let Some(v) = vectors.iter().find(|v| v.len() != first.len()) {
                return Err(BddcError::SizeMismatch { what: "null space vector", expected: first.len(), got: v.len() });
            }
        }
        self.null_space = nullspace::orthonormalize(&vectors);
        Ok(())
    }

    pub fn options(&self) -> &BddcOptions {
        &self.opts
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Build (or refresh) the preconditioner for `is`.
    ///
    /// With the same local-to-global maps as in the previous call the
    /// interface graph is reused, and with the same primal numbering the
    /// coarse solver keeps its structure.
    pub fn setup(&mut self, is: &MatIs) -> Result<(), BddcError> {
        let size = self.comm.size();
        if is.n_ranks() != size {
            return Err(BddcError::SizeMismatch { what: "pieces per rank", expected: size, got: is.n_ranks() });
        }
        if let Some(v) = self.null_space.iter().find(|v| v.len() != is.n_global()) {
            return Err(BddcError::SizeMismatch { what: "null space vector", expected: is.n_global(), got: v.len() });
        }
        let level = self.level;
        let symmetric = match self.opts.symmetric {
            Some(s) => s,
            None => is.pieces().iter().all(|p| p.mat.is_symmetric(self.opts.sym_tol)),
        };

        let previous = self.state.take();
        let same_layout = previous.as_ref().is_some_and(|s| {
            s.is.n_global() == is.n_global()
                && s.is.pieces().iter().zip(is.pieces()).all(|(a, b)| a.l2g == b.l2g && a.mat.nnz() == b.mat.nnz())
        });
        let (graphs, previous) = match previous {
            Some(s) if same_layout => {
                log::debug!("bddc level {level}: reusing the interface graph");
                let BddcState { graphs, corrections, coarse, primal_global, .. } = s;
                (graphs, Some((corrections, coarse, primal_global)))
            }
            Some(s) => (graph::build_graphs(&self.comm, is, self.opts.dim)?, Some((s.corrections, s.coarse, s.primal_global))),
            None => (graph::build_graphs(&self.comm, is, self.opts.dim)?, None),
        };

        let constraints = build_constraints(&self.comm, &graphs, is, self.near_null.as_ref(), &self.opts)?;

        // local matrices in the working basis
        let working: Vec<CsrMatrix> = try_map_ranks(&constraints, |r, lc| {
            let a = &is.piece(r).mat;
            Ok(match &lc.change_of_basis {
                Some(t) => {
                    let td = t.to_dense();
                    let ta = &dense::transpose(&td) * &a.to_dense();
                    CsrMatrix::from_dense(&(&ta * &td))
                }
                None => a.clone(),
            })
        })?;
        let weights = self.interface_weights(is, &graphs, &working);

        let inputs: Vec<(CsrMatrix, Vec<f64>)> = working.into_iter().zip(weights).collect();
        let dirichlet = self.opts.dirichlet;
        let subdomains = try_map_ranks_owned(inputs, |r, (mat, w)| {
            Subdomain::new(mat, graphs[r].interior.clone(), graphs[r].boundary.clone(), w, symmetric, dirichlet)
        })?;

        let tol = self.opts.exact_dirichlet_tol;
        let exact: Vec<bool> = try_map_ranks(&subdomains, |r, sd| {
            let mut rng = StdRng::seed_from_u64((level * size + r) as u64);
            sd.check_exact_dirichlet(&mut rng, tol)
        })?;
        let use_exact_dirichlet = exact.iter().all(|&e| e);
        if !use_exact_dirichlet {
            log::info!("bddc level {level}: inexact interior solves, using the static switch");
        }

        let (prev_corrections, prev_coarse, prev_primal) = match previous {
            Some((c, coarse, p)) => (c, Some(coarse), Some(p)),
            None => (Vec::new(), None, None),
        };
        let mut reuse: Vec<Option<AuxMats>> = prev_corrections.into_iter().map(|c| Some(c.into_aux())).collect();
        reuse.resize(size, None);
        let corrections = try_map_ranks_owned(reuse, |r, aux| {
            Correction::new(&subdomains[r], &constraints[r], symmetric, aux)
        })?;

        if self.opts.dbg_level > 0 {
            for (r, (c, sd)) in corrections.iter().zip(&subdomains).enumerate() {
                let n_p = c.n_primal();
                let scale = dense::inf_norm(&dense::from_column_major(n_p, n_p, &c.coarse_submat_vals)).max(f64::MIN_POSITIVE);
                let err = c.check_coarse_matrix(sd) / scale;
                if err > 1e-8 {
                    log::warn!("bddc level {level}: rank {r} local coarse matrix off by {err:.3e}");
                } else {
                    log::debug!("bddc level {level}: rank {r} local coarse matrix ok ({err:.3e})");
                }
            }
        }

        // global primal numbering
        let keys: Vec<Vec<usize>> = constraints.iter().map(LocalConstraints::primal_keys).collect();
        let local_max: Vec<usize> = keys.iter().map(|k| k.iter().max().map_or(0, |&m| m + 1)).collect();
        let key_space = self.comm.all_reduce_max(&local_max)?;
        let numbering = subset_numbering(&self.comm, &keys, key_space, 0)?;
        let coarse_state = match prev_primal {
            Some(p) if p == numbering.indices => CoarseState::SamePattern,
            _ => CoarseState::DifferentPattern,
        };

        let pieces = corrections
            .iter()
            .zip(&numbering.indices)
            .map(|(c, g)| {
                let n_p = c.n_primal();
                let vals = dense::from_column_major(n_p, n_p, &c.coarse_submat_vals);
                LocalPiece::new(g.clone(), CsrMatrix::from_dense(&vals))
            })
            .collect();
        let coarse_is = MatIs::new(numbering.n_global, pieces)?;
        let coarse_null = if self.null_space.is_empty() {
            Vec::new()
        } else {
            nullspace::coarse_null_space(&constraints, is, &numbering.indices, numbering.n_global, &self.null_space)
        };
        let coarse = CoarseSolver::build(
            &self.comm,
            coarse_is,
            coarse_null,
            &self.opts,
            level,
            symmetric,
            coarse_state,
            prev_coarse,
        )?;

        let changed = constraints
            .iter()
            .zip(&graphs)
            .map(|(lc, g)| {
                let mut dofs: Vec<usize> = lc
                    .records
                    .iter()
                    .filter(|r| r.change_of_basis)
                    .flat_map(|r| g.entities[r.entity].dofs.iter().copied())
                    .collect();
                dofs.sort_unstable();
                dofs.dedup();
                dofs
            })
            .collect();

        log::debug!(
            "bddc level {level}: {} ranks, {} vertices, {} edges, {} faces, coarse size {} ({:?})",
            size,
            graphs.iter().map(|g| g.count(EntityKind::Vertex)).sum::<usize>(),
            graphs.iter().map(|g| g.count(EntityKind::Edge)).sum::<usize>(),
            graphs.iter().map(|g| g.count(EntityKind::Face)).sum::<usize>(),
            numbering.n_global,
            coarse.pc_type(),
        );

        self.coarse_state = coarse_state;
        self.state = Some(BddcState {
            is: is.clone(),
            symmetric,
            graphs,
            constraints,
            subdomains,
            corrections,
            changed,
            primal_global: numbering.indices,
            coarse,
            use_exact_dirichlet,
        });
        Ok(())
    }

    /// Partition of unity on the interface of every rank.
    fn interface_weights(&self, is: &MatIs, graphs: &[InterfaceGraph], working: &[CsrMatrix]) -> Vec<Vec<f64>> {
        let multiplicity = |g: &InterfaceGraph, i: usize| 1.0 / g.sharers[i].len().max(1) as f64;
        if !self.opts.stiffness_scaling {
            return graphs.iter().map(|g| g.boundary.iter().map(|&i| multiplicity(g, i)).collect()).collect();
        }
        let diags: Vec<Vec<f64>> = working.iter().map(|m| m.diagonal().iter().map(|d| d.abs()).collect()).collect();
        let mut total = vec![0.0; is.n_global()];
        is.gather_add(&diags, &mut total);
        graphs
            .iter()
            .zip(&diags)
            .zip(is.pieces())
            .map(|((g, d), piece)| {
                g.boundary
                    .iter()
                    .map(|&i| {
                        let t = total[piece.l2g[i]];
                        if t > 0.0 { d[i] / t } else { multiplicity(g, i) }
                    })
                    .collect()
            })
            .collect()
    }

    fn state(&self, what: &'static str) -> Result<&BddcState, BddcError> {
        self.state.as_ref().ok_or(BddcError::Setup(what))
    }

    /// `T x` (or `T^T x`) for the global change of basis.
    fn change_basis(st: &BddcState, x: &[f64], transpose: bool) -> Vec<f64> {
        let mut out = x.to_vec();
        for ((lc, piece), changed) in st.constraints.iter().zip(st.is.pieces()).zip(&st.changed) {
            let Some(t) = &lc.change_of_basis else {
                continue;
            };
            let local: Vec<f64> = piece.l2g.iter().map(|&g| x[g]).collect();
            let mut y = vec![0.0; local.len()];
            if transpose {
                t.spmv_transpose(&local, &mut y);
            } else {
                t.spmv(&local, &mut y);
            }
            for &i in changed {
                out[piece.l2g[i]] = y[i];
            }
        }
        out
    }

    fn apply_impl(&self, r: &[f64], transpose: bool) -> Result<Vec<f64>, BddcError> {
        let st = self.state("Bddc::apply")?;
        let n = st.is.n_global();
        if r.len() != n {
            return Err(BddcError::SizeMismatch { what: "residual length", expected: n, got: r.len() });
        }
        let exact = st.use_exact_dirichlet;
        let rt = Self::change_basis(st, r, true);
        let locals = st.is.scatter_to_local(&rt);

        // interior solves
        let first: Vec<(Vec<f64>, Vec<f64>, Vec<f64>)> = try_map_ranks(&st.subdomains, |k, sd| {
            let r_i = sd.restrict_interior(&locals[k]);
            let u_i = sd.solve_interior(&r_i, transpose)?;
            let res_i = if exact {
                Vec::new()
            } else {
                let au = sd.mult_ii(&u_i, transpose);
                r_i.iter().zip(&au).map(|(a, b)| a - b).collect()
            };
            let mut s = vec![0.0; sd.n];
            for (&i, v) in sd.boundary.iter().zip(sd.mult_bi(&u_i, transpose)) {
                s[i] = -v;
            }
            Ok((u_i, res_i, s))
        })?;
        let s_locals: Vec<Vec<f64>> = first.iter().map(|f| f.2.clone()).collect();
        let mut g = vec![0.0; n];
        st.is.gather_add(&s_locals, &mut g);
        g.iter_mut().zip(&rt).for_each(|(gi, ri)| *gi += ri);
        let g_locals = st.is.scatter_to_local(&g);

        let weighted: Vec<Vec<f64>> = st
            .subdomains
            .iter()
            .zip(&g_locals)
            .map(|(sd, gl)| sd.boundary.iter().zip(&sd.weights).map(|(&i, w)| w * gl[i]).collect())
            .collect();

        // coarse problem
        let mut coarse_rhs = vec![0.0; st.coarse.n_global()];
        for (k, globals) in st.primal_global.iter().enumerate() {
            let (rb, rd) = st.corrections[k].restriction(transpose);
            let w_b = &weighted[k];
            let res_i = &first[k].1;
            for (j, &gidx) in globals.iter().enumerate() {
                let mut v = (0..rb.nrows()).map(|i| rb[(i, j)] * w_b[i]).sum::<f64>();
                if !exact {
                    v += (0..rd.nrows()).map(|i| rd[(i, j)] * res_i[i]).sum::<f64>();
                }
                coarse_rhs[gidx] += v;
            }
        }
        let u_c = st.coarse.solve(&coarse_rhs, transpose)?;

        // constrained Neumann corrections plus coarse interpolation
        let corrected: Vec<(Vec<f64>, Vec<f64>)> = try_map_ranks(&st.subdomains, |k, sd| {
            let mut rhs = vec![0.0; sd.n];
            for (&i, &v) in sd.boundary.iter().zip(&weighted[k]) {
                rhs[i] = v;
            }
            if !exact {
                for (&i, &v) in sd.interior.iter().zip(&first[k].1) {
                    rhs[i] = v;
                }
            }
            let corr = &st.corrections[k];
            let v = corr.apply(&rhs, transpose);
            let (pb, pd) = corr.interpolation(transpose);
            let uc: Vec<f64> = st.primal_global[k].iter().map(|&gidx| u_c[gidx]).collect();
            let interp = |m: &faer::Mat<f64>, row: usize| (0..uc.len()).map(|j| m[(row, j)] * uc[j]).sum::<f64>();
            let v_b = sd.boundary.iter().enumerate().map(|(row, &i)| v[i] + interp(pb, row)).collect();
            let v_d = if exact {
                Vec::new()
            } else {
                sd.interior.iter().enumerate().map(|(row, &i)| v[i] + interp(pd, row)).collect()
            };
            Ok((v_b, v_d))
        })?;

        // weighted average on the interface
        let zb_locals: Vec<Vec<f64>> = st
            .subdomains
            .iter()
            .zip(&corrected)
            .map(|(sd, (v_b, _))| {
                let mut out = vec![0.0; sd.n];
                for ((&i, w), v) in sd.boundary.iter().zip(&sd.weights).zip(v_b) {
                    out[i] = w * v;
                }
                out
            })
            .collect();
        let mut z = vec![0.0; n];
        st.is.gather_add(&zb_locals, &mut z);
        let z_locals = st.is.scatter_to_local(&z);

        // interior extension
        let interiors: Vec<Vec<f64>> = try_map_ranks(&st.subdomains, |k, sd| {
            let z_b = sd.restrict_boundary(&z_locals[k]);
            let mut rhs = sd.mult_ib(&z_b, transpose);
            let v_d = &corrected[k].1;
            if !exact {
                let av = sd.mult_ii(v_d, transpose);
                rhs.iter_mut().zip(&av).for_each(|(a, b)| *a += b);
            }
            let w = sd.solve_interior(&rhs, transpose)?;
            let u_i = &first[k].0;
            Ok((0..u_i.len())
                .map(|i| if exact { u_i[i] - w[i] } else { u_i[i] + v_d[i] - w[i] })
                .collect())
        })?;
        for ((piece, sd), z_i) in st.is.pieces().iter().zip(&st.subdomains).zip(&interiors) {
            for (&i, &v) in sd.interior.iter().zip(z_i) {
                z[piece.l2g[i]] = v;
            }
        }

        let mut z = Self::change_basis(st, &z, false);
        nullspace::project_out(&self.null_space, &mut z);
        Ok(z)
    }

    /// Type of the coarse solver (`Redundant` or `Bddc`).
    pub fn coarse_pc_type(&self) -> Option<PcType> {
        self.state.as_ref().map(|s| s.coarse.pc_type())
    }

    /// Size of the coarse problem.
    pub fn n_primal(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.coarse.n_global())
    }

    /// Local primal dofs of every rank.
    pub fn primal_counts(&self) -> Vec<usize> {
        self.state
            .as_ref()
            .map(|s| s.constraints.iter().map(LocalConstraints::n_primal).collect())
            .unwrap_or_default()
    }

    pub fn coarse_state(&self) -> CoarseState {
        self.coarse_state
    }

    /// Whether the interior solves were found exact in the last setup.
    pub fn use_exact_dirichlet(&self) -> Option<bool> {
        self.state.as_ref().map(|s| s.use_exact_dirichlet)
    }

    pub fn is_symmetric(&self) -> Option<bool> {
        self.state.as_ref().map(|s| s.symmetric)
    }

    pub fn coarse_eigen_estimates(&self) -> Option<(f64, f64)> {
        self.state.as_ref().and_then(|s| s.coarse.eigen_estimates)
    }

    pub fn coarse_solver(&self) -> Option<&CoarseSolver> {
        self.state.as_ref().map(|s| &s.coarse)
    }

    /// Preconditioner of the next level, if the coarse problem recursed.
    pub fn coarse_bddc(&self) -> Option<&Bddc> {
        self.state.as_ref().and_then(|s| s.coarse.next_level())
    }

    pub fn interface_graph(&self, rank: usize) -> Option<&InterfaceGraph> {
        self.state.as_ref().and_then(|s| s.graphs.get(rank))
    }

    pub fn local_constraints(&self, rank: usize) -> Option<&LocalConstraints> {
        self.state.as_ref().and_then(|s| s.constraints.get(rank))
    }

    pub fn correction(&self, rank: usize) -> Option<&Correction> {
        self.state.as_ref().and_then(|s| s.corrections.get(rank))
    }

    /// `|| Psi^T A Phi - A_C ||_inf` of every rank's local coarse matrix.
    pub fn check_coarse_matrices(&self) -> Result<Vec<f64>, BddcError> {
        let st = self.state("Bddc::check_coarse_matrices")?;
        Ok(st.corrections.iter().zip(&st.subdomains).map(|(c, sd)| c.check_coarse_matrix(sd)).collect())
    }
}

impl Preconditioner<MatIs, Vec<f64>> for Bddc {
    fn apply(&self, r: &Vec<f64>, z: &mut Vec<f64>) -> Result<(), BddcError> {
        *z = self.apply_impl(r, false)?;
        Ok(())
    }

    fn apply_transpose(&self, r: &Vec<f64>, z: &mut Vec<f64>) -> Result<(), BddcError> {
        *z = self.apply_impl(r, true)?;
        Ok(())
    }

    fn setup(&mut self, a: &MatIs) -> Result<(), BddcError> {
        Bddc::setup(self, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::MatVec;
    use approx::assert_abs_diff_eq;

    /// Two pieces of a 1D Laplacian (Dirichlet ends eliminated) sharing global dof 2.
    fn two_pieces() -> MatIs {
        let left = [(0, 0, 2.0), (0, 1, -1.0), (1, 0, -1.0), (1, 1, 2.0), (1, 2, -1.0), (2, 1, -1.0), (2, 2, 1.0)];
        let right = [(0, 0, 1.0), (0, 1, -1.0), (1, 0, -1.0), (1, 1, 2.0), (1, 2, -1.0), (2, 1, -1.0), (2, 2, 2.0)];
        MatIs::new(
            5,
            vec![
                LocalPiece::new(vec![0, 1, 2], CsrMatrix::from_triplets(3, 3, &left).unwrap()),
                LocalPiece::new(vec![2, 3, 4], CsrMatrix::from_triplets(3, 3, &right).unwrap()),
            ],
        )
        .unwrap()
    }

    #[test]
    fn apply_before_setup_fails() {
        let pc = Bddc::new(BddcOptions::default(), LocalComm::new(2));
        let mut z = vec![0.0; 5];
        assert_eq!(pc.apply(&vec![1.0; 5], &mut z), Err(BddcError::Setup("Bddc::apply")));
    }

    #[test]
    fn fully_primal_interface_is_exact() {
        let is = two_pieces();
        let mut pc = Bddc::new(BddcOptions::default(), LocalComm::new(2));
        pc.setup(&is).unwrap();
        assert_eq!(pc.n_primal(), 1);
        assert_eq!(pc.coarse_pc_type(), Some(PcType::Redundant));
        assert_eq!(pc.use_exact_dirichlet(), Some(true));
        let r = vec![1.0, -2.0, 0.5, 3.0, 1.0];
        for transpose in [false, true] {
            let mut z = vec![0.0; 5];
            if transpose {
                pc.apply_transpose(&r, &mut z).unwrap();
            } else {
                pc.apply(&r, &mut z).unwrap();
            }
            let mut az = vec![0.0; 5];
            is.matvec(&z, &mut az);
            for (a, b) in az.iter().zip(&r) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn wrong_rank_count_is_rejected() {
        let mut pc = Bddc::new(BddcOptions::default(), LocalComm::new(3));
        let err = pc.setup(&two_pieces()).unwrap_err();
        assert!(matches!(err, BddcError::SizeMismatch { what: "pieces per rank", .. }));
    }
}
