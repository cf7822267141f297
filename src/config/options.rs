//! Command-line or API options for the BDDC preconditioner.
//!
//! This module provides the `BddcOptions` struct, which collects every knob of
//! the preconditioner: which interface entities become primal, how redundant
//! constraints are reduced, whether a change of basis is used, how the coarse
//! problem is solved and how deep the multilevel hierarchy may go. Options can
//! be set through the builder methods or parsed from PETSc-style
//! `-pc_bddc_*` key/value pairs with [`BddcOptions::from_args`].

use bitflags::bitflags;

use crate::context::ksp_context::SolverKind;
use crate::error::BddcError;

bitflags! {
    /// Interface entities that contribute primal constraints.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct PrimalSelection: u32 {
        const VERTICES = 0b001;
        const EDGES    = 0b010;
        const FACES    = 0b100;
    }
}

/// How redundant constraints on one entity are reduced.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConstraintReduction {
    /// Singular value decomposition of the constraint block.
    Svd,
    /// Eigendecomposition of the Gram ("correlation") matrix.
    Pod,
}

/// Local solver used for the interior (Dirichlet) problems.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DirichletSolver {
    /// Dense LU / Cholesky factorization.
    Direct,
    /// Jacobi-preconditioned Krylov solve up to a relative tolerance: CG on
    /// symmetric subdomains, restarted GMRES otherwise.
    Iterative { rtol: f64, max_it: usize },
}

/// BDDC types & parameters.
#[derive(Debug, Clone)]
pub struct BddcOptions {
    /// Entities used as primal candidates.
    pub primal: PrimalSelection,
    /// Transform edge (and optionally face) dofs so that primal averages become dofs.
    pub use_change_of_basis: bool,
    /// Also change basis on faces.
    pub use_change_on_faces: bool,
    /// Number of subdomains merged into one coarse subdomain.
    pub coarsening_ratio: usize,
    /// Maximum number of additional BDDC levels (0 = two-level method).
    pub max_levels: usize,
    /// Verbosity of the internal self-checks (0 = off).
    pub dbg_level: usize,
    /// Force the symmetric / nonsymmetric path; `None` detects it.
    pub symmetric: Option<bool>,
    /// Relative tolerance of the symmetry detection.
    pub sym_tol: f64,
    /// Rank reduction strategy for redundant constraints.
    pub constraint_reduction: ConstraintReduction,
    /// Relative singular value threshold for the rank reduction.
    pub svd_tol: f64,
    /// Use diag(A) based partition of unity instead of multiplicity.
    pub stiffness_scaling: bool,
    /// Spatial dimension used for the entity classification.
    pub dim: usize,
    /// Interior solver.
    pub dirichlet: DirichletSolver,
    /// Krylov method wrapped around a multilevel coarse preconditioner.
    pub coarse_ksp: SolverKind,
    /// Feed estimated extreme eigenvalues back into the coarse solver.
    pub coarse_estimates: bool,
    /// Tolerance of the exactness check for the Dirichlet solver.
    pub exact_dirichlet_tol: f64,
}

impl Default for BddcOptions {
    fn default() -> Self {
        Self {
            primal: PrimalSelection::VERTICES | PrimalSelection::EDGES,
            use_change_of_basis: false,
            use_change_on_faces: false,
            coarsening_ratio: 8,
            max_levels: 0,
            dbg_level: 0,
            symmetric: None,
            sym_tol: 1e-4,
            constraint_reduction: ConstraintReduction::Svd,
            svd_tol: 1e-8,
            stiffness_scaling: false,
            dim: 2,
            dirichlet: DirichletSolver::Direct,
            coarse_ksp: SolverKind::Preonly,
            coarse_estimates: false,
            exact_dirichlet_tol: 1e-10,
        }
    }
}

impl BddcOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_primal(mut self, primal: PrimalSelection) -> Self {
        self.primal = primal;
        self
    }
    pub fn with_change_of_basis(mut self, flag: bool) -> Self {
        self.use_change_of_basis = flag;
        self
    }
    pub fn with_coarsening_ratio(mut self, ratio: usize) -> Self {
        self.coarsening_ratio = ratio.max(1);
        self
    }
    pub fn with_max_levels(mut self, levels: usize) -> Self {
        self.max_levels = levels;
        self
    }
    pub fn with_dbg_level(mut self, level: usize) -> Self {
        self.dbg_level = level;
        self
    }
    pub fn with_symmetric(mut self, symmetric: bool) -> Self {
        self.symmetric = Some(symmetric);
        self
    }
    pub fn with_constraint_reduction(mut self, reduction: ConstraintReduction) -> Self {
        self.constraint_reduction = reduction;
        self
    }
    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = dim;
        self
    }
    pub fn with_dirichlet(mut self, dirichlet: DirichletSolver) -> Self {
        self.dirichlet = dirichlet;
        self
    }
    pub fn with_stiffness_scaling(mut self, flag: bool) -> Self {
        self.stiffness_scaling = flag;
        self
    }
    pub fn with_coarse_ksp(mut self, kind: SolverKind) -> Self {
        self.coarse_ksp = kind;
        self
    }

    /// Options for the next coarser level: same knobs, change of basis off.
    pub(crate) fn coarse_level(&self) -> Self {
        let mut opts = self.clone();
        opts.use_change_of_basis = false;
        opts.use_change_on_faces = false;
        opts
    }

    /// Parse PETSc-style `-pc_bddc_<name> <value>` pairs on top of the defaults.
    ///
    /// Boolean keys accept an explicit `true`/`false`/`1`/`0` value or stand
    /// alone (meaning `true`). Keys without the `-pc_bddc_` prefix are ignored
    /// so the same argument list can carry options of other components.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self, BddcError> {
        let mut opts = Self::default();
        let mut i = 0;
        while i < args.len() {
            let key = args[i].as_ref();
            let Some(name) = key.strip_prefix("-pc_bddc_") else {
                i += 1;
                continue;
            };
            let value = args
                .get(i + 1)
                .map(|v| v.as_ref())
                .filter(|v| !v.starts_with('-'));
            let consumed = opts.set(name, value).map_err(|_| BddcError::InvalidOption {
                key: key.to_string(),
                value: value.unwrap_or("").to_string(),
            })?;
            i += if consumed { 2 } else { 1 };
        }
        Ok(opts)
    }

    /// Returns whether `value` was consumed.
    fn set(&mut self, name: &str, value: Option<&str>) -> Result<bool, ()> {
        match name {
            "use_vertices" => self.set_primal(PrimalSelection::VERTICES, value),
            "use_edges" => self.set_primal(PrimalSelection::EDGES, value),
            "use_faces" => self.set_primal(PrimalSelection::FACES, value),
            "use_change_of_basis" => flag(value).map(|(f, c)| {
                self.use_change_of_basis = f;
                c
            }),
            "use_change_on_faces" => flag(value).map(|(f, c)| {
                self.use_change_on_faces = f;
                c
            }),
            "use_pod" => flag(value).map(|(f, c)| {
                self.constraint_reduction = if f { ConstraintReduction::Pod } else { ConstraintReduction::Svd };
                c
            }),
            "stiffness_scaling" => flag(value).map(|(f, c)| {
                self.stiffness_scaling = f;
                c
            }),
            "coarse_estimates" => flag(value).map(|(f, c)| {
                self.coarse_estimates = f;
                c
            }),
            "symmetric" => flag(value).map(|(f, c)| {
                self.symmetric = Some(f);
                c
            }),
            "coarsening_ratio" => {
                let ratio: usize = parse(value)?;
                if ratio == 0 {
                    return Err(());
                }
                self.coarsening_ratio = ratio;
                Ok(true)
            }
            "levels" => {
                self.max_levels = parse(value)?;
                Ok(true)
            }
            "check_level" => {
                self.dbg_level = parse(value)?;
                Ok(true)
            }
            "dim" => {
                let dim: usize = parse(value)?;
                if !(1..=3).contains(&dim) {
                    return Err(());
                }
                self.dim = dim;
                Ok(true)
            }
            "svd_tol" => {
                self.svd_tol = parse(value)?;
                Ok(true)
            }
            "sym_tol" => {
                self.sym_tol = parse(value)?;
                Ok(true)
            }
            "dirichlet_rtol" => {
                let rtol: f64 = parse(value)?;
                self.dirichlet = DirichletSolver::Iterative { rtol, max_it: 1000 };
                Ok(true)
            }
            "coarse_ksp_type" => {
                self.coarse_ksp = match value {
                    Some("preonly") => SolverKind::Preonly,
                    Some("cg") => SolverKind::Pcg,
                    Some("gmres") => SolverKind::Gmres,
                    _ => return Err(()),
                };
                Ok(true)
            }
            _ => Err(()),
        }
    }

    fn set_primal(&mut self, which: PrimalSelection, value: Option<&str>) -> Result<bool, ()> {
        let (on, consumed) = flag(value)?;
        self.primal.set(which, on);
        Ok(consumed)
    }
}

fn flag(value: Option<&str>) -> Result<(bool, bool), ()> {
    match value {
        None => Ok((true, false)),
        Some("true") | Some("1") | Some("yes") => Ok((true, true)),
        Some("false") | Some("0") | Some("no") => Ok((false, true)),
        Some(_) => Err(()),
    }
}

fn parse<T: std::str::FromStr>(value: Option<&str>) -> Result<T, ()> {
    value.ok_or(())?.parse().map_err(|_| ())
}
