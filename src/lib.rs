//! kryst-bddc: Balancing Domain Decomposition by Constraints over Faer
//!
//! This crate provides a BDDC preconditioner for operators given as one local
//! (Neumann) matrix per subdomain, with vertex/edge/face primal constraints,
//! optional change of basis, nonsymmetric support and a multilevel coarse
//! solve, together with the Krylov methods and dense kernels it relies on.

pub mod parallel;

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod matrix;
pub mod preconditioner;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use config::{BddcOptions, ConstraintReduction, DirichletSolver, PrimalSelection};
pub use context::{KspContext, PcType, SolverKind};
pub use core::{Indexing, InnerProduct, MatTransVec, MatVec, Transposed};
pub use error::BddcError;
pub use matrix::{CsrMatrix, LocalPiece, MatIs, SparseMatrix};
pub use parallel::{Comm, LocalComm, ThreadComm, Wire};
#[cfg(feature = "mpi")]
pub use parallel::MpiComm;
pub use preconditioner::bddc::{CoarseState, Label, NearNullSpace};
pub use preconditioner::{Bddc, Jacobi, Preconditioner, TransposePc};
pub use solver::{DenseFactor, GmresSolver, LinearSolver, LuSolver, PcgSolver};

// Re-export SolveStats at the crate root for convenience
pub use utils::convergence::SolveStats;
