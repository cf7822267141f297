//! Context module for solver and preconditioner selection.
//!
//! Modules:
//! - [`ksp_context`]: Contains the `KspContext` struct for Krylov subspace solver configuration.
//! - [`pc_context`]: Contains the preconditioner type tags.
//!
//! # References
//! - PETSc documentation: https://petsc.org/release/docs/manualpages/KSP/

pub mod ksp_context;
pub use ksp_context::{KspContext, SolverKind};
pub mod pc_context;
pub use pc_context::PcType;
