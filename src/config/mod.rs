//! Configuration of the preconditioner.

pub mod options;
pub use options::{BddcOptions, ConstraintReduction, DirichletSolver, PrimalSelection};
