//! Core traits and their implementations for Faer matrices and vectors.

pub mod traits;
pub mod wrappers;

pub use traits::{Indexing, InnerProduct, MatTransVec, MatVec};
pub use wrappers::Transposed;
