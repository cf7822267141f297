//! Matrix module: dense kernels, CSR storage and the matrix-in-pieces type.

pub mod dense;
pub mod is;
pub mod sparse;

pub use is::{LocalPiece, MatIs};
pub use sparse::{CsrMatrix, SparseMatrix};
