use thiserror::Error;

// Unified error type for the BDDC crate

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BddcError {
    #[error("factorization error: {0}")]
    FactorError(String),
    #[error("solve error: {0}")]
    SolveError(String),
    #[error("indefinite matrix detected (p^T A p <= 0)")]
    IndefiniteMatrix,
    #[error("indefinite preconditioner detected (beta < 0)")]
    IndefinitePreconditioner,
    #[error("zero pivot at row {0}")]
    ZeroPivot(usize),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("{what} {value} must be in [{lo},{hi})")]
    OutOfRange {
        what: &'static str,
        value: usize,
        lo: usize,
        hi: usize,
    },
    #[error("{what}: expected {expected} got {got}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("internal inconsistency: {0}")]
    Inconsistent(String),
    #[error("invalid option {key} = {value:?}")]
    InvalidOption { key: String, value: String },
    #[error("rank {0} left the collective early")]
    Aborted(usize),
    #[error("{0} called before setup")]
    Setup(&'static str),
}
