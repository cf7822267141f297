//! Preconditioners for linear solvers.
//!
//! This module defines the Preconditioner trait and the BDDC implementation.

use crate::core::wrappers::Transposed;
use crate::error::BddcError;

/// A preconditioner M ≈ A⁻¹.
pub trait Preconditioner<M, V> {
    /// Apply M⁻¹ to r, writing z = M⁻¹ r
    fn apply(&self, r: &V, z: &mut V) -> Result<(), BddcError>;
    /// Apply M⁻ᵀ to r.
    fn apply_transpose(&self, _r: &V, _z: &mut V) -> Result<(), BddcError> {
        Err(BddcError::Unsupported("transpose apply"))
    }
    /// Optionally: setup/factorize from A
    fn setup(&mut self, _a: &M) -> Result<(), BddcError> {
        Ok(())
    }
}

/// Runs `apply_transpose` of the wrapped preconditioner, for Krylov solves
/// with a [`Transposed`] operator.
pub struct TransposePc<'a, P>(pub &'a P);

impl<'a, M, V, P: Preconditioner<M, V>> Preconditioner<Transposed<'a, M>, V> for TransposePc<'_, P> {
    fn apply(&self, r: &V, z: &mut V) -> Result<(), BddcError> {
        self.0.apply_transpose(r, z)
    }

    fn apply_transpose(&self, r: &V, z: &mut V) -> Result<(), BddcError> {
        self.0.apply(r, z)
    }
}

pub mod bddc;
pub mod jacobi;

pub use bddc::Bddc;
pub use jacobi::Jacobi;
