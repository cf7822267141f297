// Jacobi preconditioner implementation

use crate::error::BddcError;
use crate::matrix::CsrMatrix;
use crate::preconditioner::Preconditioner;

/// Jacobi preconditioner: M⁻¹ = D⁻¹
#[derive(Clone, Debug, Default)]
pub struct Jacobi {
    pub(crate) inv_diag: Vec<f64>,
}

impl Jacobi {
    /// new with empty state; user must call `setup`.
    pub fn new() -> Self {
        Self { inv_diag: Vec::new() }
    }

    pub fn from_diagonal(diag: &[f64]) -> Self {
        let inv_diag = diag
            .iter()
            .map(|&d| if d != 0.0 { 1.0 / d } else { 0.0 })
            .collect();
        Self { inv_diag }
    }
}

impl Preconditioner<CsrMatrix, Vec<f64>> for Jacobi {
    fn setup(&mut self, a: &CsrMatrix) -> Result<(), BddcError> {
        *self = Self::from_diagonal(&a.diagonal());
        Ok(())
    }

    fn apply(&self, x: &Vec<f64>, y: &mut Vec<f64>) -> Result<(), BddcError> {
        if x.len() != self.inv_diag.len() {
            return Err(BddcError::SizeMismatch { what: "jacobi input", expected: self.inv_diag.len(), got: x.len() });
        }
        for ((yi, xi), d) in y.iter_mut().zip(x).zip(&self.inv_diag) {
            *yi = d * xi;
        }
        Ok(())
    }

    fn apply_transpose(&self, x: &Vec<f64>, y: &mut Vec<f64>) -> Result<(), BddcError> {
        self.apply(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jacobi_scales_by_inverse_diagonal() {
        let a = CsrMatrix::from_triplets(2, 2, &[(0, 0, 2.0), (1, 1, 4.0), (0, 1, 1.0)]).unwrap();
        let mut pc = Jacobi::new();
        pc.setup(&a).unwrap();
        let mut y = vec![0.0; 2];
        pc.apply(&vec![1.0, 1.0], &mut y).unwrap();
        assert_eq!(y, vec![0.5, 0.25]);
    }
}
