//! Matrix in local pieces.
//!
//! A `MatIs` is a global operator stored as one local matrix per rank together
//! with a local-to-global map: `A = sum_r P_r^T A_r P_r`. Fine-level problems
//! are handed to the preconditioner in this form and the coarse problem is
//! produced in it again, so the recursion sees the same shape on every level.

use crate::core::traits::{Indexing, MatTransVec, MatVec};
use crate::error::BddcError;
use crate::matrix::sparse::CsrMatrix;

/// One rank's share of a `MatIs`.
#[derive(Clone, Debug)]
pub struct LocalPiece {
    /// Global index of every local row/column.
    pub l2g: Vec<usize>,
    pub mat: CsrMatrix,
}

impl LocalPiece {
    pub fn new(l2g: Vec<usize>, mat: CsrMatrix) -> Self {
        Self { l2g, mat }
    }

    pub fn n_local(&self) -> usize {
        self.l2g.len()
    }

    /// A piece with no dofs.
    pub fn void() -> Self {
        Self { l2g: Vec::new(), mat: CsrMatrix::zeros(0, 0) }
    }
}

#[derive(Clone, Debug)]
pub struct MatIs {
    n_global: usize,
    pieces: Vec<LocalPiece>,
}

impl MatIs {
    pub fn new(n_global: usize, pieces: Vec<LocalPiece>) -> Result<Self, BddcError> {
        for piece in &pieces {
            let n = piece.l2g.len();
            if piece.mat.nrows() != n || piece.mat.ncols() != n {
                return Err(BddcError::SizeMismatch {
                    what: "local matrix size",
                    expected: n,
                    got: piece.mat.nrows(),
                });
            }
            if let Some(&g) = piece.l2g.iter().find(|&&g| g >= n_global) {
                return Err(BddcError::OutOfRange { what: "global index", value: g, lo: 0, hi: n_global });
            }
        }
        Ok(Self { n_global, pieces })
    }

    pub fn n_global(&self) -> usize {
        self.n_global
    }

    /// Number of ranks (pieces), void ones included.
    pub fn n_ranks(&self) -> usize {
        self.pieces.len()
    }

    pub fn piece(&self, rank: usize) -> &LocalPiece {
        &self.pieces[rank]
    }

    pub fn pieces(&self) -> &[LocalPiece] {
        &self.pieces
    }

    /// Ranks holding at least one dof.
    pub fn active_ranks(&self) -> Vec<usize> {
        (0..self.pieces.len()).filter(|&r| self.pieces[r].n_local() > 0).collect()
    }

    /// Global CSR by additive assembly of all pieces.
    pub fn assemble(&self) -> Result<CsrMatrix, BddcError> {
        let mut triplets = Vec::new();
        for piece in &self.pieces {
            for i in 0..piece.n_local() {
                let (cols, vals) = piece.mat.row(i);
                for (&j, &v) in cols.iter().zip(vals) {
                    triplets.push((piece.l2g[i], piece.l2g[j], v));
                }
            }
        }
        CsrMatrix::from_triplets(self.n_global, self.n_global, &triplets)
    }

    /// Global to local, insert mode: every rank receives its entries of `x`.
    pub fn scatter_to_local(&self, x: &[f64]) -> Vec<Vec<f64>> {
        self.pieces
            .iter()
            .map(|p| p.l2g.iter().map(|&g| x[g]).collect())
            .collect()
    }

    /// Local to global, add mode.
    pub fn gather_add(&self, locals: &[Vec<f64>], out: &mut [f64]) {
        out.iter_mut().for_each(|v| *v = 0.0);
        for (piece, local) in self.pieces.iter().zip(locals) {
            for (&g, &v) in piece.l2g.iter().zip(local) {
                out[g] += v;
            }
        }
    }

    /// Number of ranks touching each global index.
    pub fn multiplicity(&self) -> Vec<usize> {
        let mut mult = vec![0; self.n_global];
        for piece in &self.pieces {
            for &g in &piece.l2g {
                mult[g] += 1;
            }
        }
        mult
    }

    fn apply(&self, x: &[f64], y: &mut [f64], transpose: bool) {
        let local_products = |piece: &LocalPiece| {
            let xl: Vec<f64> = piece.l2g.iter().map(|&g| x[g]).collect();
            let mut yl = vec![0.0; piece.n_local()];
            if transpose {
                piece.mat.spmv_transpose(&xl, &mut yl);
            } else {
                crate::matrix::sparse::SparseMatrix::spmv(&piece.mat, &xl, &mut yl);
            }
            yl
        };
        #[cfg(feature = "rayon")]
        let locals: Vec<Vec<f64>> = {
            use rayon::prelude::*;
            self.pieces.par_iter().map(local_products).collect()
        };
        #[cfg(not(feature = "rayon"))]
        let locals: Vec<Vec<f64>> = self.pieces.iter().map(local_products).collect();
        self.gather_add(&locals, y);
    }
}

impl MatVec<Vec<f64>> for MatIs {
    fn matvec(&self, x: &Vec<f64>, y: &mut Vec<f64>) {
        assert_eq!(x.len(), self.n_global);
        assert_eq!(y.len(), self.n_global);
        self.apply(x, y, false);
    }
}

impl MatTransVec<Vec<f64>> for MatIs {
    fn mattransvec(&self, x: &Vec<f64>, y: &mut Vec<f64>) {
        assert_eq!(x.len(), self.n_global);
        assert_eq!(y.len(), self.n_global);
        self.apply(x, y, true);
    }
}

impl Indexing for MatIs {
    fn nrows(&self) -> usize {
        self.n_global
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_bars() -> MatIs {
        // two 1D elements sharing global dof 1
        let k = CsrMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (0, 1, -1.0), (1, 0, -1.0), (1, 1, 1.0)]).unwrap();
        MatIs::new(
            3,
            vec![LocalPiece::new(vec![0, 1], k.clone()), LocalPiece::new(vec![1, 2], k), LocalPiece::void()],
        )
        .unwrap()
    }

    #[test]
    fn assemble_adds_shared_entries() {
        let a = two_bars().assemble().unwrap();
        assert_eq!(a.get(1, 1), 2.0);
        assert_eq!(a.get(0, 2), 0.0);
    }

    #[test]
    fn matvec_matches_assembled() {
        let is = two_bars();
        let x = vec![1.0, 2.0, 4.0];
        let mut y = vec![0.0; 3];
        is.matvec(&x, &mut y);
        assert_eq!(y, vec![-1.0, -1.0, 2.0]);
        assert_eq!(is.active_ranks(), vec![0, 1]);
        assert_eq!(is.multiplicity(), vec![1, 2, 1]);
    }

    #[test]
    fn rejects_out_of_range_map() {
        let err = MatIs::new(1, vec![LocalPiece::new(vec![3], CsrMatrix::identity(1))]).unwrap_err();
        assert!(matches!(err, BddcError::OutOfRange { value: 3, .. }));
    }
}
