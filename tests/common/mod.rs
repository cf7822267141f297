//! Problem generators shared by the integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;

use kryst_bddc::{Bddc, BddcOptions, CsrMatrix, LinearSolver, LocalComm, LocalPiece, MatIs, MatVec, PcgSolver, Preconditioner, SolveStats};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Q1 Laplacian of a square element, nodes counter-clockwise from the lower left.
const Q1: [[f64; 4]; 4] = [
    [4.0, -1.0, -2.0, -1.0],
    [-1.0, 4.0, -1.0, -2.0],
    [-2.0, -1.0, 4.0, -1.0],
    [-1.0, -2.0, -1.0, 4.0],
];

/// Skew-symmetric element coupling used to make the operator nonsymmetric.
const SKEW: [[f64; 4]; 4] = [
    [0.0, 1.0, 0.0, -1.0],
    [-1.0, 0.0, 1.0, 0.0],
    [0.0, -1.0, 0.0, 1.0],
    [1.0, 0.0, -1.0, 0.0],
];

/// 2D Q1 problem on a rectangle split into `k x ky` subdomains of
/// `cells x cells` elements each.
#[derive(Clone, Debug)]
pub struct Poisson2d {
    pub k: usize,
    pub ky: usize,
    pub cells: usize,
    /// Eliminate the boundary nodes (homogeneous Dirichlet); otherwise pure Neumann.
    pub dirichlet: bool,
    /// Coefficient scale of every subdomain, indexed by rank.
    pub coeff: Vec<f64>,
    pub skew: f64,
}

impl Poisson2d {
    pub fn new(k: usize) -> Self {
        Self { k, ky: k, cells: 4, dirichlet: true, coeff: vec![1.0; k * k], skew: 0.0 }
    }

    /// `ky` horizontal strips of `cells x cells` elements stacked vertically.
    /// Interfaces are single lines shared by two subdomains, so there are no
    /// corners.
    pub fn strips(ky: usize) -> Self {
        Self { k: 1, ky, cells: 4, dirichlet: true, coeff: vec![1.0; ky], skew: 0.0 }
    }

    pub fn neumann(mut self) -> Self {
        self.dirichlet = false;
        self
    }

    pub fn with_skew(mut self, skew: f64) -> Self {
        self.skew = skew;
        self
    }

    /// Coefficients `high` and 1 in a checkerboard.
    pub fn checkerboard(mut self, high: f64) -> Self {
        let k = self.k;
        self.coeff = (0..k * self.ky).map(|r| if (r % k + r / k) % 2 == 0 { high } else { 1.0 }).collect();
        self
    }

    fn n_side(&self) -> (usize, usize) {
        (self.k * self.cells, self.ky * self.cells)
    }

    fn global(&self, x: usize, y: usize) -> Option<usize> {
        let (nx, ny) = self.n_side();
        if self.dirichlet {
            if x == 0 || y == 0 || x == nx || y == ny {
                return None;
            }
            Some((y - 1) * (nx - 1) + (x - 1))
        } else {
            Some(y * (nx + 1) + x)
        }
    }

    pub fn n_global(&self) -> usize {
        let (nx, ny) = self.n_side();
        if self.dirichlet { (nx - 1) * (ny - 1) } else { (nx + 1) * (ny + 1) }
    }

    pub fn build(&self) -> MatIs {
        let c = self.cells;
        let mut pieces = Vec::with_capacity(self.k * self.ky);
        for rank in 0..self.k * self.ky {
            let (a, b) = (rank % self.k, rank / self.k);
            let mut local: BTreeMap<usize, usize> = BTreeMap::new();
            let mut l2g = Vec::new();
            for y in b * c..=(b + 1) * c {
                for x in a * c..=(a + 1) * c {
                    if let Some(g) = self.global(x, y) {
                        local.insert(g, l2g.len());
                        l2g.push(g);
                    }
                }
            }
            let mut triplets = Vec::new();
            for ey in b * c..(b + 1) * c {
                for ex in a * c..(a + 1) * c {
                    let nodes = [(ex, ey), (ex + 1, ey), (ex + 1, ey + 1), (ex, ey + 1)];
                    let ids: Vec<Option<usize>> =
                        nodes.iter().map(|&(x, y)| self.global(x, y).map(|g| local[&g])).collect();
                    for i in 0..4 {
                        for j in 0..4 {
                            if let (Some(li), Some(lj)) = (ids[i], ids[j]) {
                                let v = self.coeff[rank] * Q1[i][j] / 6.0 + self.skew * SKEW[i][j];
                                triplets.push((li, lj, v));
                            }
                        }
                    }
                }
            }
            let n = l2g.len();
            pieces.push(LocalPiece::new(l2g, CsrMatrix::from_triplets(n, n, &triplets).unwrap()));
        }
        MatIs::new(self.n_global(), pieces).unwrap()
    }
}

pub fn random_vector(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-1.0..=1.0)).collect()
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn relative_residual(is: &MatIs, x: &[f64], b: &[f64]) -> f64 {
    let mut ax = vec![0.0; b.len()];
    is.matvec(&x.to_vec(), &mut ax);
    let r: Vec<f64> = ax.iter().zip(b).map(|(a, b)| a - b).collect();
    dot(&r, &r).sqrt() / dot(b, b).sqrt()
}

pub fn setup_bddc(is: &MatIs, opts: BddcOptions) -> Bddc {
    let mut pc = Bddc::new(opts, LocalComm::new(is.n_ranks()));
    pc.setup(is).unwrap();
    pc
}

/// PCG to a relative residual of `1e-8` preconditioned by `pc`.
pub fn pcg(is: &MatIs, pc: &Bddc, b: &[f64]) -> (Vec<f64>, SolveStats<f64>) {
    let mut x = vec![0.0; b.len()];
    let pc: &dyn Preconditioner<MatIs, Vec<f64>> = pc;
    let stats = PcgSolver::new(1e-8, 200).solve(is, Some(pc), &b.to_vec(), &mut x).unwrap();
    (x, stats)
}
