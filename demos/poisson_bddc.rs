use kryst_bddc::{Bddc, BddcOptions, CsrMatrix, LinearSolver, LocalComm, LocalPiece, MatIs, PcgSolver, Preconditioner};
use rand::Rng;

/// Q1 Laplacian on a `k x k` grid of subdomains with `cells x cells`
/// elements each, boundary nodes eliminated.
fn poisson(k: usize, cells: usize) -> MatIs {
    const Q1: [[f64; 4]; 4] = [[4.0, -1.0, -2.0, -1.0], [-1.0, 4.0, -1.0, -2.0], [-2.0, -1.0, 4.0, -1.0], [-1.0, -2.0, -1.0, 4.0]];
    let n = k * cells;
    let global = |x: usize, y: usize| (x > 0 && y > 0 && x < n && y < n).then(|| (y - 1) * (n - 1) + x - 1);
    let mut pieces = Vec::new();
    for rank in 0..k * k {
        let (a, b) = (rank % k * cells, rank / k * cells);
        let l2g: Vec<usize> = (b..=b + cells).flat_map(|y| (a..=a + cells).filter_map(move |x| global(x, y))).collect();
        let local = |g: usize| l2g.binary_search(&g).ok();
        let mut triplets = Vec::new();
        for ey in b..b + cells {
            for ex in a..a + cells {
                let nodes = [(ex, ey), (ex + 1, ey), (ex + 1, ey + 1), (ex, ey + 1)];
                let ids: Vec<Option<usize>> = nodes.iter().map(|&(x, y)| global(x, y).and_then(local)).collect();
                for i in 0..4 {
                    for j in 0..4 {
                        if let (Some(li), Some(lj)) = (ids[i], ids[j]) {
                            triplets.push((li, lj, Q1[i][j] / 6.0));
                        }
                    }
                }
            }
        }
        let m = l2g.len();
        pieces.push(LocalPiece::new(l2g.clone(), CsrMatrix::from_triplets(m, m, &triplets).unwrap()));
    }
    MatIs::new((n - 1) * (n - 1), pieces).unwrap()
}

fn main() {
    // e.g. cargo run --example poisson_bddc -- -pc_bddc_levels 1 -pc_bddc_coarsening_ratio 2
    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = BddcOptions::from_args(&args).unwrap();

    let mut rng = rand::thread_rng();
    for k in [2, 4, 8] {
        let a = poisson(k, 8);
        let mut pc = Bddc::new(opts.clone(), LocalComm::new(k * k));
        pc.setup(&a).unwrap();

        let b: Vec<f64> = (0..a.n_global()).map(|_| rng.gen_range(0.0..1.0)).collect();
        let mut x = vec![0.0; b.len()];
        let pc_ref: &dyn Preconditioner<MatIs, Vec<f64>> = &pc;
        let stats = PcgSolver::new(1e-8, 500).solve(&a, Some(pc_ref), &b, &mut x).unwrap();
        println!(
            "{k}x{k} subdomains: n = {}, coarse size = {}, coarse pc = {:?}, stats = {:?}",
            a.n_global(),
            pc.n_primal(),
            pc.coarse_pc_type(),
            stats
        );
    }
}
