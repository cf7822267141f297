use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kryst_bddc::{Bddc, BddcOptions, CsrMatrix, LocalComm, LocalPiece, MatIs, Preconditioner};

/// 5-point Laplacian on a `k x k` grid of subdomains with `cells x cells`
/// nodes each, pieces overlapping on one node layer.
fn laplacian(k: usize, cells: usize) -> MatIs {
    let n = k * cells;
    let global = |x: usize, y: usize| (x > 0 && y > 0 && x < n && y < n).then(|| (y - 1) * (n - 1) + x - 1);
    let mut pieces = Vec::new();
    for rank in 0..k * k {
        let (a, b) = (rank % k * cells, rank / k * cells);
        let l2g: Vec<usize> = (b..=b + cells).flat_map(|y| (a..=a + cells).filter_map(move |x| global(x, y))).collect();
        let local = |g: usize| l2g.binary_search(&g).ok();
        let mut triplets = Vec::new();
        // one bar per grid segment inside the subdomain
        for y in b..=b + cells {
            for x in a..=a + cells {
                for (x2, y2) in [(x + 1, y), (x, y + 1)] {
                    if x2 > a + cells || y2 > b + cells {
                        continue;
                    }
                    // segments on the subdomain boundary are shared by two pieces
                    let on_edge = (y == y2 && (y == b || y == b + cells)) || (x == x2 && (x == a || x == a + cells));
                    let w = if on_edge { 0.5 } else { 1.0 };
                    let (p, q) = (global(x, y).and_then(local), global(x2, y2).and_then(local));
                    if let Some(p) = p {
                        triplets.push((p, p, w));
                    }
                    if let Some(q) = q {
                        triplets.push((q, q, w));
                    }
                    if let (Some(p), Some(q)) = (p, q) {
                        triplets.push((p, q, -w));
                        triplets.push((q, p, -w));
                    }
                }
            }
        }
        let m = l2g.len();
        pieces.push(LocalPiece::new(l2g.clone(), CsrMatrix::from_triplets(m, m, &triplets).unwrap()));
    }
    MatIs::new((n - 1) * (n - 1), pieces).unwrap()
}

fn bench_bddc(c: &mut Criterion) {
    let a = laplacian(4, 8);
    let opts = BddcOptions::default();

    c.bench_function("bddc setup 4x4", |ben| {
        ben.iter(|| {
            let mut pc = Bddc::new(opts.clone(), LocalComm::new(16));
            pc.setup(black_box(&a)).unwrap();
        })
    });

    let mut pc = Bddc::new(opts.clone(), LocalComm::new(16));
    pc.setup(&a).unwrap();
    let r: Vec<f64> = (0..a.n_global()).map(|i| (i as f64).sin()).collect();
    let mut z = vec![0.0; r.len()];
    c.bench_function("bddc apply 4x4", |ben| {
        ben.iter(|| pc.apply(black_box(&r), black_box(&mut z)).unwrap())
    });

    let multilevel = opts.with_coarsening_ratio(2).with_max_levels(1);
    c.bench_function("bddc setup 4x4 multilevel", |ben| {
        ben.iter(|| {
            let mut pc = Bddc::new(multilevel.clone(), LocalComm::new(16));
            pc.setup(black_box(&a)).unwrap();
        })
    });
}

criterion_group!(benches, bench_bddc);
criterion_main!(benches);
