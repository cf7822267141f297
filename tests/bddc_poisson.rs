//! End-to-end tests of the BDDC preconditioner on 2D Q1 problems.
//!
//! The unit square is split into `k x k` subdomains of `4 x 4` elements; the
//! primal space is made of the subdomain corners and the edge averages.

mod common;

use approx::assert_abs_diff_eq;
use common::*;
use kryst_bddc::{
    BddcOptions, CoarseState, DirichletSolver, GmresSolver, LinearSolver, MatIs, MatTransVec, PcType,
    Preconditioner, SolverKind, TransposePc, Transposed,
};

#[test]
fn primal_space_has_corners_and_edges() {
    for k in [2, 3] {
        let is = Poisson2d::new(k).build();
        let pc = setup_bddc(&is, BddcOptions::default());
        assert_eq!(pc.n_primal(), (k - 1) * (k - 1) + 2 * k * (k - 1));
        assert_eq!(pc.is_symmetric(), Some(true));
        assert_eq!(pc.use_exact_dirichlet(), Some(true));
    }
    let pc = setup_bddc(&Poisson2d::new(3).build(), BddcOptions::default());
    let counts = pc.primal_counts();
    // corner subdomain: 1 corner, 2 edges; center subdomain: 4 and 4
    assert_eq!(counts[0], 3);
    assert_eq!(counts[4], 8);
}

#[test]
fn coarse_matrix_is_the_galerkin_product() {
    let is = Poisson2d::new(3).build();
    let pc = setup_bddc(&is, BddcOptions::default().with_dbg_level(1));
    for err in pc.check_coarse_matrices().unwrap() {
        assert!(err < 1e-10, "Phi^T A Phi differs by {err}");
    }
}

#[test]
fn iterations_do_not_grow_with_subdomains() {
    let mut its = Vec::new();
    for k in [2, 3, 4] {
        let is = Poisson2d::new(k).build();
        let pc = setup_bddc(&is, BddcOptions::default());
        let b = random_vector(is.n_global(), 7);
        let (x, stats) = pcg(&is, &pc, &b);
        assert!(stats.converged, "k = {k}: {stats:?}");
        assert!(relative_residual(&is, &x, &b) < 1e-7);
        its.push(stats.iterations);
    }
    assert!(its.iter().all(|&i| i <= 25), "iterations {its:?}");
    assert!(its[2] <= its[1] + 4, "iterations {its:?}");
}

#[test]
fn multilevel_hierarchy() {
    let is = Poisson2d::new(4).build();
    let opts = BddcOptions::default().with_coarsening_ratio(2).with_max_levels(1);
    let pc = setup_bddc(&is, opts);
    assert_eq!(pc.coarse_pc_type(), Some(PcType::Bddc));
    let next = pc.coarse_bddc().unwrap();
    assert_eq!(next.level(), 1);
    assert_eq!(next.coarse_pc_type(), Some(PcType::Redundant));
    assert!(next.coarse_bddc().is_none());

    let b = random_vector(is.n_global(), 3);
    let (x, stats) = pcg(&is, &pc, &b);
    assert!(stats.converged, "{stats:?}");
    assert!(stats.iterations <= 40, "{stats:?}");
    assert!(relative_residual(&is, &x, &b) < 1e-7);
}

#[test]
fn too_few_ranks_fall_back_to_redundant() {
    let is = Poisson2d::new(2).build();
    let opts = BddcOptions::default().with_coarsening_ratio(2).with_max_levels(3);
    let pc = setup_bddc(&is, opts);
    assert_eq!(pc.coarse_pc_type(), Some(PcType::Redundant));
    assert!(pc.coarse_bddc().is_none());
}

#[test]
fn multilevel_with_cg_on_the_coarse_level() {
    let is = Poisson2d::new(4).build();
    let mut opts = BddcOptions::default()
        .with_coarsening_ratio(2)
        .with_max_levels(1)
        .with_coarse_ksp(SolverKind::Pcg);
    opts.coarse_estimates = true;
    let pc = setup_bddc(&is, opts);
    let (lo, hi) = pc.coarse_eigen_estimates().unwrap();
    assert!(lo > 0.0 && hi >= lo, "estimates [{lo}, {hi}]");
    let b = random_vector(is.n_global(), 5);
    let (x, stats) = pcg(&is, &pc, &b);
    assert!(stats.converged, "{stats:?}");
    assert!(relative_residual(&is, &x, &b) < 1e-7);
}

#[test]
fn nonsymmetric_problem_with_gmres() {
    let problem = Poisson2d::new(3).with_skew(0.2);
    let is = problem.build();
    let pc = setup_bddc(&is, BddcOptions::default());
    assert_eq!(pc.is_symmetric(), Some(false));
    for err in pc.check_coarse_matrices().unwrap() {
        assert!(err < 1e-10, "Psi^T A Phi differs by {err}");
    }

    let b = random_vector(is.n_global(), 11);
    let mut x = vec![0.0; b.len()];
    let pc_ref: &dyn Preconditioner<MatIs, Vec<f64>> = &pc;
    let stats = GmresSolver::new(30, 1e-8, 200).solve(&is, Some(pc_ref), &b, &mut x).unwrap();
    assert!(stats.converged, "{stats:?}");
    assert!(relative_residual(&is, &x, &b) < 1e-6);

    // transposed system A^T x = b with the transposed preconditioner
    let op = Transposed(&is);
    let tpc = TransposePc(&pc);
    let tpc: &dyn Preconditioner<Transposed<'_, MatIs>, Vec<f64>> = &tpc;
    let mut xt = vec![0.0; b.len()];
    let stats = GmresSolver::new(30, 1e-8, 200).solve(&op, Some(tpc), &b, &mut xt).unwrap();
    assert!(stats.converged, "{stats:?}");
    let mut atx = vec![0.0; b.len()];
    is.mattransvec(&xt, &mut atx);
    let err: f64 = atx.iter().zip(&b).map(|(a, b)| (a - b).powi(2)).sum::<f64>().sqrt();
    assert!(err < 1e-6 * dot(&b, &b).sqrt());
}

#[test]
fn transpose_apply_is_the_adjoint() {
    let is = Poisson2d::new(3).with_skew(0.3).build();
    let pc = setup_bddc(&is, BddcOptions::default());
    let n = is.n_global();
    let (u, v) = (random_vector(n, 1), random_vector(n, 2));
    let (mut mu, mut mtv) = (vec![0.0; n], vec![0.0; n]);
    pc.apply(&u, &mut mu).unwrap();
    pc.apply_transpose(&v, &mut mtv).unwrap();
    let (lhs, rhs) = (dot(&mu, &v), dot(&u, &mtv));
    assert_abs_diff_eq!(lhs, rhs, epsilon = 1e-9 * lhs.abs().max(1.0));
}

#[test]
fn pure_neumann_problem_with_null_space() {
    let is = Poisson2d::new(2).neumann().build();
    let n = is.n_global();
    let mut pc = kryst_bddc::Bddc::new(BddcOptions::default(), kryst_bddc::LocalComm::new(is.n_ranks()));
    pc.set_null_space(vec![vec![1.0; n]]).unwrap();
    pc.setup(&is).unwrap();

    let mut b = random_vector(n, 13);
    let mean = b.iter().sum::<f64>() / n as f64;
    b.iter_mut().for_each(|v| *v -= mean);
    let (x, stats) = pcg(&is, &pc, &b);
    assert!(stats.converged, "{stats:?}");
    assert!(relative_residual(&is, &x, &b) < 1e-7);
    assert_abs_diff_eq!(x.iter().sum::<f64>(), 0.0, epsilon = 1e-8);
}

#[test]
fn floating_strips_without_corners() {
    let is = Poisson2d::strips(3).neumann().build();
    let n = is.n_global();
    let mut pc = kryst_bddc::Bddc::new(BddcOptions::default(), kryst_bddc::LocalComm::new(is.n_ranks()));
    pc.set_null_space(vec![vec![1.0; n]]).unwrap();
    pc.setup(&is).unwrap();
    // one edge average per interface line, no vertices anywhere
    assert_eq!(pc.primal_counts(), vec![1, 2, 1]);
    assert!(pc.local_constraints(1).unwrap().vertices.is_empty());
    assert!((0..3).all(|r| pc.correction(r).unwrap().regularized));

    let mut b = random_vector(n, 23);
    let mean = b.iter().sum::<f64>() / n as f64;
    b.iter_mut().for_each(|v| *v -= mean);
    let (x, stats) = pcg(&is, &pc, &b);
    assert!(stats.converged, "{stats:?}");
    assert!(relative_residual(&is, &x, &b) < 1e-7);
    assert_abs_diff_eq!(x.iter().sum::<f64>(), 0.0, epsilon = 1e-8);
}

#[test]
fn second_setup_keeps_the_coarse_pattern() {
    let problem = Poisson2d::new(3);
    let is = problem.build();
    let mut pc = setup_bddc(&is, BddcOptions::default());
    assert_eq!(pc.coarse_state(), CoarseState::DifferentPattern);
    let r = random_vector(is.n_global(), 17);
    let mut z1 = vec![0.0; r.len()];
    pc.apply(&r, &mut z1).unwrap();

    // same layout, doubled coefficients
    let mut scaled = problem.clone();
    scaled.coeff = vec![2.0; 9];
    pc.setup(&scaled.build()).unwrap();
    assert_eq!(pc.coarse_state(), CoarseState::SamePattern);
    assert!(pc.correction(4).unwrap().aux_reused);
    let mut z2 = vec![0.0; r.len()];
    pc.apply(&r, &mut z2).unwrap();
    let scale = dot(&z1, &z1).sqrt();
    for (a, b) in z1.iter().zip(&z2) {
        assert_abs_diff_eq!(*a, 2.0 * b, epsilon = 1e-10 * scale);
    }
}

#[test]
fn stiffness_scaling_handles_coefficient_jumps() {
    let is = Poisson2d::new(3).checkerboard(1e3).build();
    let b = random_vector(is.n_global(), 19);
    let plain = setup_bddc(&is, BddcOptions::default());
    let scaled = setup_bddc(&is, BddcOptions::default().with_stiffness_scaling(true));
    let (_, plain_stats) = pcg(&is, &plain, &b);
    let (x, stats) = pcg(&is, &scaled, &b);
    assert!(stats.converged, "{stats:?}");
    assert!(stats.iterations <= 30, "{stats:?}");
    assert!(stats.iterations <= plain_stats.iterations, "{stats:?} vs {plain_stats:?}");
    assert!(relative_residual(&is, &x, &b) < 1e-7);
}

#[test]
fn change_of_basis_gives_the_same_preconditioner() {
    let is = Poisson2d::new(3).build();
    let plain = setup_bddc(&is, BddcOptions::default());
    let changed = setup_bddc(&is, BddcOptions::default().with_change_of_basis(true));
    assert_eq!(changed.n_primal(), plain.n_primal());
    assert!(changed.local_constraints(4).unwrap().change_of_basis.is_some());

    let r = random_vector(is.n_global(), 23);
    let (mut z0, mut z1) = (vec![0.0; r.len()], vec![0.0; r.len()]);
    plain.apply(&r, &mut z0).unwrap();
    changed.apply(&r, &mut z1).unwrap();
    let scale = dot(&z0, &z0).sqrt();
    for (a, b) in z0.iter().zip(&z1) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-8 * scale);
    }
}

#[test]
fn static_switch_with_accurate_interior_solves() {
    let is = Poisson2d::new(3).build();
    let exact = setup_bddc(&is, BddcOptions::default());
    let opts = BddcOptions {
        dirichlet: DirichletSolver::Iterative { rtol: 1e-13, max_it: 500 },
        exact_dirichlet_tol: 0.0,
        ..BddcOptions::default()
    };
    let inexact = setup_bddc(&is, opts);
    assert_eq!(inexact.use_exact_dirichlet(), Some(false));

    let r = random_vector(is.n_global(), 29);
    let (mut z0, mut z1) = (vec![0.0; r.len()], vec![0.0; r.len()]);
    exact.apply(&r, &mut z0).unwrap();
    inexact.apply(&r, &mut z1).unwrap();
    let scale = dot(&z0, &z0).sqrt();
    for (a, b) in z0.iter().zip(&z1) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-8 * scale);
    }
}
