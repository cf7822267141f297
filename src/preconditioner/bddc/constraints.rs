//! Primal constraints of a subdomain.
//!
//! Every selected interface entity contributes one or more rows: vertices a
//! point evaluation, edges and faces one average per near-null-space mode.
//! Redundant rows of an entity are removed by SVD or POD and the survivors are
//! sign-normalized so that every subdomain sharing the entity builds the same
//! functionals. With a change of basis, the rows of eligible entities are
//! turned into plain dofs of the transformed operator.

use faer::Mat;

use crate::config::{BddcOptions, ConstraintReduction, PrimalSelection};
use crate::error::BddcError;
use crate::matrix::{dense, CsrMatrix, LocalPiece, MatIs};
use crate::parallel::LocalComm;
use crate::preconditioner::bddc::graph::{Entity, EntityKind, InterfaceGraph};
use crate::preconditioner::bddc::try_map_ranks;

/// Relative size below which a coefficient does not count as touching a dof.
const PIVOT_TOL: f64 = 1e-12;

/// Modes the coarse space must reproduce exactly, in global numbering.
#[derive(Clone, Debug, Default)]
pub struct NearNullSpace {
    /// Whether the constant vector is part of the space.
    pub has_constant: bool,
    pub vectors: Vec<Vec<f64>>,
}

impl NearNullSpace {
    pub fn new(has_constant: bool, vectors: Vec<Vec<f64>>) -> Self {
        Self { has_constant, vectors }
    }
}

/// One retained constraint of an entity.
#[derive(Clone, Debug)]
pub struct ConstraintRecord {
    pub entity: usize,
    pub kind: EntityKind,
    /// Global candidate key, shared by all subdomains holding the entity.
    pub key: usize,
    /// `(local dof, coefficient)` in the original basis.
    pub entries: Vec<(usize, f64)>,
    pub change_of_basis: bool,
    /// Local dof carrying the primal value in the working basis (vertices and
    /// changed entities).
    pub primal_dof: Option<usize>,
}

/// Primal space of one subdomain.
#[derive(Clone, Debug)]
pub struct LocalConstraints {
    /// Records in primal order: vertex-like ones first, each group by key.
    pub records: Vec<ConstraintRecord>,
    /// Rows generated before rank reduction.
    pub n_candidates: usize,
    pub vertices: Vec<usize>,
    pub vertex_keys: Vec<usize>,
    /// Remaining constraint rows in the working basis.
    pub constraints: Vec<Vec<(usize, f64)>>,
    pub constraint_keys: Vec<usize>,
    /// All primal functionals, original basis (rows in primal order).
    pub constraint_matrix: CsrMatrix,
    /// Square local change of basis, identity outside changed entities.
    pub change_of_basis: Option<CsrMatrix>,
}

impl LocalConstraints {
    pub fn n_primal(&self) -> usize {
        self.records.len()
    }

    pub fn n_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn primal_keys(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.key).collect()
    }
}

/// Rows of one entity before any basis change.
struct EntityRows {
    entity: usize,
    rows: Vec<Vec<f64>>,
    n_candidates: usize,
}

fn selected(kind: EntityKind, primal: PrimalSelection) -> bool {
    match kind {
        EntityKind::Vertex => primal.contains(PrimalSelection::VERTICES),
        EntityKind::Edge => primal.contains(PrimalSelection::EDGES),
        EntityKind::Face => primal.contains(PrimalSelection::FACES),
    }
}

fn norm2(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Make the entry of largest magnitude positive (first one on ties).
fn fix_sign(row: &mut [f64]) {
    let mut best = 0;
    for (i, v) in row.iter().enumerate() {
        if v.abs() > row[best].abs() {
            best = i;
        }
    }
    if row.get(best).is_some_and(|&v| v < 0.0) {
        row.iter_mut().for_each(|v| *v = -*v);
    }
}

/// Orthonormal basis of the row space of `rows`.
fn reduce(rows: &[Vec<f64>], m: usize, opts: &BddcOptions) -> Result<Vec<Vec<f64>>, BddcError> {
    let t = rows.len();
    let c = Mat::from_fn(t, m, |i, j| rows[i][j]);
    let reduced: Vec<Vec<f64>> = match opts.constraint_reduction {
        ConstraintReduction::Svd => {
            let (sigma, u) = dense::svd_left(&dense::transpose(&c))?;
            let smax = sigma.first().copied().unwrap_or(0.0);
            sigma
                .iter()
                .enumerate()
                .filter(|&(_, &s)| smax > 0.0 && s > opts.svd_tol * smax)
                .map(|(k, _)| (0..m).map(|i| u[(i, k)]).collect())
                .collect()
        }
        ConstraintReduction::Pod => {
            let gram = &c * &dense::transpose(&c);
            let (lambda, v) = dense::sym_eigen(&gram)?;
            let lmax = lambda.last().copied().unwrap_or(0.0);
            // eigenvalues below roundoff of the Gram matrix carry no direction
            let cut = (opts.svd_tol * opts.svd_tol).max(16.0 * t as f64 * f64::EPSILON) * lmax;
            (0..t)
                .rev()
                .filter(|&k| lmax > 0.0 && lambda[k] > cut)
                .map(|k| {
                    let s = lambda[k].sqrt();
                    (0..m).map(|j| (0..t).map(|i| v[(i, k)] * c[(i, j)]).sum::<f64>() / s).collect()
                })
                .collect()
        }
    };
    Ok(reduced)
}

fn entity_rows(
    id: usize,
    entity: &Entity,
    piece: &LocalPiece,
    near_null: Option<&NearNullSpace>,
    opts: &BddcOptions,
) -> Result<Option<EntityRows>, BddcError> {
    if !selected(entity.kind, opts.primal) {
        return Ok(None);
    }
    let m = entity.dofs.len();
    if entity.kind == EntityKind::Vertex {
        return Ok(Some(EntityRows { entity: id, rows: vec![vec![1.0]], n_candidates: 1 }));
    }
    let mut rows = Vec::new();
    if near_null.is_none_or(|nn| nn.has_constant) {
        rows.push(vec![1.0 / (m as f64).sqrt(); m]);
    }
    for v in near_null.map(|nn| nn.vectors.as_slice()).unwrap_or(&[]) {
        let row: Vec<f64> = entity.dofs.iter().map(|&d| v[piece.l2g[d]]).collect();
        if row.iter().any(|&x| x != 0.0) {
            rows.push(row);
        }
    }
    let n_candidates = rows.len();
    if rows.is_empty() {
        return Ok(None);
    }
    let mut rows = if rows.len() > 1 {
        reduce(&rows, m, opts)?
    } else {
        let nrm = norm2(&rows[0]);
        vec![rows[0].iter().map(|v| v / nrm).collect()]
    };
    rows.iter_mut().for_each(|r| fix_sign(r));
    Ok(Some(EntityRows { entity: id, rows, n_candidates }))
}

/// Local transformation of one entity and the entity positions holding the
/// primal values in the new basis.
fn entity_change_of_basis(rows: &[Vec<f64>], m: usize) -> Result<(Mat<f64>, Vec<usize>), BddcError> {
    let p = rows.len();
    if p == 1 {
        let c = &rows[0];
        let cmax = c.iter().fold(0.0f64, |a, v| a.max(v.abs()));
        let j = c
            .iter()
            .position(|v| v.abs() > PIVOT_TOL * cmax)
            .ok_or_else(|| BddcError::Inconsistent("no untouched dof for change of basis".into()))?;
        let t = Mat::from_fn(m, m, |row, col| {
            if col == j {
                if row == j { 1.0 / c[j] } else { 0.0 }
            } else if row == col {
                1.0
            } else if row == j {
                -c[col] / c[j]
            } else {
                0.0
            }
        });
        return Ok((t, vec![j]));
    }
    let ct = Mat::from_fn(m, p, |i, k| rows[k][i]);
    let q = dense::qr_full_q(&ct);
    let r_full = &dense::transpose(&q) * &ct;
    let top: Vec<usize> = (0..p).collect();
    let r = dense::gather(&r_full, &top, &top);
    let r_inv_t = dense::upper_inverse_transpose(&r)?;
    let all: Vec<usize> = (0..m).collect();
    let primal = &dense::gather(&q, &all, &top) * &r_inv_t;
    let t = Mat::from_fn(m, m, |i, j| if j < p { primal[(i, j)] } else { q[(i, j)] });
    Ok((t, top))
}

fn eligible_for_change(kind: EntityKind, retained: usize, opts: &BddcOptions) -> bool {
    opts.use_change_of_basis
        && match kind {
            EntityKind::Vertex => false,
            EntityKind::Edge => true,
            EntityKind::Face => opts.use_change_on_faces || retained > 1,
        }
}

fn assemble_local(
    graph: &InterfaceGraph,
    entity_rows: Vec<EntityRows>,
    stride: usize,
    opts: &BddcOptions,
) -> Result<LocalConstraints, BddcError> {
    let n = graph.n_local;
    let n_candidates = entity_rows.iter().map(|e| e.n_candidates).sum();
    let mut records = Vec::new();
    let mut cob_triplets = Vec::new();
    let mut changed = vec![false; n];
    for er in entity_rows {
        let entity = &graph.entities[er.entity];
        let m = entity.dofs.len();
        let change = eligible_for_change(entity.kind, er.rows.len(), opts);
        let positions = if change {
            let (t, positions) = entity_change_of_basis(&er.rows, m)?;
            for (a, &da) in entity.dofs.iter().enumerate() {
                changed[da] = true;
                for (b, &db) in entity.dofs.iter().enumerate() {
                    if t[(a, b)] != 0.0 {
                        cob_triplets.push((da, db, t[(a, b)]));
                    }
                }
            }
            Some(positions)
        } else {
            None
        };
        for (k, row) in er.rows.into_iter().enumerate() {
            let primal_dof = match (&positions, entity.kind) {
                (Some(pos), _) => Some(entity.dofs[pos[k]]),
                (None, EntityKind::Vertex) => Some(entity.dofs[0]),
                (None, _) => None,
            };
            records.push(ConstraintRecord {
                entity: er.entity,
                kind: entity.kind,
                key: entity.global_rep * stride + k,
                entries: entity.dofs.iter().copied().zip(row).collect(),
                change_of_basis: change,
                primal_dof,
            });
        }
    }
    records.sort_by_key(|r| (r.primal_dof.is_none(), r.key));

    let change_of_basis = if cob_triplets.is_empty() {
        None
    } else {
        cob_triplets.extend((0..n).filter(|&i| !changed[i]).map(|i| (i, i, 1.0)));
        Some(CsrMatrix::from_triplets(n, n, &cob_triplets)?)
    };
    let matrix_triplets: Vec<(usize, usize, f64)> = records
        .iter()
        .enumerate()
        .flat_map(|(i, r)| r.entries.iter().map(move |&(d, v)| (i, d, v)))
        .collect();
    let constraint_matrix = CsrMatrix::from_triplets(records.len(), n, &matrix_triplets)?;

    let (vertex_like, others): (Vec<&ConstraintRecord>, Vec<&ConstraintRecord>) =
        records.iter().partition(|r| r.primal_dof.is_some());
    let vertices = vertex_like.iter().filter_map(|r| r.primal_dof).collect();
    let vertex_keys = vertex_like.iter().map(|r| r.key).collect();
    let constraints = others.iter().map(|r| r.entries.clone()).collect();
    let constraint_keys = others.iter().map(|r| r.key).collect();
    Ok(LocalConstraints {
        n_candidates,
        vertices,
        vertex_keys,
        constraints,
        constraint_keys,
        constraint_matrix,
        change_of_basis,
        records,
    })
}

/// Build the primal constraints of every rank.
///
/// Keys are `global_rep * stride + k` where `stride` is the largest number of
/// rows retained on any entity of any rank, so keys never collide.
pub fn build_constraints(
    comm: &LocalComm,
    graphs: &[InterfaceGraph],
    is: &MatIs,
    near_null: Option<&NearNullSpace>,
    opts: &BddcOptions,
) -> Result<Vec<LocalConstraints>, BddcError> {
    if let Some(nn) = near_null {
        if let Some(v) = nn.vectors.iter().find(|v| v.len() != is.n_global()) {
            return Err(BddcError::SizeMismatch { what: "near null vector", expected: is.n_global(), got: v.len() });
        }
    }
    let rows: Vec<Vec<EntityRows>> = try_map_ranks(graphs, |rank, graph| {
        let piece = is.piece(rank);
        let mut out = Vec::new();
        for (id, entity) in graph.entities.iter().enumerate() {
            if let Some(er) = entity_rows(id, entity, piece, near_null, opts)? {
                out.push(er);
            }
        }
        Ok(out)
    })?;
    let local_max: Vec<usize> = rows
        .iter()
        .map(|r| r.iter().map(|e| e.rows.len()).max().unwrap_or(0))
        .collect();
    let stride = comm.all_reduce_max(&local_max)?.max(1);
    let mut out = Vec::with_capacity(rows.len());
    for (graph, er) in graphs.iter().zip(rows) {
        out.push(assemble_local(graph, er, stride, opts)?);
    }
    log::debug!(
        "bddc constraints: {} primal candidates on {} ranks (key stride {stride})",
        out.iter().map(LocalConstraints::n_primal).sum::<usize>(),
        out.len()
    );
    Ok(out)
}
