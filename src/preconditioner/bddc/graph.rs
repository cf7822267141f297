//! Interface graph of one subdomain.
//!
//! The set of ranks sharing every local dof is found with a collective exchange
//! keyed by global index: ranks send their global indices to the owner of a
//! block of the index space, owners collect the sharers and reply. Dofs with
//! more than one sharer form the interface (B); the others are interior (I).
//!
//! Interface dofs with the same sharer set are split into connected components
//! of the local matrix adjacency. Sharers need not see the same couplings, so
//! the local components are not used as entities directly: every rank tags each
//! interface dof with its component (smallest global index in it), the owners
//! gather the tags of all sharers, and an entity is a set of dofs carrying the
//! same tags on every sharer. All sharers thus end up with the same entities,
//! each a vertex, edge or face.

use std::collections::{BTreeMap, VecDeque};

use crate::error::BddcError;
use crate::matrix::{LocalPiece, MatIs};
use crate::parallel::{Comm, LocalComm};
use crate::preconditioner::bddc::label::Label;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Vertex,
    Edge,
    Face,
}

/// A group of interface dofs with a common sharer set, connected on every sharer.
#[derive(Clone, Debug)]
pub struct Entity {
    pub kind: EntityKind,
    /// Local dofs, ordered by global index.
    pub dofs: Vec<usize>,
    /// Sharing ranks, sorted.
    pub sharers: Vec<usize>,
    /// Smallest global index of the entity, used to key its primal dofs.
    pub global_rep: usize,
}

#[derive(Clone, Debug)]
pub struct InterfaceGraph {
    pub n_local: usize,
    pub interior: Vec<usize>,
    pub boundary: Vec<usize>,
    /// Sharer ranks of every local dof.
    pub sharers: Vec<Vec<usize>>,
    pub entities: Vec<Entity>,
    /// Entity id of every interface dof.
    pub label: Label,
}

impl InterfaceGraph {
    pub fn count(&self, kind: EntityKind) -> usize {
        self.entities.iter().filter(|e| e.kind == kind).count()
    }
}

fn owner(g: usize, n_global: usize, size: usize) -> usize {
    (g * size / n_global.max(1)).min(size.saturating_sub(1))
}

/// Send one record per index to the owner of the index, let the owner answer
/// every record from everything it received, and return the answers in the
/// order of `records`.
///
/// `records[k]` is `(global index, data)`. The owner calls `answer` with the
/// index and the data every holder sent for it, ordered by source rank.
fn ask_owners<C: Comm>(
    comm: &C,
    records: &[(usize, usize)],
    n_global: usize,
    answer: impl Fn(&[(usize, usize)]) -> Vec<usize>,
) -> Result<Vec<Vec<usize>>, BddcError> {
    let size = comm.size();
    let mut requests: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut pos: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (k, &(g, data)) in records.iter().enumerate() {
        if g >= n_global {
            return Err(BddcError::OutOfRange { what: "global index", value: g, lo: 0, hi: n_global });
        }
        let o = owner(g, n_global, size);
        requests.entry(o).or_default().extend([g, data]);
        pos.entry(o).or_default().push(k);
    }
    let inbox = comm.exchange::<usize>(requests.into_iter().collect())?;

    // (src, data) of every holder, by global index
    let mut holders: BTreeMap<usize, Vec<(usize, usize)>> = BTreeMap::new();
    for (src, words) in &inbox {
        for pair in words.chunks_exact(2) {
            holders.entry(pair[0]).or_default().push((*src, pair[1]));
        }
    }
    let replies = inbox
        .iter()
        .map(|(src, words)| {
            let mut reply = Vec::new();
            for pair in words.chunks_exact(2) {
                let held = holders.get(&pair[0]).map(Vec::as_slice).unwrap_or(&[]);
                let a = answer(held);
                reply.push(a.len());
                reply.extend(a);
            }
            (*src, reply)
        })
        .collect();
    let answers = comm.exchange::<usize>(replies)?;

    let mut out = vec![Vec::new(); records.len()];
    for (o, reply) in &answers {
        let locals = pos.get(o).map(Vec::as_slice).unwrap_or(&[]);
        let mut at = 0;
        for &k in locals {
            let short = || BddcError::Inconsistent(format!("short reply from rank {o}"));
            let cnt = *reply.get(at).ok_or_else(short)?;
            out[k] = reply.get(at + 1..at + 1 + cnt).ok_or_else(short)?.to_vec();
            at += 1 + cnt;
        }
    }
    Ok(out)
}

/// Ranks sharing each of the global indices `l2g` held by this rank.
pub fn local_sharers<C: Comm>(comm: &C, l2g: &[usize], n_global: usize) -> Result<Vec<Vec<usize>>, BddcError> {
    let records: Vec<(usize, usize)> = l2g.iter().map(|&g| (g, 0)).collect();
    let mut sharers = ask_owners(comm, &records, n_global, |held| held.iter().map(|&(src, _)| src).collect())?;
    for ranks in &mut sharers {
        ranks.dedup();
    }
    Ok(sharers)
}

/// Ranks sharing each local dof of each rank.
pub fn sharing_ranks(comm: &LocalComm, is: &MatIs) -> Result<Vec<Vec<Vec<usize>>>, BddcError> {
    let n_global = is.n_global();
    let inputs: Vec<&[usize]> = is.pieces().iter().map(|p| p.l2g.as_slice()).collect();
    comm.run(inputs, |c, l2g| local_sharers(c, l2g, n_global))
}

/// Smallest global index of the component of every interface dof, components
/// being taken over the local adjacency within each sharer set.
fn component_tags(piece: &LocalPiece, sharers: &[Vec<usize>], boundary: &[usize]) -> Vec<usize> {
    let n = piece.n_local();
    let mut tag = vec![usize::MAX; n];
    for &start in boundary {
        if tag[start] != usize::MAX {
            continue;
        }
        let ranks = &sharers[start];
        let mut comp = vec![start];
        tag[start] = 0;
        let mut queue = VecDeque::from([start]);
        while let Some(i) = queue.pop_front() {
            for j in piece.mat.neighbors(i) {
                if tag[j] == usize::MAX && sharers[j].len() > 1 && sharers[j] == *ranks {
                    tag[j] = 0;
                    comp.push(j);
                    queue.push_back(j);
                }
            }
        }
        let rep = comp.iter().map(|&i| piece.l2g[i]).min().unwrap_or(usize::MAX);
        for i in comp {
            tag[i] = rep;
        }
    }
    tag
}

/// Interface graph of the rank holding `piece`.
pub fn local_graph<C: Comm>(
    comm: &C,
    piece: &LocalPiece,
    n_global: usize,
    dim: usize,
) -> Result<InterfaceGraph, BddcError> {
    let n = piece.n_local();
    let sharers = local_sharers(comm, &piece.l2g, n_global)?;
    let (boundary, interior): (Vec<usize>, Vec<usize>) = (0..n).partition(|&i| sharers[i].len() > 1);

    let tag = component_tags(piece, &sharers, &boundary);
    let records: Vec<(usize, usize)> = boundary.iter().map(|&i| (piece.l2g[i], tag[i])).collect();
    let tags = ask_owners(comm, &records, n_global, |held| held.iter().map(|&(_, t)| t).collect())?;

    let mut classes: BTreeMap<(&[usize], &[usize]), Vec<usize>> = BTreeMap::new();
    for (k, &i) in boundary.iter().enumerate() {
        classes.entry((sharers[i].as_slice(), tags[k].as_slice())).or_default().push(i);
    }
    let mut entities: Vec<Entity> = classes
        .into_iter()
        .map(|((ranks, _), mut dofs)| {
            dofs.sort_by_key(|&i| piece.l2g[i]);
            let kind = match (dofs.len(), ranks.len()) {
                (1, _) => EntityKind::Vertex,
                (_, 2) if dim == 3 => EntityKind::Face,
                _ => EntityKind::Edge,
            };
            let global_rep = piece.l2g[dofs[0]];
            Entity { kind, dofs, sharers: ranks.to_vec(), global_rep }
        })
        .collect();
    entities.sort_by_key(|e| e.global_rep);

    let mut label = Label::new("bddc_entity");
    for (id, e) in entities.iter().enumerate() {
        for &d in &e.dofs {
            label.set_value(d, id as i32)?;
        }
    }
    label.create_index(0, n)?;
    Ok(InterfaceGraph { n_local: n, interior, boundary, sharers, entities, label })
}

/// Build the interface graph of every rank.
pub fn build_graphs(comm: &LocalComm, is: &MatIs, dim: usize) -> Result<Vec<InterfaceGraph>, BddcError> {
    let n_global = is.n_global();
    comm.run(is.pieces().iter().collect(), |c, piece| local_graph(c, piece, n_global, dim))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::CsrMatrix;

    /// 1D chain of 7 points split into 3 overlapping pieces: [0..=2], [2..=4], [4..=6]
    fn chain() -> MatIs {
        let piece = |start: usize| {
            let mut t = Vec::new();
            for i in 0..3 {
                t.push((i, i, 2.0));
                if i + 1 < 3 {
                    t.push((i, i + 1, -1.0));
                    t.push((i + 1, i, -1.0));
                }
            }
            LocalPiece::new((start..start + 3).collect(), CsrMatrix::from_triplets(3, 3, &t).unwrap())
        };
        MatIs::new(7, vec![piece(0), piece(2), piece(4)]).unwrap()
    }

    #[test]
    fn sharers_and_vertices_of_chain() {
        let comm = LocalComm::new(3);
        let graphs = build_graphs(&comm, &chain(), 1).unwrap();
        assert_eq!(graphs[1].sharers[0], vec![0, 1]);
        assert_eq!(graphs[1].sharers[2], vec![1, 2]);
        assert_eq!(graphs[1].interior, vec![1]);
        assert_eq!(graphs[1].boundary, vec![0, 2]);
        assert_eq!(graphs[1].count(EntityKind::Vertex), 2);
        assert_eq!(graphs[0].entities.len(), 1);
        assert_eq!(graphs[0].entities[0].global_rep, 2);
        assert_eq!(graphs[1].label.get_value(2), Some(1));
        assert_eq!(graphs[1].label.get_value(1), None);
    }

    /// Globals 1 and 2 are shared by both ranks. Rank 0 couples them directly;
    /// rank 1 only through its interior dof 3.
    fn uneven_coupling() -> MatIs {
        let path = [(0, 0, 2.0), (0, 1, -1.0), (1, 0, -1.0), (1, 1, 2.0), (1, 2, -1.0), (2, 1, -1.0), (2, 2, 2.0)];
        let detour = [(0, 0, 2.0), (0, 2, -1.0), (2, 0, -1.0), (2, 2, 2.0), (2, 1, -1.0), (1, 2, -1.0), (1, 1, 2.0)];
        let p0 = LocalPiece::new(vec![0, 1, 2], CsrMatrix::from_triplets(3, 3, &path).unwrap());
        let p1 = LocalPiece::new(vec![1, 2, 3], CsrMatrix::from_triplets(3, 3, &detour).unwrap());
        MatIs::new(4, vec![p0, p1]).unwrap()
    }

    #[test]
    fn sharers_agree_on_entities_when_couplings_differ() {
        let comm = LocalComm::new(2);
        let is = uneven_coupling();
        let graphs = build_graphs(&comm, &is, 2).unwrap();
        for (graph, piece) in graphs.iter().zip(is.pieces()) {
            let seen: Vec<(EntityKind, Vec<usize>)> = graph
                .entities
                .iter()
                .map(|e| (e.kind, e.dofs.iter().map(|&d| piece.l2g[d]).collect()))
                .collect();
            assert_eq!(seen, vec![(EntityKind::Vertex, vec![1]), (EntityKind::Vertex, vec![2])]);
        }
        let reps = |r: usize| graphs[r].entities.iter().map(|e| e.global_rep).collect::<Vec<_>>();
        assert_eq!(reps(0), reps(1));
    }

    #[test]
    fn sharers_of_one_rank_inside_a_kernel() {
        let comm = LocalComm::new(3);
        let is = chain();
        let got = comm
            .run(is.pieces().iter().collect(), |c, piece| local_sharers(c, &piece.l2g, 7))
            .unwrap();
        assert_eq!(got[2], vec![vec![1, 2], vec![2], vec![2]]);
    }
}
