//! Merging of local pieces onto fewer ranks.
//!
//! The coarse problem of a level has one piece per fine rank, which is far too
//! many for the next level. Ranks are grouped with an adjacency-guided bin
//! packing (edge weight = number of shared global indices) and every group's
//! pieces are sent to its root, which merges them into a single piece.

use std::collections::BTreeMap;

use crate::error::BddcError;
use crate::matrix::{CsrMatrix, LocalPiece, MatIs};
use crate::parallel::{Comm, LocalComm};
use crate::preconditioner::bddc::graph::sharing_ranks;

/// A rank as an item to be packed into a group.
#[derive(Debug, Clone)]
struct Item {
    rank: usize,
    /// `(neighbor rank, shared indices)`, sorted by rank.
    adj: Vec<(usize, u64)>,
}

/// Which ranks end up together.
#[derive(Clone, Debug, PartialEq)]
pub struct SubassemblyPattern {
    /// Members of every group, ascending; the first one is the root.
    pub groups: Vec<Vec<usize>>,
    /// Group of every rank (`None` for void ranks).
    pub group_of: Vec<Option<usize>>,
}

impl SubassemblyPattern {
    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn roots(&self) -> Vec<usize> {
        self.groups.iter().filter_map(|g| g.first().copied()).collect()
    }
}

fn rank_items(comm: &LocalComm, is: &MatIs) -> Result<Vec<Item>, BddcError> {
    let sharers = sharing_ranks(comm, is)?;
    Ok(sharers
        .iter()
        .enumerate()
        .filter(|(r, _)| is.piece(*r).n_local() > 0)
        .map(|(rank, per_dof)| {
            let mut weights: BTreeMap<usize, u64> = BTreeMap::new();
            for ranks in per_dof {
                for &s in ranks.iter().filter(|&&s| s != rank) {
                    *weights.entry(s).or_insert(0) += 1;
                }
            }
            Item { rank, adj: weights.into_iter().collect() }
        })
        .collect())
}

/// Group the active ranks of `is` into `ceil(active / ratio)` groups.
///
/// Each group is seeded with the lowest unassigned rank and grown with the
/// unassigned neighbor of heaviest connection to the group (lowest rank on
/// ties), or the lowest unassigned rank when the group has no free neighbor,
/// until it holds `ceil(active / groups)` ranks.
pub fn subassembling_pattern(
    comm: &LocalComm,
    is: &MatIs,
    coarsening_ratio: usize,
) -> Result<SubassemblyPattern, BddcError> {
    if coarsening_ratio == 0 {
        return Err(BddcError::OutOfRange { what: "coarsening ratio", value: 0, lo: 1, hi: usize::MAX });
    }
    let items = rank_items(comm, is)?;
    let size = is.n_ranks();
    let active = items.len();
    if active == 0 {
        let mut group_of = vec![None; size];
        if let Some(g) = group_of.first_mut() {
            *g = Some(0);
        }
        return Ok(SubassemblyPattern { groups: vec![vec![0]], group_of });
    }
    let n_groups = active.div_ceil(coarsening_ratio).max(1);
    let capacity = active.div_ceil(n_groups);
    let slot: BTreeMap<usize, usize> = items.iter().enumerate().map(|(k, it)| (it.rank, k)).collect();

    let mut group_of = vec![None; size];
    let mut unassigned: Vec<usize> = items.iter().map(|it| it.rank).collect();
    let mut groups = Vec::with_capacity(n_groups);
    while !unassigned.is_empty() {
        let gid = groups.len();
        let seed = unassigned.remove(0);
        group_of[seed] = Some(gid);
        let mut members = vec![seed];
        while members.len() < capacity && !unassigned.is_empty() {
            let mut gain: BTreeMap<usize, u64> = BTreeMap::new();
            for &m in &members {
                for &(nbr, w) in &items[slot[&m]].adj {
                    if group_of[nbr].is_none() && slot.contains_key(&nbr) {
                        *gain.entry(nbr).or_insert(0) += w;
                    }
                }
            }
            // max_by_key keeps the last maximum, iterate in reverse for the lowest rank
            let pick = gain
                .iter()
                .rev()
                .max_by_key(|&(_, &w)| w)
                .map(|(&r, _)| r)
                .unwrap_or(unassigned[0]);
            unassigned.retain(|&r| r != pick);
            group_of[pick] = Some(gid);
            members.push(pick);
        }
        members.sort_unstable();
        groups.push(members);
    }
    // roots in ascending order
    groups.sort_by_key(|g| g.first().copied());
    for (gid, members) in groups.iter().enumerate() {
        for &r in members {
            group_of[r] = Some(gid);
        }
    }
    log::debug!("subassembly: {active} active ranks into {} groups", groups.len());
    Ok(SubassemblyPattern { groups, group_of })
}

/// Send this rank's piece to the root of its group and merge what arrives.
///
/// Roots get the merged piece and the communicator of all roots; the other
/// ranks get `(None, None)`. Every rank of `comm` must enter.
pub fn subassemble_local<C: Comm>(
    comm: &C,
    piece: &LocalPiece,
    pattern: &SubassemblyPattern,
) -> Result<(Option<LocalPiece>, Option<C>), BddcError> {
    let rank = comm.rank();
    let roots = pattern.roots();
    let mut outgoing = Vec::new();
    if let Some(gid) = pattern.group_of.get(rank).copied().flatten() {
        let mut triplets: Vec<(usize, usize, f64)> = piece.l2g.iter().map(|&g| (g, g, 0.0)).collect();
        for i in 0..piece.n_local() {
            let (cols, vals) = piece.mat.row(i);
            triplets.extend(cols.iter().zip(vals).map(|(&j, &v)| (piece.l2g[i], piece.l2g[j], v)));
        }
        outgoing.push((roots[gid], triplets));
    }
    let inbox = comm.exchange(outgoing)?;

    let is_root = roots.binary_search(&rank).is_ok();
    let merged = if is_root {
        let mut l2g: Vec<usize> = inbox.iter().flat_map(|(_, t)| t.iter().map(|&(g, _, _)| g)).collect();
        l2g.sort_unstable();
        l2g.dedup();
        let local = |g: usize| {
            l2g.binary_search(&g)
                .map_err(|_| BddcError::Inconsistent(format!("global index {g} missing on root {rank}")))
        };
        let mut merged = Vec::new();
        for (_, t) in &inbox {
            for &(gi, gj, v) in t {
                merged.push((local(gi)?, local(gj)?, v));
            }
        }
        let n = l2g.len();
        let mat = CsrMatrix::from_triplets(n, n, &merged)?;
        Some(LocalPiece::new(l2g, mat))
    } else {
        None
    };
    let roots_comm = comm.split(is_root.then_some(0))?;
    Ok((merged, roots_comm))
}

/// Merge the pieces of every group on its root.
///
/// Returns the merged operator (one piece per group) and the communicator of
/// the group roots.
pub fn subassemble(comm: &LocalComm, is: &MatIs, pattern: &SubassemblyPattern) -> Result<(MatIs, LocalComm), BddcError> {
    let merged = comm.run(is.pieces().iter().collect(), |c, piece| Ok(subassemble_local(c, piece, pattern)?.0))?;
    let pieces: Vec<LocalPiece> = merged.into_iter().flatten().collect();
    Ok((MatIs::new(is.n_global(), pieces)?, comm.split(&pattern.roots())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::MatVec;
    use approx::assert_abs_diff_eq;

    /// 1D chain split into `k` pieces of 3 points overlapping at their ends.
    fn chain(k: usize) -> MatIs {
        let pieces = (0..k)
            .map(|r| {
                let t = [(0, 0, 1.0), (0, 1, -1.0), (1, 0, -1.0), (1, 1, 2.0), (1, 2, -1.0), (2, 1, -1.0), (2, 2, 1.0)];
                LocalPiece::new(vec![2 * r, 2 * r + 1, 2 * r + 2], CsrMatrix::from_triplets(3, 3, &t).unwrap())
            })
            .collect();
        MatIs::new(2 * k + 1, pieces).unwrap()
    }

    #[test]
    fn pattern_groups_neighbors() {
        let comm = LocalComm::new(6);
        let pattern = subassembling_pattern(&comm, &chain(6), 2).unwrap();
        assert_eq!(pattern.groups, vec![vec![0, 1], vec![2, 3], vec![4, 5]]);
        assert_eq!(pattern.roots(), vec![0, 2, 4]);
    }

    #[test]
    fn void_ranks_are_left_out() {
        let comm = LocalComm::new(3);
        let mut pieces = chain(2).pieces().to_vec();
        pieces.insert(1, LocalPiece::void());
        let is = MatIs::new(5, pieces).unwrap();
        let pattern = subassembling_pattern(&comm, &is, 4).unwrap();
        assert_eq!(pattern.groups, vec![vec![0, 2]]);
        assert_eq!(pattern.group_of[1], None);
    }

    #[test]
    fn subassembly_preserves_the_operator() {
        let comm = LocalComm::new(5);
        let is = chain(5);
        let pattern = subassembling_pattern(&comm, &is, 2).unwrap();
        let (merged, sub) = subassemble(&comm, &is, &pattern).unwrap();
        assert_eq!(merged.n_ranks(), 3);
        assert_eq!(sub.size(), 3);
        assert_eq!(sub.world_rank(2), 4);
        let x: Vec<f64> = (0..11).map(|i| (i as f64 * 0.7).sin()).collect();
        let (mut y0, mut y1) = (vec![0.0; 11], vec![0.0; 11]);
        is.matvec(&x, &mut y0);
        merged.matvec(&x, &mut y1);
        for (a, b) in y0.iter().zip(&y1) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-14);
        }
    }

    #[test]
    fn roots_keep_a_communicator_of_their_own() {
        let comm = LocalComm::new(4);
        let is = chain(4);
        let pattern = subassembling_pattern(&comm, &is, 2).unwrap();
        let got = comm
            .run(is.pieces().iter().collect(), |c, piece| {
                let (merged, roots) = subassemble_local(c, piece, &pattern)?;
                let rows = merged.map(|p| p.n_local());
                match roots {
                    Some(sub) => Ok((rows, Some((sub.rank(), sub.all_reduce_sum(c.rank())?)))),
                    None => Ok((rows, None)),
                }
            })
            .unwrap();
        assert_eq!(got[0], (Some(5), Some((0, 2))));
        assert_eq!(got[1], (None, None));
        assert_eq!(got[2], (Some(5), Some((1, 2))));
        assert_eq!(got[3], (None, None));
    }
}
