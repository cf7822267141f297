//! Globally consistent numbering of a subset of a key space.
//!
//! Every rank hands in the keys it holds (the same key may be held by several
//! ranks). The key space is split into contiguous blocks, one per rank; each
//! owner marks the keys it was sent by scatter-adding `1.0`, numbers the marked
//! positions of its block after an exclusive scan of the per-owner counts, and
//! answers in request order. Equal keys therefore get equal indices, and the
//! indices are contiguous starting at `offset`.

use std::collections::BTreeMap;

use crate::error::BddcError;
use crate::parallel::{Comm, LocalComm};

/// Result of a subset numbering.
#[derive(Clone, Debug, PartialEq)]
pub struct SubsetNumbering {
    /// Index of every local key, in input order.
    pub indices: Vec<Vec<usize>>,
    /// Number of distinct keys over all ranks.
    pub n_global: usize,
}

/// Index of every key in `keys` held by this rank, and the number of distinct
/// keys over all ranks.
pub fn local_subset_numbering<C: Comm>(
    comm: &C,
    keys: &[usize],
    key_space: usize,
    offset: usize,
) -> Result<(Vec<usize>, usize), BddcError> {
    let size = comm.size();
    let chunk = key_space.div_ceil(size.max(1)).max(1);
    let owner_of = |k: usize| k / chunk;

    let mut per_owner: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for &k in keys {
        if k >= key_space {
            return Err(BddcError::OutOfRange { what: "numbering key", value: k, lo: 0, hi: key_space });
        }
        per_owner.entry(owner_of(k)).or_default().push(k);
    }
    let inbox = comm.exchange::<usize>(per_owner.into_iter().collect())?;

    // mark this rank's block
    let me = comm.rank();
    let lo = (me * chunk).min(key_space);
    let hi = ((me + 1) * chunk).min(key_space);
    let mut marked = vec![0.0; hi - lo];
    for (_, held) in &inbox {
        for &k in held {
            let slot = k
                .checked_sub(lo)
                .and_then(|p| marked.get_mut(p))
                .ok_or(BddcError::OutOfRange { what: "numbering key", value: k, lo, hi })?;
            *slot += 1.0;
        }
    }
    let count = marked.iter().filter(|&&v| v > 0.0).count();
    let start = comm.exscan(count)?;
    let n_global = comm.all_reduce_sum(count)?;

    let mut local_index = vec![usize::MAX; marked.len()];
    let mut next = offset + start;
    for (pos, &m) in marked.iter().enumerate() {
        if m > 0.0 {
            local_index[pos] = next;
            next += 1;
        }
    }
    let replies = inbox
        .into_iter()
        .map(|(src, held)| (src, held.iter().map(|&k| local_index[k - lo]).collect::<Vec<usize>>()))
        .collect();
    let answers = comm.exchange::<usize>(replies)?;

    let by_owner: BTreeMap<usize, Vec<usize>> = answers.into_iter().collect();
    let mut cursor: BTreeMap<usize, usize> = BTreeMap::new();
    let mut out = Vec::with_capacity(keys.len());
    for &k in keys {
        let o = owner_of(k);
        let c = cursor.entry(o).or_insert(0);
        let idx = by_owner
            .get(&o)
            .and_then(|v| v.get(*c))
            .copied()
            .ok_or_else(|| BddcError::Inconsistent(format!("no index returned for key {k}")))?;
        *c += 1;
        out.push(idx);
    }
    Ok((out, n_global))
}

/// Subset numbering of the keys of every rank of `comm`.
pub fn subset_numbering(
    comm: &LocalComm,
    local_keys: &[Vec<usize>],
    key_space: usize,
    offset: usize,
) -> Result<SubsetNumbering, BddcError> {
    let size = comm.size();
    if local_keys.len() != size {
        return Err(BddcError::SizeMismatch { what: "ranks in numbering", expected: size, got: local_keys.len() });
    }
    let per_rank = comm.run(local_keys.iter().collect(), |c, keys| {
        local_subset_numbering(c, keys, key_space, offset)
    })?;
    let n_global = per_rank.first().map_or(0, |(_, n)| *n);
    let indices = per_rank.into_iter().map(|(idx, _)| idx).collect();
    Ok(SubsetNumbering { indices, n_global })
}
