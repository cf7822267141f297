//! Integer labels over point ranges.
//!
//! A `Label` maps points (local dof indices here) to integer values. All points
//! with the same value form a stratum. Each stratum is either `Hashed` (cheap
//! inserts and removals) or `Sorted` (a sorted unique array, binary-searchable).
//! Mutations move a stratum to `Hashed`; queries that need order move it to
//! `Sorted`. An optional bitmap index over `[p_start, p_end)` answers
//! membership in O(1).

use std::collections::HashSet;

use crate::error::BddcError;
use crate::parallel::{Comm, LocalComm};

#[derive(Clone, Debug)]
enum Points {
    Hashed(HashSet<usize>),
    Sorted(Vec<usize>),
}

#[derive(Clone, Debug)]
struct Stratum {
    value: i32,
    points: Points,
}

impl Stratum {
    fn new(value: i32) -> Self {
        Self { value, points: Points::Sorted(Vec::new()) }
    }

    fn make_valid(&mut self) {
        if let Points::Hashed(set) = &mut self.points {
            let mut sorted: Vec<usize> = set.drain().collect();
            sorted.sort_unstable();
            self.points = Points::Sorted(sorted);
        }
    }

    fn make_invalid(&mut self) {
        if let Points::Sorted(v) = &mut self.points {
            let set = v.drain(..).collect();
            self.points = Points::Hashed(set);
        }
    }

    /// Run `f` on the hashed form, leaving the stratum hashed.
    fn with_hashed<R>(&mut self, f: impl FnOnce(&mut HashSet<usize>) -> R) -> R {
        let mut set = match std::mem::replace(&mut self.points, Points::Sorted(Vec::new())) {
            Points::Hashed(set) => set,
            Points::Sorted(v) => v.into_iter().collect(),
        };
        let out = f(&mut set);
        self.points = Points::Hashed(set);
        out
    }

    fn contains(&self, point: usize) -> bool {
        match &self.points {
            Points::Hashed(set) => set.contains(&point),
            Points::Sorted(v) => v.binary_search(&point).is_ok(),
        }
    }

    fn len(&self) -> usize {
        match &self.points {
            Points::Hashed(set) => set.len(),
            Points::Sorted(v) => v.len(),
        }
    }

    fn iter(&self) -> Box<dyn Iterator<Item = usize> + '_> {
        match &self.points {
            Points::Hashed(set) => Box::new(set.iter().copied()),
            Points::Sorted(v) => Box::new(v.iter().copied()),
        }
    }
}

#[derive(Clone, Debug)]
struct PointIndex {
    p_start: usize,
    p_end: usize,
    bits: Vec<bool>,
}

#[derive(Clone, Debug)]
pub struct Label {
    name: String,
    strata: Vec<Stratum>,
    index: Option<PointIndex>,
}

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), strata: Vec::new(), index: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn stratum_pos(&self, value: i32) -> Option<usize> {
        self.strata.iter().position(|s| s.value == value)
    }

    /// Assign `value` to `point`. A point carries at most one value, so any
    /// previous assignment is dropped.
    pub fn set_value(&mut self, point: usize, value: i32) -> Result<(), BddcError> {
        if let Some(idx) = &mut self.index {
            if point < idx.p_start || point >= idx.p_end {
                return Err(BddcError::OutOfRange { what: "label point", value: point, lo: idx.p_start, hi: idx.p_end });
            }
            idx.bits[point - idx.p_start] = true;
        }
        for s in self.strata.iter_mut().filter(|s| s.value != value) {
            if s.contains(point) {
                s.with_hashed(|set| set.remove(&point));
            }
        }
        let pos = match self.stratum_pos(value) {
            Some(p) => p,
            None => {
                self.strata.push(Stratum::new(value));
                self.strata.len() - 1
            }
        };
        self.strata[pos].with_hashed(|set| set.insert(point));
        Ok(())
    }

    /// Value of `point`, `None` when unlabeled.
    pub fn get_value(&self, point: usize) -> Option<i32> {
        if let Some(idx) = &self.index {
            if point >= idx.p_start && point < idx.p_end && !idx.bits[point - idx.p_start] {
                return None;
            }
        }
        self.strata.iter().find(|s| s.contains(point)).map(|s| s.value)
    }

    /// Remove `point` from the stratum of `value` (no-op if it is not there).
    pub fn clear_value(&mut self, point: usize, value: i32) {
        let Some(pos) = self.stratum_pos(value) else { return };
        if !self.strata[pos].contains(point) {
            return;
        }
        self.strata[pos].with_hashed(|set| set.remove(&point));
        if let Some(idx) = &mut self.index {
            if point >= idx.p_start && point < idx.p_end {
                idx.bits[point - idx.p_start] = false;
            }
        }
    }

    /// Convert every stratum to its sorted form.
    pub fn make_valid(&mut self) {
        self.strata.iter_mut().for_each(Stratum::make_valid);
    }

    /// Convert every stratum to its hashed form.
    pub fn make_invalid(&mut self) {
        self.strata.iter_mut().for_each(Stratum::make_invalid);
    }

    /// Whether the stratum of `value` is in sorted form. Unknown values are trivially valid.
    pub fn is_valid(&self, value: i32) -> bool {
        self.stratum_pos(value)
            .map(|p| matches!(self.strata[p].points, Points::Sorted(_)))
            .unwrap_or(true)
    }

    /// Build the membership bitmap over `[p_start, p_end)`.
    pub fn create_index(&mut self, p_start: usize, p_end: usize) -> Result<(), BddcError> {
        self.make_valid();
        let mut bits = vec![false; p_end.saturating_sub(p_start)];
        for s in &self.strata {
            for p in s.iter() {
                if p < p_start || p >= p_end {
                    return Err(BddcError::OutOfRange { what: "label point", value: p, lo: p_start, hi: p_end });
                }
                bits[p - p_start] = true;
            }
        }
        self.index = Some(PointIndex { p_start, p_end, bits });
        Ok(())
    }

    pub fn destroy_index(&mut self) {
        self.index = None;
    }

    /// O(1) membership through the index.
    pub fn has_point(&self, point: usize) -> Result<bool, BddcError> {
        let idx = self.index.as_ref().ok_or(BddcError::Setup("Label::has_point"))?;
        if point < idx.p_start || point >= idx.p_end {
            return Err(BddcError::OutOfRange { what: "label point", value: point, lo: idx.p_start, hi: idx.p_end });
        }
        Ok(idx.bits[point - idx.p_start])
    }

    pub fn num_strata(&self) -> usize {
        self.strata.len()
    }

    /// Stratum values in ascending order.
    pub fn values(&self) -> Vec<i32> {
        let mut v: Vec<i32> = self.strata.iter().map(|s| s.value).collect();
        v.sort_unstable();
        v
    }

    pub fn stratum_size(&self, value: i32) -> usize {
        self.stratum_pos(value).map(|p| self.strata[p].len()).unwrap_or(0)
    }

    /// Sorted points of the stratum of `value`.
    pub fn stratum_points(&mut self, value: i32) -> Vec<usize> {
        match self.stratum_pos(value) {
            Some(p) => {
                self.strata[p].make_valid();
                self.strata[p].iter().collect()
            }
            None => Vec::new(),
        }
    }

    /// Redistribute this label (defined on rank 0, in global point numbers)
    /// onto a new layout. `partition[r]` is the sorted list of global points
    /// owned by rank `r`; the label received by `r` is numbered by position in
    /// that list.
    pub fn distribute(&self, comm: &LocalComm, partition: &[Vec<usize>]) -> Result<Vec<Label>, BddcError> {
        let size = comm.size();
        if partition.len() != size {
            return Err(BddcError::SizeMismatch { what: "partition ranks", expected: size, got: partition.len() });
        }
        let inputs = partition.iter().enumerate().map(|(r, owned)| ((r == 0).then_some(self), owned.as_slice()));
        comm.run(inputs.collect(), |c, (root, owned)| Label::receive(c, root, owned))
    }

    /// This rank's part of a label held by rank 0, which passes it as `root`.
    ///
    /// Every rank sends its sorted `owned` points to rank 0. Rank 0 broadcasts
    /// the definition (name and stratum values) and sends each rank the
    /// intersection of every stratum with its points, found by a merge scan of
    /// the two sorted lists.
    pub fn receive<C: Comm>(comm: &C, root: Option<&Label>, owned: &[usize]) -> Result<Label, BddcError> {
        if owned.windows(2).any(|w| w[0] >= w[1]) {
            return Err(BddcError::Inconsistent(format!("partition of rank {} is not sorted", comm.rank())));
        }
        let layouts = comm.exchange::<usize>(vec![(0, owned.to_vec())])?;

        let (mut defs, mut members) = (Vec::new(), Vec::new());
        if comm.rank() == 0 {
            let mut label = root.ok_or_else(|| BddcError::Inconsistent("rank 0 holds no label".into()))?.clone();
            label.make_valid();
            let values = label.values();
            let mut def: Vec<i64> = vec![label.name.len() as i64];
            def.extend(label.name.bytes().map(i64::from));
            def.extend(values.iter().map(|&v| i64::from(v)));
            // [value, count, local points...] per stratum
            for (dst, owned) in &layouts {
                let mut msg = Vec::new();
                for &value in &values {
                    let local = merge_intersect(&label.stratum_points(value), owned);
                    msg.push(i64::from(value));
                    msg.push(local.len() as i64);
                    msg.extend(local.into_iter().map(|p| p as i64));
                }
                defs.push((*dst, def.clone()));
                members.push((*dst, msg));
            }
        }
        let defs = comm.exchange(defs)?;
        let members = comm.exchange(members)?;

        let truncated = || BddcError::Inconsistent(format!("truncated label message for rank {}", comm.rank()));
        let def = defs.first().map(|(_, d)| d.as_slice()).ok_or_else(truncated)?;
        let name_len = *def.first().ok_or_else(truncated)? as usize;
        let name_bytes = def.get(1..1 + name_len).ok_or_else(truncated)?;
        let name = String::from_utf8(name_bytes.iter().map(|&b| b as u8).collect()).map_err(|_| truncated())?;
        let mut label = Label::new(name);
        for &v in &def[1 + name_len..] {
            label.strata.push(Stratum::new(v as i32));
        }
        for (_, msg) in members {
            let mut k = 0;
            while k + 1 < msg.len() {
                let (value, count) = (msg[k] as i32, msg[k + 1] as usize);
                let pts = msg.get(k + 2..k + 2 + count).ok_or_else(truncated)?;
                for &p in pts {
                    label.set_value(p as usize, value)?;
                }
                k += 2 + count;
            }
        }
        label.make_valid();
        Ok(label)
    }
}

/// Positions in `owned` of the points common to both sorted lists.
fn merge_intersect(points: &[usize], owned: &[usize]) -> Vec<usize> {
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::new();
    while i < points.len() && j < owned.len() {
        match points[i].cmp(&owned[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(j);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_clear() {
        let mut label = Label::new("interface");
        label.set_value(3, 7).unwrap();
        label.set_value(5, 7).unwrap();
        assert_eq!(label.get_value(3), Some(7));
        assert!(!label.is_valid(7));
        label.clear_value(3, 7);
        assert_eq!(label.get_value(3), None);
        label.set_value(5, 2).unwrap();
        assert_eq!(label.get_value(5), Some(2));
        assert_eq!(label.stratum_size(7), 0);
    }

    #[test]
    fn make_valid_is_idempotent() {
        let mut label = Label::new("l");
        for p in [9, 1, 4] {
            label.set_value(p, 0).unwrap();
        }
        label.make_valid();
        label.make_valid();
        assert!(label.is_valid(0));
        assert_eq!(label.stratum_points(0), vec![1, 4, 9]);
        label.make_invalid();
        label.make_invalid();
        assert!(!label.is_valid(0));
        assert_eq!(label.get_value(4), Some(0));
    }

    #[test]
    fn index_rejects_points_outside_range() {
        let mut label = Label::new("l");
        label.set_value(12, 1).unwrap();
        let err = label.create_index(0, 10).unwrap_err();
        assert_eq!(err.to_string(), "label point 12 must be in [0,10)");
        label.create_index(0, 20).unwrap();
        assert!(label.has_point(12).unwrap());
        assert!(!label.has_point(11).unwrap());
        assert!(label.has_point(20).is_err());
    }

    #[test]
    fn distribute_renumbers_locally() {
        let mut label = Label::new("corners");
        for (p, v) in [(0, 1), (3, 1), (5, 2), (8, 2)] {
            label.set_value(p, v).unwrap();
        }
        let comm = LocalComm::new(2);
        let parts = vec![vec![0, 1, 2, 3, 4], vec![3, 5, 6, 8]];
        let local = label.distribute(&comm, &parts).unwrap();
        assert_eq!(local[0].get_value(0), Some(1));
        assert_eq!(local[0].get_value(3), Some(1));
        assert_eq!(local[1].get_value(0), Some(1));
        assert_eq!(local[1].get_value(1), Some(2));
        assert_eq!(local[1].get_value(3), Some(2));
        assert_eq!(local[0].values(), vec![1, 2]);
        assert_eq!(local[0].name(), "corners");
        assert_eq!(local[1].name(), "corners");
    }

    #[test]
    fn unsorted_partition_is_rejected() {
        let label = Label::new("l");
        let comm = LocalComm::new(2);
        let err = label.distribute(&comm, &[vec![0, 1], vec![4, 2]]).unwrap_err();
        assert_eq!(err, BddcError::Inconsistent("partition of rank 1 is not sorted".into()));
    }
}
