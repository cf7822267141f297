//! Message passing between the ranks of one level.
//!
//! [`Comm`] is written from the point of view of one rank: every collective is
//! entered by all ranks of the communicator with their own input and returns
//! their own output. Backends only move words ([`Comm::all_to_all`]) and build
//! sub-communicators; the personalized exchange, reductions and scans used by
//! the setup phases are layered on top and may be overridden natively.
//!
//! Two backends ship with the crate: [`ThreadComm`], one thread per rank inside
//! this process, driven by [`LocalComm::run`]; and `MpiComm` (feature `mpi`),
//! one process per rank.

mod thread_comm;
#[cfg(feature = "mpi")]
mod mpi_comm;

pub use thread_comm::ThreadComm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

use std::panic::{self, AssertUnwindSafe};

use crate::error::BddcError;

/// Plain values that travel as 64-bit words.
pub trait Wire: Copy + Send + 'static {
    /// Words per value.
    const WORDS: usize;

    fn put(self, out: &mut Vec<u64>);

    /// Read one value from the first `WORDS` words.
    fn take(words: &[u64]) -> Self;
}

impl Wire for usize {
    const WORDS: usize = 1;
    fn put(self, out: &mut Vec<u64>) {
        out.push(self as u64);
    }
    fn take(words: &[u64]) -> Self {
        words[0] as usize
    }
}

impl Wire for i64 {
    const WORDS: usize = 1;
    fn put(self, out: &mut Vec<u64>) {
        out.push(self as u64);
    }
    fn take(words: &[u64]) -> Self {
        words[0] as i64
    }
}

impl Wire for f64 {
    const WORDS: usize = 1;
    fn put(self, out: &mut Vec<u64>) {
        out.push(self.to_bits());
    }
    fn take(words: &[u64]) -> Self {
        f64::from_bits(words[0])
    }
}

impl<A: Wire, B: Wire, C: Wire> Wire for (A, B, C) {
    const WORDS: usize = A::WORDS + B::WORDS + C::WORDS;
    fn put(self, out: &mut Vec<u64>) {
        self.0.put(out);
        self.1.put(out);
        self.2.put(out);
    }
    fn take(words: &[u64]) -> Self {
        let (a, rest) = words.split_at(A::WORDS);
        let (b, c) = rest.split_at(B::WORDS);
        (A::take(a), B::take(b), C::take(c))
    }
}

pub(crate) fn encode<T: Wire>(values: &[T], out: &mut Vec<u64>) {
    out.reserve(values.len() * T::WORDS);
    for &v in values {
        v.put(out);
    }
}

pub(crate) fn decode<T: Wire>(words: &[u64]) -> Result<Vec<T>, BddcError> {
    if words.len() % T::WORDS != 0 {
        return Err(BddcError::Inconsistent(format!(
            "{} words do not split into values of {} words",
            words.len(),
            T::WORDS
        )));
    }
    Ok(words.chunks_exact(T::WORDS).map(T::take).collect())
}

/// Collective operations over a group of ranks, seen from one rank.
pub trait Comm: Sized {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// `send[dst]` goes to rank `dst`; the result holds what every rank sent
    /// here, indexed by source.
    fn all_to_all(&self, send: Vec<Vec<u64>>) -> Result<Vec<Vec<u64>>, BddcError>;

    /// Ranks passing the same `Some(color)` form a new communicator, ranked in
    /// the order of their current rank. `None` opts out.
    fn split(&self, color: Option<usize>) -> Result<Option<Self>, BddcError>;

    /// Personalized exchange of `(dst, payload)` messages. Message counts and
    /// lengths are gathered first, then the payloads follow. The result lists
    /// the `(src, payload)` pairs received, ordered by source rank.
    fn exchange<T: Wire>(
        &self,
        outgoing: Vec<(usize, Vec<T>)>,
    ) -> Result<Vec<(usize, Vec<T>)>, BddcError> {
        let size = self.size();
        let mut headers = vec![Vec::new(); size];
        let mut bodies = vec![Vec::new(); size];
        for (dst, payload) in &outgoing {
            if *dst >= size {
                return Err(BddcError::OutOfRange { what: "destination rank", value: *dst, lo: 0, hi: size });
            }
            headers[*dst].push(payload.len() as u64);
            encode(payload, &mut bodies[*dst]);
        }
        let lengths = self.all_to_all(headers)?;
        let bodies = self.all_to_all(bodies)?;
        let mut received = Vec::new();
        for (src, (lens, words)) in lengths.iter().zip(&bodies).enumerate() {
            let mut at = 0;
            for &len in lens {
                let n = len as usize * T::WORDS;
                let chunk = words.get(at..at + n).ok_or(BddcError::SizeMismatch {
                    what: "message words",
                    expected: at + n,
                    got: words.len(),
                })?;
                received.push((src, decode(chunk)?));
                at += n;
            }
            if at != words.len() {
                return Err(BddcError::SizeMismatch { what: "message words", expected: at, got: words.len() });
            }
        }
        Ok(received)
    }

    fn all_reduce_sum(&self, local: usize) -> Result<usize, BddcError> {
        let got = self.all_to_all(vec![vec![local as u64]; self.size()])?;
        Ok(got.iter().flatten().map(|&w| w as usize).sum())
    }

    fn all_reduce_max(&self, local: usize) -> Result<usize, BddcError> {
        let got = self.all_to_all(vec![vec![local as u64]; self.size()])?;
        Ok(got.iter().flatten().map(|&w| w as usize).max().unwrap_or(0))
    }

    /// Sum of `local` over the ranks below this one.
    fn exscan(&self, local: usize) -> Result<usize, BddcError> {
        let got = self.all_to_all(vec![vec![local as u64]; self.size()])?;
        Ok(got[..self.rank()].iter().flatten().map(|&w| w as usize).sum())
    }
}

/// Driver of the ranks of one level held in this process.
///
/// `LocalComm` owns the whole level: it knows every member and runs an SPMD
/// kernel on all of them at once with [`LocalComm::run`].
#[derive(Clone, Debug)]
pub struct LocalComm {
    /// Rank of every member in the root communicator.
    world_ranks: Vec<usize>,
}

impl LocalComm {
    pub fn new(size: usize) -> Self {
        Self { world_ranks: (0..size).collect() }
    }

    pub fn size(&self) -> usize {
        self.world_ranks.len()
    }

    /// Sub-communicator made of `members` (ranks of `self`, in order).
    pub fn split(&self, members: &[usize]) -> Result<Self, BddcError> {
        let size = self.size();
        let world_ranks = members
            .iter()
            .map(|&r| {
                self.world_ranks
                    .get(r)
                    .copied()
                    .ok_or(BddcError::OutOfRange { what: "rank", value: r, lo: 0, hi: size })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { world_ranks })
    }

    pub fn world_rank(&self, rank: usize) -> usize {
        self.world_ranks[rank]
    }

    /// Run `f` once per rank, each on its own thread with its own endpoint.
    ///
    /// `inputs[r]` goes to rank `r`; the outputs come back in rank order. A
    /// rank that fails or panics aborts the collectives the others are
    /// waiting in, and the first error that is not such an abort is returned.
    pub fn run<I, R, F>(&self, inputs: Vec<I>, f: F) -> Result<Vec<R>, BddcError>
    where
        I: Send,
        R: Send,
        F: Fn(&ThreadComm, I) -> Result<R, BddcError> + Sync,
    {
        let size = self.size();
        if inputs.len() != size {
            return Err(BddcError::SizeMismatch { what: "inputs per rank", expected: size, got: inputs.len() });
        }
        let endpoints = ThreadComm::endpoints(size);
        let f = &f;
        let outcomes: Vec<Result<R, BddcError>> = std::thread::scope(|s| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .zip(inputs)
                .map(|(comm, input)| {
                    s.spawn(move || {
                        let rank = comm.rank();
                        let out = panic::catch_unwind(AssertUnwindSafe(|| f(&comm, input)))
                            .unwrap_or_else(|_| Err(BddcError::Inconsistent(format!("rank {rank} panicked"))));
                        if out.is_err() {
                            comm.abort();
                        }
                        out
                    })
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, h)| {
                    h.join()
                        .unwrap_or_else(|_| Err(BddcError::Inconsistent(format!("rank {rank} panicked"))))
                })
                .collect()
        });
        let mut first_abort = None;
        let mut results = Vec::with_capacity(size);
        for out in outcomes {
            match out {
                Ok(r) => results.push(r),
                Err(BddcError::Aborted(r)) => {
                    if first_abort.is_none() {
                        first_abort = Some(BddcError::Aborted(r));
                    }
                }
                Err(e) => return Err(e),
            }
        }
        match first_abort {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }

    /// Largest of one value per rank.
    pub fn all_reduce_max(&self, local: &[usize]) -> Result<usize, BddcError> {
        let per_rank = self.run(local.to_vec(), |c, x| c.all_reduce_max(x))?;
        Ok(per_rank.first().copied().unwrap_or(0))
    }

    /// Exclusive prefix sum of one count per rank.
    pub fn exscan(&self, local: &[usize]) -> Result<Vec<usize>, BddcError> {
        self.run(local.to_vec(), |c, x| c.exscan(x))
    }
}
