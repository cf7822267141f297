//! MPI backend of [`Comm`], one process per rank.
//!
//! Only available with the `mpi` feature. The all-to-all is a two-step
//! exchange: counts with `MPI_Alltoall`, then the words with
//! `MPI_Alltoallv`. Reductions and the scan map to their MPI collectives.
//!
//! ```no_run
//! # #[cfg(feature = "mpi")]
//! # {
//! use kryst_bddc::{Comm, MpiComm};
//! let universe = mpi::initialize().unwrap();
//! let comm = MpiComm::new(universe.world());
//! println!("rank {} of {}", comm.rank(), comm.size());
//! # }
//! ```

use mpi::Count;
use mpi::collective::SystemOperation;
use mpi::datatype::{Partition, PartitionMut};
use mpi::topology::{Color, SimpleCommunicator};
use mpi::traits::*;

use super::Comm;
use crate::error::BddcError;

/// Wrapper of an MPI communicator.
pub struct MpiComm {
    comm: SimpleCommunicator,
}

impl MpiComm {
    /// `mpi::initialize()` must have been called and its universe kept alive.
    pub fn new(comm: SimpleCommunicator) -> Self {
        Self { comm }
    }

    pub fn raw(&self) -> &SimpleCommunicator {
        &self.comm
    }
}

fn count(n: usize) -> Result<Count, BddcError> {
    Count::try_from(n).map_err(|_| BddcError::OutOfRange {
        what: "message length",
        value: n,
        lo: 0,
        hi: Count::MAX as usize,
    })
}

fn displacements(counts: &[Count]) -> Vec<Count> {
    counts
        .iter()
        .scan(0, |acc, &n| {
            let d = *acc;
            *acc += n;
            Some(d)
        })
        .collect()
}

impl Comm for MpiComm {
    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn all_to_all(&self, send: Vec<Vec<u64>>) -> Result<Vec<Vec<u64>>, BddcError> {
        let size = self.size();
        if send.len() != size {
            return Err(BddcError::SizeMismatch { what: "all-to-all buffers", expected: size, got: send.len() });
        }
        let send_counts = send.iter().map(|v| count(v.len())).collect::<Result<Vec<_>, _>>()?;
        let mut recv_counts: Vec<Count> = vec![0; size];
        self.comm.all_to_all_into(&send_counts[..], &mut recv_counts[..]);

        let send_displs = displacements(&send_counts);
        let recv_displs = displacements(&recv_counts);
        let buf: Vec<u64> = send.concat();
        let total: usize = recv_counts.iter().map(|&c| c as usize).sum();
        let mut recv = vec![0u64; total];
        {
            let sp = Partition::new(&buf[..], &send_counts[..], &send_displs[..]);
            let mut rp = PartitionMut::new(&mut recv[..], &recv_counts[..], &recv_displs[..]);
            self.comm.all_to_all_varcount_into(&sp, &mut rp);
        }
        Ok(recv_counts
            .iter()
            .zip(&recv_displs)
            .map(|(&c, &d)| recv[d as usize..(d + c) as usize].to_vec())
            .collect())
    }

    fn split(&self, color: Option<usize>) -> Result<Option<Self>, BddcError> {
        let color = match color {
            Some(c) => Color::with_value(i32::try_from(c).map_err(|_| BddcError::OutOfRange {
                what: "split color",
                value: c,
                lo: 0,
                hi: i32::MAX as usize,
            })?),
            None => Color::undefined(),
        };
        Ok(self.comm.split_by_color(color).map(Self::new))
    }

    fn all_reduce_sum(&self, local: usize) -> Result<usize, BddcError> {
        let mut global = 0u64;
        self.comm.all_reduce_into(&(local as u64), &mut global, SystemOperation::sum());
        Ok(global as usize)
    }

    fn all_reduce_max(&self, local: usize) -> Result<usize, BddcError> {
        let mut global = 0u64;
        self.comm.all_reduce_into(&(local as u64), &mut global, SystemOperation::max());
        Ok(global as usize)
    }

    fn exscan(&self, local: usize) -> Result<usize, BddcError> {
        let mut below = 0u64;
        self.comm.exclusive_scan_into(&(local as u64), &mut below, SystemOperation::sum());
        // the receive buffer of rank 0 is left undefined by MPI_Exscan
        Ok(if self.rank() == 0 { 0 } else { below as usize })
    }
}
