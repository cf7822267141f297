//! In-process backend: one thread per rank, one channel per rank.
//!
//! Every packet carries the id of the communicator it belongs to and the
//! sequence number of the collective on that communicator, so a rank that is
//! ahead of a peer (or busy in a sub-communicator) never mixes up traffic:
//! packets that do not match the collective being waited on are parked until
//! their turn comes.

use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use super::Comm;
use crate::error::BddcError;

enum Body {
    Words(Vec<u64>),
    Abort,
}

struct Packet {
    comm: u64,
    seq: u64,
    /// Rank of the sender in the communicator `comm`; world index for aborts.
    src: usize,
    body: Body,
}

struct Endpoint {
    /// World index of the owning rank.
    world: usize,
    peers: Vec<Sender<Packet>>,
    inbox: Mutex<Receiver<Packet>>,
    pending: Mutex<Vec<Packet>>,
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, BddcError> {
    m.lock().map_err(|_| BddcError::Inconsistent("rank mailbox poisoned".into()))
}

/// Endpoint of one rank in a group of threads.
pub struct ThreadComm {
    id: u64,
    rank: usize,
    /// World index of every member.
    members: Vec<usize>,
    seq: Cell<u64>,
    endpoint: Arc<Endpoint>,
}

impl ThreadComm {
    /// Connected endpoints of a fresh world of `size` ranks.
    pub(crate) fn endpoints(size: usize) -> Vec<Self> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| mpsc::channel()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(world, inbox)| Self {
                id: 0,
                rank: world,
                members: (0..size).collect(),
                seq: Cell::new(0),
                endpoint: Arc::new(Endpoint {
                    world,
                    peers: senders.clone(),
                    inbox: Mutex::new(inbox),
                    pending: Mutex::new(Vec::new()),
                }),
            })
            .collect()
    }

    /// Tell every rank of the world that this one stopped taking part.
    pub(crate) fn abort(&self) {
        for peer in &self.endpoint.peers {
            // a peer that already finished has nothing left to wait for
            let _ = peer.send(Packet { comm: self.id, seq: u64::MAX, src: self.endpoint.world, body: Body::Abort });
        }
    }

    fn next_seq(&self) -> u64 {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        seq
    }

    /// File `packet` into `got` if it belongs to collective `seq`, hand it back otherwise.
    fn accept(
        &self,
        packet: Packet,
        seq: u64,
        got: &mut [Option<Vec<u64>>],
        missing: &mut usize,
    ) -> Result<Option<Packet>, BddcError> {
        match packet.body {
            Body::Abort => Err(BddcError::Aborted(packet.src)),
            Body::Words(words) if packet.comm == self.id && packet.seq == seq => {
                let slot = got.get_mut(packet.src).ok_or(BddcError::OutOfRange {
                    what: "source rank",
                    value: packet.src,
                    lo: 0,
                    hi: self.members.len(),
                })?;
                if slot.replace(words).is_some() {
                    return Err(BddcError::Inconsistent(format!("rank {} sent twice in one collective", packet.src)));
                }
                *missing -= 1;
                Ok(None)
            }
            body => Ok(Some(Packet { body, ..packet })),
        }
    }

    fn receive(&self, seq: u64) -> Result<Vec<Vec<u64>>, BddcError> {
        let size = self.members.len();
        let mut got: Vec<Option<Vec<u64>>> = vec![None; size];
        let mut missing = size;
        {
            let mut pending = lock(&self.endpoint.pending)?;
            let parked = std::mem::take(&mut *pending);
            for packet in parked {
                if let Some(other) = self.accept(packet, seq, &mut got, &mut missing)? {
                    pending.push(other);
                }
            }
        }
        let inbox = lock(&self.endpoint.inbox)?;
        while missing > 0 {
            let packet = inbox.recv().map_err(|_| BddcError::Inconsistent("rank mailbox closed".into()))?;
            if let Some(other) = self.accept(packet, seq, &mut got, &mut missing)? {
                lock(&self.endpoint.pending)?.push(other);
            }
        }
        Ok(got.into_iter().map(Option::unwrap_or_default).collect())
    }
}

impl Comm for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.members.len()
    }

    fn all_to_all(&self, send: Vec<Vec<u64>>) -> Result<Vec<Vec<u64>>, BddcError> {
        if send.len() != self.size() {
            return Err(BddcError::SizeMismatch { what: "all-to-all buffers", expected: self.size(), got: send.len() });
        }
        let seq = self.next_seq();
        for (dst, words) in send.into_iter().enumerate() {
            let packet = Packet { comm: self.id, seq, src: self.rank, body: Body::Words(words) };
            // a peer only hangs up after leaving the kernel early
            let world = self.members[dst];
            self.endpoint.peers[world].send(packet).map_err(|_| BddcError::Aborted(world))?;
        }
        self.receive(seq)
    }

    fn split(&self, color: Option<usize>) -> Result<Option<Self>, BddcError> {
        let seq = self.seq.get();
        let word = color.map_or(u64::MAX, |c| c as u64);
        let colors = self.all_to_all(vec![vec![word]; self.size()])?;
        let Some(color) = color else {
            return Ok(None);
        };
        let ranks: Vec<usize> = (0..self.size()).filter(|&r| colors[r].first() == Some(&(color as u64))).collect();
        let rank = ranks
            .iter()
            .position(|&r| r == self.rank)
            .ok_or_else(|| BddcError::Inconsistent("rank missing from its own color".into()))?;
        let mut h = DefaultHasher::new();
        (self.id, seq, color).hash(&mut h);
        Ok(Some(Self {
            id: h.finish(),
            rank,
            members: ranks.iter().map(|&r| self.members[r]).collect(),
            seq: Cell::new(0),
            endpoint: Arc::clone(&self.endpoint),
        }))
    }
}
