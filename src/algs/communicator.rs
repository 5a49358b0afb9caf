//! Thin façade over in-process or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices*. Point-to-point sends are buffered
//! and never block; receives block until the matching message arrives.
//! Collectives are built on the byte-level `allgatherv` and must be entered
//! in the same order on every rank, or the run deadlocks.

use crate::algs::wire;
use crate::mesh_error::MeshError;
use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

/// Blocking message-passing interface.
pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Buffered send of `buf` to `peer`.
    fn send(&self, peer: usize, tag: u16, buf: &[u8]) -> Result<(), MeshError>;

    /// Blocking receive of the next message from `peer` with `tag`.
    fn recv(&self, peer: usize, tag: u16) -> Result<Vec<u8>, MeshError>;

    /// Variable all-gather: every rank contributes `buf` and receives every
    /// rank's contribution, indexed by rank.
    fn allgatherv(&self, buf: &[u8]) -> Result<Vec<Vec<u8>>, MeshError>;

    /// Terminate every rank with `code`.
    fn abort(&self, code: i32) -> !;

    fn barrier(&self) -> Result<(), MeshError> {
        self.allgatherv(&[]).map(|_| ())
    }

    fn allgatherv_f64(&self, local: &[f64]) -> Result<Vec<Vec<f64>>, MeshError> {
        self.allgatherv(wire::encode_f64(local))?
            .iter()
            .map(|b| wire::decode_f64(b))
            .collect()
    }

    fn allgatherv_u64(&self, local: &[u64]) -> Result<Vec<Vec<u64>>, MeshError> {
        self.allgatherv(wire::encode_u64(local))?
            .iter()
            .map(|b| wire::decode_u64(b))
            .collect()
    }

    fn allgather_u64(&self, value: u64) -> Result<Vec<u64>, MeshError> {
        let parts = self.allgatherv_u64(&[value])?;
        parts
            .into_iter()
            .map(|p| {
                p.first()
                    .copied()
                    .ok_or_else(|| MeshError::Comm("empty all-gather contribution".into()))
            })
            .collect()
    }

    /// Element-wise sum over ranks. Every rank must pass the same length.
    fn allreduce_sum_f64(&self, local: &[f64]) -> Result<Vec<f64>, MeshError> {
        let parts = self.allgatherv_f64(local)?;
        let mut out = vec![0.0; local.len()];
        // Summed in rank order so every rank gets bit-identical results.
        for p in &parts {
            if p.len() != out.len() {
                return Err(MeshError::Comm(format!(
                    "all-reduce length mismatch: {} vs {}",
                    p.len(),
                    out.len()
                )));
            }
            for (o, v) in out.iter_mut().zip(p) {
                *o += v;
            }
        }
        Ok(out)
    }

    fn allreduce_sum_u64(&self, local: &[u64]) -> Result<Vec<u64>, MeshError> {
        let parts = self.allgatherv_u64(local)?;
        let mut out = vec![0u64; local.len()];
        for p in &parts {
            if p.len() != out.len() {
                return Err(MeshError::Comm(format!(
                    "all-reduce length mismatch: {} vs {}",
                    p.len(),
                    out.len()
                )));
            }
            for (o, v) in out.iter_mut().zip(p) {
                *o += v;
            }
        }
        Ok(out)
    }
}

/// Collective failure agreement for one pipeline stage.
///
/// Every rank passes its own stage result; afterwards either every rank
/// holds its `Ok` value or every rank holds an error. A rank that succeeded
/// locally gets [`MeshError::PeerFailure`] naming the lowest failing rank.
pub fn agree<C, T>(comm: &C, stage: &str, result: Result<T, MeshError>) -> Result<T, MeshError>
where
    C: Communicator + ?Sized,
{
    let status = comm.allgather_u64(result.is_err() as u64)?;
    let value = result?;
    match status.iter().position(|&s| s != 0) {
        Some(peer) => Err(MeshError::PeerFailure {
            rank: comm.rank(),
            peer,
            stage: stage.to_string(),
        }),
        None => Ok(value),
    }
}

/// Single-rank communicator. Point-to-point traffic is an error since there
/// is no peer.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, peer: usize, _tag: u16, _buf: &[u8]) -> Result<(), MeshError> {
        Err(MeshError::Comm(format!("NoComm cannot send to rank {peer}")))
    }

    fn recv(&self, peer: usize, _tag: u16) -> Result<Vec<u8>, MeshError> {
        Err(MeshError::Comm(format!("NoComm cannot receive from rank {peer}")))
    }

    fn allgatherv(&self, buf: &[u8]) -> Result<Vec<Vec<u8>>, MeshError> {
        Ok(vec![buf.to_vec()])
    }

    fn abort(&self, code: i32) -> ! {
        std::process::exit(code)
    }
}

// --- ThreadComm: in-process universe, one thread per rank ---
type Key = (usize, usize, u16); // (src, dst, tag)

/// Reserved tag for collectives built on point-to-point traffic.
pub const COLLECTIVE_TAG: u16 = u16::MAX;

#[derive(Default)]
struct Mailboxes {
    queues: HashMap<Key, VecDeque<Bytes>>,
    aborted: Option<(usize, i32)>,
}

struct Universe {
    size: usize,
    state: Mutex<Mailboxes>,
    arrived: Condvar,
}

/// In-process communicator for tests and single-node runs: every rank is a
/// thread sharing one set of FIFO mailboxes keyed by (src, dst, tag).
///
/// `abort` poisons the universe so every rank blocked in `recv` wakes up and
/// panics instead of deadlocking.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    universe: Arc<Universe>,
}

impl std::fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.universe.size)
            .finish()
    }
}

impl ThreadComm {
    /// One communicator per rank of a fresh `size`-rank universe.
    pub fn universe(size: usize) -> Vec<ThreadComm> {
        let universe = Arc::new(Universe {
            size,
            state: Mutex::new(Mailboxes::default()),
            arrived: Condvar::new(),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                universe: universe.clone(),
            })
            .collect()
    }

    /// Run `f` on `size` scoped threads, one per rank, and collect the
    /// results in rank order. A panic on any rank propagates.
    pub fn run<T, F>(size: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(ThreadComm) -> T + Sync,
    {
        let f = &f;
        std::thread::scope(|s| {
            let handles: Vec<_> = ThreadComm::universe(size)
                .into_iter()
                .map(|comm| s.spawn(move || f(comm)))
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(v) => v,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }

    fn check_peer(&self, peer: usize) -> Result<(), MeshError> {
        if peer >= self.universe.size {
            return Err(MeshError::Comm(format!(
                "rank {peer} out of range for a {}-rank universe",
                self.universe.size
            )));
        }
        Ok(())
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.universe.size
    }

    fn send(&self, peer: usize, tag: u16, buf: &[u8]) -> Result<(), MeshError> {
        self.check_peer(peer)?;
        let mut state = self.universe.state.lock();
        state
            .queues
            .entry((self.rank, peer, tag))
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
        self.universe.arrived.notify_all();
        Ok(())
    }

    fn recv(&self, peer: usize, tag: u16) -> Result<Vec<u8>, MeshError> {
        self.check_peer(peer)?;
        let key = (peer, self.rank, tag);
        let mut state = self.universe.state.lock();
        loop {
            if let Some((origin, code)) = state.aborted {
                panic!(
                    "rank {}: universe aborted by rank {origin} with code {code}",
                    self.rank
                );
            }
            if let Some(msg) = state.queues.get_mut(&key).and_then(|q| q.pop_front()) {
                return Ok(msg.to_vec());
            }
            self.universe.arrived.wait(&mut state);
        }
    }

    fn allgatherv(&self, buf: &[u8]) -> Result<Vec<Vec<u8>>, MeshError> {
        for peer in (0..self.size()).filter(|&p| p != self.rank) {
            self.send(peer, COLLECTIVE_TAG, buf)?;
        }
        (0..self.size())
            .map(|peer| {
                if peer == self.rank {
                    Ok(buf.to_vec())
                } else {
                    self.recv(peer, COLLECTIVE_TAG)
                }
            })
            .collect()
    }

    fn abort(&self, code: i32) -> ! {
        {
            let mut state = self.universe.state.lock();
            state.aborted.get_or_insert((self.rank, code));
            self.universe.arrived.notify_all();
        }
        panic!("rank {} aborted with code {code}", self.rank)
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::Communicator;
    use crate::mesh_error::MeshError;
    use mpi::collective::SystemOperation;
    use mpi::datatype::PartitionMut;
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::Communicator as _;
    use mpi::traits::*;

    /// MPI world communicator. Owns the MPI environment; dropping it
    /// finalizes MPI.
    pub struct MpiComm {
        _universe: Universe,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        pub fn init() -> Result<Self, MeshError> {
            let universe = mpi::initialize()
                .ok_or_else(|| MeshError::Comm("MPI is already initialized".into()))?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                _universe: universe,
                world,
                rank,
                size,
            })
        }
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn send(&self, peer: usize, tag: u16, buf: &[u8]) -> Result<(), MeshError> {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, tag as i32);
            Ok(())
        }

        fn recv(&self, peer: usize, tag: u16) -> Result<Vec<u8>, MeshError> {
            let (msg, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(tag as i32);
            Ok(msg)
        }

        fn allgatherv(&self, buf: &[u8]) -> Result<Vec<Vec<u8>>, MeshError> {
            let count = buf.len() as i32;
            let mut counts = vec![0i32; self.size];
            self.world.all_gather_into(&count, &mut counts[..]);
            let displs: Vec<i32> = counts
                .iter()
                .scan(0i32, |acc, &c| {
                    let d = *acc;
                    *acc += c;
                    Some(d)
                })
                .collect();
            let total: usize = counts.iter().map(|&c| c as usize).sum();
            let mut flat = vec![0u8; total];
            {
                let mut partition = PartitionMut::new(&mut flat[..], &counts[..], &displs[..]);
                self.world.all_gather_varcount_into(buf, &mut partition);
            }
            Ok(counts
                .iter()
                .zip(&displs)
                .map(|(&c, &d)| flat[d as usize..(d + c) as usize].to_vec())
                .collect())
        }

        fn allreduce_sum_f64(&self, local: &[f64]) -> Result<Vec<f64>, MeshError> {
            let mut out = vec![0.0f64; local.len()];
            self.world
                .all_reduce_into(local, &mut out[..], SystemOperation::sum());
            Ok(out)
        }

        fn allreduce_sum_u64(&self, local: &[u64]) -> Result<Vec<u64>, MeshError> {
            let mut out = vec![0u64; local.len()];
            self.world
                .all_reduce_into(local, &mut out[..], SystemOperation::sum());
            Ok(out)
        }

        fn abort(&self, code: i32) -> ! {
            self.world.abort(code)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_roundtrip_two_ranks() {
        let got = ThreadComm::run(2, |comm| {
            if comm.rank() == 0 {
                comm.send(1, 7, &[1, 2, 3, 4]).unwrap();
                comm.send(1, 7, &[5]).unwrap();
                Vec::new()
            } else {
                let mut v = comm.recv(0, 7).unwrap();
                v.extend(comm.recv(0, 7).unwrap());
                v
            }
        });
        assert_eq!(got[1], vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn allgatherv_orders_by_rank() {
        let got = ThreadComm::run(3, |comm| {
            let mine = vec![comm.rank() as u8; comm.rank() + 1];
            comm.allgatherv(&mine).unwrap()
        });
        for per_rank in got {
            assert_eq!(per_rank, vec![vec![0], vec![1, 1], vec![2, 2, 2]]);
        }
    }

    #[test]
    fn allreduce_sums_are_identical_everywhere() {
        let got = ThreadComm::run(4, |comm| {
            let r = comm.rank() as f64;
            comm.allreduce_sum_f64(&[r, 1.0]).unwrap()
        });
        for v in got {
            assert_eq!(v, vec![6.0, 4.0]);
        }
    }

    #[test]
    fn nocomm_is_a_one_rank_world() {
        let comm = NoComm;
        assert_eq!(comm.allgather_u64(5).unwrap(), vec![5]);
        assert_eq!(comm.allreduce_sum_u64(&[2, 3]).unwrap(), vec![2, 3]);
        assert!(comm.send(0, 1, &[]).is_err());
    }

    #[test]
    fn agree_turns_local_failure_into_peer_failure() {
        let got = ThreadComm::run(3, |comm| {
            let local = if comm.rank() == 1 {
                Err(MeshError::DegenerateMesh("bad".into()))
            } else {
                Ok(comm.rank())
            };
            agree(&comm, "test stage", local)
        });
        assert!(matches!(got[1], Err(MeshError::DegenerateMesh(_))));
        for r in [0, 2] {
            assert!(matches!(
                got[r],
                Err(MeshError::PeerFailure { peer: 1, ref stage, .. }) if stage == "test stage"
            ));
        }
    }

    #[test]
    #[should_panic(expected = "aborted")]
    fn abort_wakes_blocked_receivers() {
        ThreadComm::run(2, |comm| {
            if comm.rank() == 0 {
                comm.abort(3);
            } else {
                // Never satisfied; must be woken by the abort.
                let _ = comm.recv(0, 1);
            }
        });
    }
}
