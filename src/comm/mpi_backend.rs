//! MPI communication backend for coupled runs.
//!
//! Requires the `distributed` feature flag and an MPI installation.
//! Implements `CommunicationBackend` on the MPI world communicator, which
//! spans every program launched by a single MPMD `mpirun` invocation.
//!
//! # Usage
//!
//! The caller must initialize MPI before constructing `MpiComm`:
//!
//! ```ignore
//! let universe = mpi::initialize().expect("MPI init failed");
//! let comm = MpiComm::new();
//! ```
//!
//! # Collectives
//!
//! Broadcast, all-gather and barrier over the whole world use rsmpi's
//! collectives. Over any other member list (a single group, or the
//! inter-group channel) they fall back to the ordered point-to-point
//! versions in `comm::collective`. Sends use standard mode, which may block
//! until the receive is posted for large payloads; that ordering keeps the
//! fallbacks deadlock free.

use mpi::datatype::PartitionMut;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::Count;

use super::{collective, CommunicationBackend, Tag};
use crate::error::{CouplerError, Result};

/// MPI-based communication backend.
///
/// Wraps the MPI world communicator. Requires `mpi::initialize()` to have
/// been called before construction.
pub struct MpiComm;

impl MpiComm {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MpiComm {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `members` is the world communicator in rank order.
fn is_world(members: &[usize], size: usize) -> bool {
    members.len() == size && members.iter().enumerate().all(|(i, &m)| i == m)
}

fn to_count(len: usize) -> Result<Count> {
    Count::try_from(len).map_err(|_| CouplerError::Transport(format!("{len} bytes exceed an MPI count")))
}

impl CommunicationBackend for MpiComm {
    fn send(&self, dest: usize, tag: Tag, payload: &[u8]) -> Result<()> {
        let world = SimpleCommunicator::world();
        world
            .process_at_rank(dest as i32)
            .send_with_tag(payload, tag.as_i32());
        Ok(())
    }

    fn receive(&self, source: usize, tag: Tag) -> Result<Vec<u8>> {
        let world = SimpleCommunicator::world();
        let (payload, _status) = world
            .process_at_rank(source as i32)
            .receive_vec_with_tag::<u8>(tag.as_i32());
        Ok(payload)
    }

    fn rank(&self) -> usize {
        let world = SimpleCommunicator::world();
        world.rank() as usize
    }

    fn num_ranks(&self) -> usize {
        let world = SimpleCommunicator::world();
        world.size() as usize
    }

    fn broadcast(&self, members: &[usize], root: usize, tag: Tag, payload: &[u8]) -> Result<Vec<u8>> {
        let world = SimpleCommunicator::world();
        if !is_world(members, world.size() as usize) {
            return collective::broadcast_p2p(self, members, root, tag, payload);
        }
        collective::check_root(members, root)?;

        // Non-roots learn the length first, then receive the bytes.
        let root_process = world.process_at_rank(root as i32);
        let is_root = world.rank() as usize == root;
        let mut len = if is_root { to_count(payload.len())? } else { 0 };
        root_process.broadcast_into(&mut len);

        let mut buffer = if is_root {
            payload.to_vec()
        } else {
            vec![0u8; usize::try_from(len).unwrap_or(0)]
        };
        root_process.broadcast_into(&mut buffer[..]);
        Ok(buffer)
    }

    fn all_gather(&self, members: &[usize], tag: Tag, payload: &[u8]) -> Result<Vec<Vec<u8>>> {
        let world = SimpleCommunicator::world();
        let size = world.size() as usize;
        if !is_world(members, size) {
            return collective::all_gather_p2p(self, members, tag, payload);
        }

        let local_count = to_count(payload.len())?;
        let mut counts: Vec<Count> = vec![0; size];
        world.all_gather_into(&local_count, &mut counts[..]);

        let displs: Vec<Count> = counts
            .iter()
            .scan(0, |offset, &count| {
                let displ = *offset;
                *offset += count;
                Some(displ)
            })
            .collect();
        let total: usize = counts.iter().map(|&c| usize::try_from(c).unwrap_or(0)).sum();

        let mut buffer = vec![0u8; total];
        {
            let mut partition = PartitionMut::new(&mut buffer[..], &counts[..], &displs[..]);
            world.all_gather_varcount_into(payload, &mut partition);
        }

        let mut frames = Vec::with_capacity(size);
        let mut offset = 0;
        for &count in &counts {
            let count = usize::try_from(count).unwrap_or(0);
            frames.push(buffer[offset..offset + count].to_vec());
            offset += count;
        }
        Ok(frames)
    }

    fn barrier(&self, members: &[usize]) -> Result<()> {
        let world = SimpleCommunicator::world();
        if !is_world(members, world.size() as usize) {
            return collective::barrier_p2p(self, members, Tag::Barrier);
        }
        world.barrier();
        Ok(())
    }
}
