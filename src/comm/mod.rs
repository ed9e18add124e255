//! Communication backend abstraction for coupled runs.
//!
//! Provides a trait for tagged point-to-point messaging between global
//! ranks, group collectives with point-to-point default bodies, and a
//! single-process implementation. Partitioning and inter-group channels
//! are built on top of this trait.

pub mod collective;
pub mod local;
#[cfg(feature = "distributed")]
pub mod mpi_backend;

use crate::error::{CouplerError, Result};

pub use local::{LocalComm, LocalUniverse};

/// Message tag, one per kind of protocol step.
///
/// Messages are delivered FIFO per (source, tag); distinct tags keep
/// unrelated steps from consuming each other's messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Gather = 1,
    Broadcast = 2,
    ChannelSetup = 3,
    ChannelBroadcast = 4,
    ChannelAllGather = 5,
    Barrier = 6,
    ChannelBarrier = 7,
}

impl Tag {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Abstraction over inter-process communication for coupled runs.
///
/// Implementations: `SingleProcessComm` (universe of one), `LocalComm`
/// (in-process universe), `MpiComm` (via mpi crate).
///
/// `send` may block until the matching `receive` is posted; callers must
/// order their traffic so that it cannot deadlock under that assumption.
///
/// The collectives take the participating members as global ranks in
/// local-rank order. Their default bodies are the point-to-point versions
/// in `collective`; a backend with native collectives overrides them.
pub trait CommunicationBackend: Send + Sync {
    /// Send `payload` to global rank `dest`.
    fn send(&self, dest: usize, tag: Tag, payload: &[u8]) -> Result<()>;

    /// Block until a message with `tag` from global rank `source` arrives.
    fn receive(&self, source: usize, tag: Tag) -> Result<Vec<u8>>;

    /// This process's global rank.
    fn rank(&self) -> usize;

    /// Number of processes in the universe.
    fn num_ranks(&self) -> usize;

    /// Send the payload of `members[root]` to every member.
    fn broadcast(&self, members: &[usize], root: usize, tag: Tag, payload: &[u8]) -> Result<Vec<u8>> {
        collective::broadcast_p2p(self, members, root, tag, payload)
    }

    /// Every member's payload on every member, in local-rank order.
    fn all_gather(&self, members: &[usize], tag: Tag, payload: &[u8]) -> Result<Vec<Vec<u8>>> {
        collective::all_gather_p2p(self, members, tag, payload)
    }

    /// Return once every member has entered the barrier.
    fn barrier(&self, members: &[usize]) -> Result<()> {
        collective::barrier_p2p(self, members, Tag::Barrier)
    }
}

/// Backend for a universe containing only this process.
///
/// Every collective over a one-member group completes without messaging,
/// so any attempt to reach a peer is an error.
pub struct SingleProcessComm;

impl CommunicationBackend for SingleProcessComm {
    fn send(&self, dest: usize, _tag: Tag, _payload: &[u8]) -> Result<()> {
        Err(CouplerError::Transport(format!(
            "no rank {dest} in a single-process universe"
        )))
    }

    fn receive(&self, source: usize, _tag: Tag) -> Result<Vec<u8>> {
        Err(CouplerError::Transport(format!(
            "no rank {source} in a single-process universe"
        )))
    }

    fn rank(&self) -> usize {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_process_rank_and_size() {
        let comm = SingleProcessComm;
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.num_ranks(), 1);
    }

    #[test]
    fn single_process_has_no_peers() {
        let comm = SingleProcessComm;
        assert!(comm.send(1, Tag::Broadcast, &[1, 2, 3]).is_err());
        assert!(comm.receive(1, Tag::Broadcast).is_err());
    }
}
