//! Per-process identity supplied by the launcher.

use crate::comm::CommunicationBackend;
use crate::error::{CouplerError, Result};

/// Global rank and size of this process, fixed for the lifetime of the run.
///
/// Built once at startup and passed explicitly into partitioning, rendezvous
/// and channel construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessContext {
    global_rank: usize,
    global_size: usize,
}

impl ProcessContext {
    pub fn new(global_rank: usize, global_size: usize) -> Result<Self> {
        if global_size == 0 {
            return Err(CouplerError::Transport("universe has no processes".into()));
        }
        if global_rank >= global_size {
            return Err(CouplerError::Transport(format!(
                "rank {global_rank} outside universe of size {global_size}"
            )));
        }
        Ok(Self {
            global_rank,
            global_size,
        })
    }

    /// Read the identity assigned by the transport.
    pub fn from_backend(comm: &dyn CommunicationBackend) -> Result<Self> {
        Self::new(comm.rank(), comm.num_ranks())
    }

    pub fn global_rank(&self) -> usize {
        self.global_rank
    }

    pub fn global_size(&self) -> usize {
        self.global_size
    }

    /// Every global rank in ascending order.
    pub fn universe(&self) -> Vec<usize> {
        (0..self.global_size).collect()
    }
}
