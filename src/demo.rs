//! Broadcasts across a channel joining the two halves of the universe.
//!
//! Ranks below `size / 2` form the first group and the rest the second.
//! Three directed broadcasts run in turn, each fenced by channel barriers.
//! The value sent is always `999 + local_root`.

use crate::channel::InterGroupChannel;
use crate::comm::CommunicationBackend;
use crate::context::ProcessContext;
use crate::error::{CouplerError, Result};
use crate::partition;

/// One directed broadcast of the demonstration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastCase {
    pub title: &'static str,
    /// 0 for the first half, 1 for the second.
    pub sending_group: usize,
    pub local_root: usize,
}

pub const CASES: [BroadcastCase; 3] = [
    BroadcastCase {
        title: "First group to second group",
        sending_group: 0,
        local_root: 0,
    },
    BroadcastCase {
        title: "Second group to first group",
        sending_group: 1,
        local_root: 0,
    },
    BroadcastCase {
        title: "First group to second group with non-zero root rank",
        sending_group: 0,
        local_root: 1,
    },
];

impl BroadcastCase {
    pub fn value(&self) -> u32 {
        999 + self.local_root as u32
    }
}

/// Run every case in `CASES`; returns what this rank received in each.
///
/// Collective over the whole universe, which needs at least four processes
/// so that the first half has a local rank 1.
pub fn run_broadcasts(comm: &dyn CommunicationBackend) -> Result<Vec<Option<u32>>> {
    let ctx = ProcessContext::from_backend(comm)?;
    let half = ctx.global_size() / 2;
    if half < 2 {
        return Err(CouplerError::Usage(format!(
            "the broadcast demonstration needs at least 4 processes, got {}",
            ctx.global_size()
        )));
    }

    let group_index = usize::from(ctx.global_rank() >= half);
    let label = if group_index == 0 { "first" } else { "second" };
    let group = partition::partition(&ctx, comm, label)?.group;
    let remote_leader = if group_index == 0 { half } else { 0 };
    let channel = InterGroupChannel::connect(comm, &group, remote_leader)?;

    let mut received = Vec::with_capacity(CASES.len());
    for (number, case) in CASES.iter().enumerate() {
        let sending = group_index == case.sending_group;
        if sending && group.local_rank() == case.local_root {
            tracing::info!("{}. {}", number + 1, case.title);
        }
        channel.barrier(comm)?;

        let value = channel.broadcast_with_root(comm, &case.value(), case.local_root, sending)?;
        tracing::info!("Rank #{}: {:?}", ctx.global_rank(), value);
        received.push(value);

        channel.barrier(comm)?;
    }
    Ok(received)
}
