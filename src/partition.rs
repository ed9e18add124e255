//! Splitting the universe into disjoint groups by role label.
//!
//! Every process shares its label with the whole universe. The resulting
//! rank-ordered label table (the `Roster`) is identical everywhere, so each
//! process can derive every group locally:
//! - `group_id` is the global rank of the first process carrying the label;
//! - local ranks follow ascending global rank within the group.

use crate::comm::collective;
use crate::comm::{CommunicationBackend, Tag};
use crate::context::ProcessContext;
use crate::error::{CouplerError, Result};

/// A process's place within its group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    group_id: usize,
    local_rank: usize,
    /// Global ranks of the members, indexed by local rank.
    members: Vec<usize>,
}

impl Group {
    pub fn group_id(&self) -> usize {
        self.group_id
    }

    pub fn local_rank(&self) -> usize {
        self.local_rank
    }

    pub fn local_size(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> &[usize] {
        &self.members
    }

    /// Global rank of local rank 0.
    pub fn leader(&self) -> usize {
        self.members[0]
    }

    pub fn is_leader(&self) -> bool {
        self.local_rank == 0
    }

    /// Whether the group holds every process in the universe.
    pub fn spans(&self, ctx: &ProcessContext) -> bool {
        self.members.len() == ctx.global_size()
    }
}

/// Labels of every process, indexed by global rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    labels: Vec<String>,
}

impl Roster {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// First-occurrence index of `label`, which is its group id.
    pub fn group_id_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Distinct group ids in ascending order.
    pub fn group_ids(&self) -> Vec<usize> {
        (0..self.labels.len())
            .filter(|&rank| self.group_id_of(&self.labels[rank]) == Some(rank))
            .collect()
    }

    /// Global ranks belonging to `group_id`, ascending.
    pub fn members_of(&self, group_id: usize) -> Vec<usize> {
        match self.labels.get(group_id) {
            Some(label) if self.group_id_of(label) == Some(group_id) => (0..self.labels.len())
                .filter(|&rank| &self.labels[rank] == label)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The group containing `global_rank`.
    pub fn group_for(&self, global_rank: usize) -> Result<Group> {
        let label = self
            .labels
            .get(global_rank)
            .ok_or(CouplerError::NotAMember { rank: global_rank })?;
        let group_id = self
            .group_id_of(label)
            .ok_or(CouplerError::NotAMember { rank: global_rank })?;
        let members = self.members_of(group_id);
        let local_rank = collective::local_rank_in(&members, global_rank)?;
        Ok(Group {
            group_id,
            local_rank,
            members,
        })
    }
}

/// This process's group together with the table it was derived from.
#[derive(Debug, Clone)]
pub struct Partition {
    pub group: Group,
    pub roster: Roster,
}

/// Compute every process's group from a label table, without communication.
pub fn assign_groups(labels: &[String]) -> Vec<Group> {
    let roster = Roster::new(labels.to_vec());
    (0..labels.len())
        .filter_map(|rank| roster.group_for(rank).ok())
        .collect()
}

/// Split the universe by `label`.
///
/// Collective over the whole universe: every process must call this once,
/// at the same point in its protocol.
pub fn partition(
    ctx: &ProcessContext,
    comm: &dyn CommunicationBackend,
    label: &str,
) -> Result<Partition> {
    let _span = tracing::debug_span!("partition", label).entered();

    let labels = collective::all_gather_values(comm, &ctx.universe(), Tag::Gather, &label.to_string())?;
    let roster = Roster::new(labels);
    let group = roster.group_for(ctx.global_rank())?;

    tracing::debug!(
        group_id = group.group_id(),
        local_rank = group.local_rank(),
        local_size = group.local_size(),
        "joined group"
    );
    Ok(Partition { group, roster })
}
