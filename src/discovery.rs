//! Partner discovery by explicit announcement.
//!
//! After partitioning, every process announces its role to the universe.
//! Because the announcements and the label roster are identical on every
//! process, all processes reach the same verdict (standalone, coupled, or
//! an error) without further messaging.

use crate::comm::collective;
use crate::comm::{CommunicationBackend, Tag};
use crate::context::ProcessContext;
use crate::coupling::Role;
use crate::error::{CouplerError, Result};
use crate::partition::Partition;

/// The partner group as seen from this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteGroup {
    pub group_id: usize,
    pub role: Role,
    pub label: String,
    /// Global ranks, indexed by the remote group's local rank.
    pub members: Vec<usize>,
}

impl RemoteGroup {
    pub fn leader(&self) -> usize {
        self.members[0]
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// Outcome of the announcement exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendezvous {
    local_role: Role,
    local_leader: usize,
    remote: Option<RemoteGroup>,
}

impl Rendezvous {
    pub fn is_coupled(&self) -> bool {
        self.remote.is_some()
    }

    pub fn remote(&self) -> Option<&RemoteGroup> {
        self.remote.as_ref()
    }

    /// Global rank of the leader of the group playing `role`, if present.
    pub fn leader_of(&self, role: Role) -> Option<usize> {
        if role == self.local_role {
            return Some(self.local_leader);
        }
        self.remote
            .as_ref()
            .filter(|remote| remote.role == role)
            .map(RemoteGroup::leader)
    }
}

/// Announce `role` to the universe and identify the partner group.
///
/// Collective over the whole universe.
pub fn rendezvous(
    ctx: &ProcessContext,
    comm: &dyn CommunicationBackend,
    partition: &Partition,
    role: Role,
) -> Result<Rendezvous> {
    let _span = tracing::debug_span!("rendezvous", %role).entered();

    let announced = collective::all_gather_values(comm, &ctx.universe(), Tag::Gather, &role)?;
    let verdict = resolve(partition, role, &announced)?;

    match verdict.remote() {
        Some(remote) => tracing::debug!(
            remote_role = %remote.role,
            remote_size = remote.size(),
            remote_leader = remote.leader(),
            "partner group found"
        ),
        None => tracing::debug!("no partner group"),
    }
    Ok(verdict)
}

/// Decide the rendezvous outcome from the roster and every announcement.
pub fn resolve(partition: &Partition, role: Role, announced: &[Role]) -> Result<Rendezvous> {
    let roster = &partition.roster;
    if announced.len() != roster.labels().len() {
        return Err(CouplerError::RoleConflict(format!(
            "{} announcements for {} processes",
            announced.len(),
            roster.labels().len()
        )));
    }

    let group_ids = roster.group_ids();
    if group_ids.len() > 2 {
        return Err(CouplerError::TooManyGroups(group_ids.len()));
    }

    let mut group_roles = Vec::with_capacity(group_ids.len());
    for &group_id in &group_ids {
        let members = roster.members_of(group_id);
        let group_role = announced[members[0]];
        if members.iter().any(|&m| announced[m] != group_role) {
            return Err(CouplerError::RoleConflict(format!(
                "members of group '{}' announced different roles",
                roster.labels()[group_id]
            )));
        }
        group_roles.push((group_id, group_role, members));
    }

    let local_id = partition.group.group_id();
    let remote = group_roles
        .into_iter()
        .find(|(group_id, _, _)| *group_id != local_id)
        .map(|(group_id, remote_role, members)| RemoteGroup {
            group_id,
            role: remote_role,
            label: roster.labels()[group_id].clone(),
            members,
        });

    if let Some(remote) = &remote {
        if remote.role == role {
            return Err(CouplerError::RoleConflict(format!(
                "groups '{}' and '{}' both announced {role}",
                roster.labels()[local_id],
                remote.label
            )));
        }
    }

    Ok(Rendezvous {
        local_role: role,
        local_leader: partition.group.leader(),
        remote,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::Roster;

    fn partition_for(raw: &[&str], rank: usize) -> Partition {
        let roster = Roster::new(raw.iter().map(|s| s.to_string()).collect());
        let group = roster.group_for(rank).unwrap();
        Partition { group, roster }
    }

    #[test]
    fn single_group_is_standalone() {
        let partition = partition_for(&["tracker", "tracker"], 1);
        let verdict = resolve(&partition, Role::Tracker, &[Role::Tracker, Role::Tracker]).unwrap();
        assert!(!verdict.is_coupled());
        assert_eq!(verdict.leader_of(Role::Tracker), Some(0));
        assert_eq!(verdict.leader_of(Role::Solver), None);
    }

    #[test]
    fn two_groups_couple_and_name_leaders() {
        let labels = ["solver", "solver", "solver", "tracker", "tracker"];
        let roles = [Role::Solver, Role::Solver, Role::Solver, Role::Tracker, Role::Tracker];

        let tracker_view = resolve(&partition_for(&labels, 4), Role::Tracker, &roles).unwrap();
        let remote = tracker_view.remote().unwrap();
        assert_eq!(remote.role, Role::Solver);
        assert_eq!(remote.members, vec![0, 1, 2]);
        assert_eq!(tracker_view.leader_of(Role::Solver), Some(0));

        let solver_view = resolve(&partition_for(&labels, 1), Role::Solver, &roles).unwrap();
        assert_eq!(solver_view.remote().unwrap().leader(), 3);
        assert_eq!(solver_view.leader_of(Role::Solver), Some(0));
    }

    #[test]
    fn three_groups_are_rejected() {
        let partition = partition_for(&["a", "b", "c"], 0);
        let err = resolve(&partition, Role::Solver, &[Role::Solver, Role::Tracker, Role::Tracker]).unwrap_err();
        assert!(matches!(err, CouplerError::TooManyGroups(3)));
    }

    #[test]
    fn two_solver_groups_conflict() {
        let partition = partition_for(&["a", "b"], 0);
        let err = resolve(&partition, Role::Solver, &[Role::Solver, Role::Solver]).unwrap_err();
        assert!(matches!(err, CouplerError::RoleConflict(_)));
    }

    #[test]
    fn mixed_roles_within_a_label_conflict() {
        let partition = partition_for(&["a", "a"], 0);
        let err = resolve(&partition, Role::Solver, &[Role::Solver, Role::Tracker]).unwrap_err();
        assert!(matches!(err, CouplerError::RoleConflict(_)));
    }
}
