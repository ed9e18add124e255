//! Inter-group channel joining exactly two disjoint groups.
//!
//! Construction mirrors an MPI intercommunicator: the two leaders swap
//! member lists, then each leader shares the remote list with its own
//! group. Afterwards every process can address any remote rank by its
//! remote local rank.
//!
//! # Deadlock freedom
//!
//! The channel uses point-to-point traffic only.
//!
//! Point-to-point sends may block until received. Whenever both sides must
//! send to each other, the side whose leader has the lower global rank
//! sends first and the other side receives first. Within one direction,
//! senders send and receivers receive in rank order.

use crate::comm::collective;
use crate::comm::{CommunicationBackend, Tag};
use crate::error::{CouplerError, Result};
use crate::partition::Group;
use crate::wire::{self, WireValue};

/// Part a process plays in a broadcast across a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootRole {
    /// The unique rank in the sending group that supplies the value.
    Source,
    /// A sending-group rank that contributes nothing. As with MPI's
    /// `PROC_NULL` root, it returns at once without touching the transport;
    /// the broadcast does not synchronize it with anyone.
    PassiveSender,
    /// A receiving-group rank listening to the remote rank `remote_root`
    /// (a local rank within the sending group).
    Consumer { remote_root: usize },
}

impl RootRole {
    /// Role of a process with `local_rank`, given the sending group's
    /// `local_root` and whether this process is in the sending group.
    pub fn resolve(local_rank: usize, local_root: usize, sending_group: bool) -> Self {
        match (sending_group, local_rank == local_root) {
            (true, true) => RootRole::Source,
            (true, false) => RootRole::PassiveSender,
            (false, _) => RootRole::Consumer {
                remote_root: local_root,
            },
        }
    }
}

/// Bidirectional channel between this process's group and one remote group.
#[derive(Debug, Clone)]
pub struct InterGroupChannel {
    local_members: Vec<usize>,
    local_rank: usize,
    remote_members: Vec<usize>,
}

impl InterGroupChannel {
    /// Bind `group` to the group led by global rank `remote_leader`.
    ///
    /// Collective over both groups: every member of each must call this.
    pub fn connect(
        comm: &dyn CommunicationBackend,
        group: &Group,
        remote_leader: usize,
    ) -> Result<Self> {
        let _span = tracing::debug_span!("channel_connect", remote_leader).entered();

        if group.members().contains(&remote_leader) {
            return Err(CouplerError::Channel(format!(
                "remote leader {remote_leader} belongs to the local group"
            )));
        }

        let from_remote = if group.is_leader() {
            let ours = wire::encode_ranks(group.members());
            if group.leader() < remote_leader {
                comm.send(remote_leader, Tag::ChannelSetup, &ours)?;
                comm.receive(remote_leader, Tag::ChannelSetup)?
            } else {
                let theirs = comm.receive(remote_leader, Tag::ChannelSetup)?;
                comm.send(remote_leader, Tag::ChannelSetup, &ours)?;
                theirs
            }
        } else {
            Vec::new()
        };

        let from_remote = comm.broadcast(group.members(), 0, Tag::ChannelSetup, &from_remote)?;
        let remote_members = wire::decode_ranks(&from_remote)?;

        if remote_members.first() != Some(&remote_leader) {
            return Err(CouplerError::Channel(format!(
                "remote group reports leader {:?}, expected {remote_leader}",
                remote_members.first()
            )));
        }
        if remote_members.iter().any(|r| group.members().contains(r)) {
            return Err(CouplerError::Channel("local and remote groups overlap".into()));
        }

        tracing::debug!(
            local_size = group.local_size(),
            remote_size = remote_members.len(),
            "channel established"
        );
        Ok(Self {
            local_members: group.members().to_vec(),
            local_rank: group.local_rank(),
            remote_members,
        })
    }

    pub fn local_rank(&self) -> usize {
        self.local_rank
    }

    pub fn local_size(&self) -> usize {
        self.local_members.len()
    }

    pub fn remote_size(&self) -> usize {
        self.remote_members.len()
    }

    pub fn local_leader(&self) -> usize {
        self.local_members[0]
    }

    pub fn remote_leader(&self) -> usize {
        self.remote_members[0]
    }

    pub fn remote_members(&self) -> &[usize] {
        &self.remote_members
    }

    fn sends_first(&self) -> bool {
        self.local_leader() < self.remote_leader()
    }

    /// Directed broadcast from one group to the other.
    ///
    /// Returns `Some(value)` on every consumer and `None` on every rank of
    /// the sending group, the source included. `send_value` is only read
    /// on the source. Passive senders return immediately; call `barrier`
    /// when every rank of both groups must be in step.
    pub fn broadcast<T: WireValue>(
        &self,
        comm: &dyn CommunicationBackend,
        send_value: &T,
        role: RootRole,
    ) -> Result<Option<T>> {
        match role {
            RootRole::Source => {
                let payload = send_value.encode();
                for &dest in &self.remote_members {
                    comm.send(dest, Tag::ChannelBroadcast, &payload)?;
                }
                Ok(None)
            }
            RootRole::PassiveSender => Ok(None),
            RootRole::Consumer { remote_root } => {
                let source = *self.remote_members.get(remote_root).ok_or(CouplerError::InvalidRoot {
                    root: remote_root,
                    size: self.remote_size(),
                })?;
                let payload = comm.receive(source, Tag::ChannelBroadcast)?;
                Ok(Some(T::decode(&payload)?))
            }
        }
    }

    /// Return once every rank of both groups has entered the barrier.
    ///
    /// Each leader gathers its own group, the leaders swap a token (lower
    /// leader rank first), then each leader releases its group.
    pub fn barrier(&self, comm: &dyn CommunicationBackend) -> Result<()> {
        collective::gather(comm, &self.local_members, 0, Tag::ChannelBarrier, &[])?;
        if self.local_rank == 0 {
            let remote = self.remote_leader();
            if self.sends_first() {
                comm.send(remote, Tag::ChannelBarrier, &[])?;
                comm.receive(remote, Tag::ChannelBarrier)?;
            } else {
                comm.receive(remote, Tag::ChannelBarrier)?;
                comm.send(remote, Tag::ChannelBarrier, &[])?;
            }
        }
        collective::broadcast_p2p(comm, &self.local_members, 0, Tag::ChannelBarrier, &[])?;
        Ok(())
    }

    /// `broadcast` with the root role derived from this process's local rank.
    pub fn broadcast_with_root<T: WireValue>(
        &self,
        comm: &dyn CommunicationBackend,
        send_value: &T,
        local_root: usize,
        sending_group: bool,
    ) -> Result<Option<T>> {
        if sending_group && local_root >= self.local_size() {
            return Err(CouplerError::InvalidRoot {
                root: local_root,
                size: self.local_size(),
            });
        }
        let role = RootRole::resolve(self.local_rank, local_root, sending_group);
        self.broadcast(comm, send_value, role)
    }

    /// Cross-group all-gather of flat `f64` arrays.
    ///
    /// Every rank contributes `send` to every remote rank and receives the
    /// remote contributions, concatenated in remote rank order, into `recv`.
    /// The producing side passes an empty `recv`; the consuming side an
    /// empty `send`. `recv` is overwritten and must match the total length
    /// of the remote contributions.
    pub fn all_gather_into(
        &self,
        comm: &dyn CommunicationBackend,
        send: &[f64],
        recv: &mut [f64],
    ) -> Result<()> {
        let outgoing = wire::encode_f64s(send);
        if self.sends_first() {
            self.contribute(comm, &outgoing)?;
            self.collect(comm, recv)
        } else {
            // Always contribute, even if our receive buffer was the wrong
            // size, so the remote side is not left waiting.
            let collected = self.collect(comm, recv);
            self.contribute(comm, &outgoing)?;
            collected
        }
    }

    fn contribute(&self, comm: &dyn CommunicationBackend, payload: &[u8]) -> Result<()> {
        for &dest in &self.remote_members {
            comm.send(dest, Tag::ChannelAllGather, payload)?;
        }
        Ok(())
    }

    fn collect(&self, comm: &dyn CommunicationBackend, recv: &mut [f64]) -> Result<()> {
        let mut frames = Vec::with_capacity(self.remote_size());
        for &source in &self.remote_members {
            frames.push(comm.receive(source, Tag::ChannelAllGather)?);
        }

        let received = frames
            .iter()
            .map(|frame| wire::f64_count(frame))
            .sum::<Result<usize>>()?;
        if received != recv.len() {
            return Err(CouplerError::FieldSizeMismatch {
                expected: recv.len(),
                received,
            });
        }

        let mut offset = 0;
        for frame in &frames {
            let count = wire::f64_count(frame)?;
            wire::decode_f64s_into(frame, &mut recv[offset..offset + count])?;
            offset += count;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_distinguishes_three_roles() {
        assert_eq!(RootRole::resolve(1, 1, true), RootRole::Source);
        assert_eq!(RootRole::resolve(0, 1, true), RootRole::PassiveSender);
        assert_eq!(RootRole::resolve(2, 1, true), RootRole::PassiveSender);
        assert_eq!(
            RootRole::resolve(0, 1, false),
            RootRole::Consumer { remote_root: 1 }
        );
        assert_eq!(
            RootRole::resolve(1, 1, false),
            RootRole::Consumer { remote_root: 1 }
        );
    }
}
