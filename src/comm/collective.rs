//! Point-to-point collectives over an ordered member list.
//!
//! `members[i]` is the global rank of the process with local rank `i`. The
//! universe is simply `0..num_ranks`. Roots receive in rank order and send
//! in rank order, so every collective completes even when `send` blocks
//! until the matching receive is posted.
//!
//! These are the default bodies of the `CommunicationBackend` collectives.
//! The typed helpers at the bottom go through the trait, so a backend's
//! native collectives are used when it has them.

use super::{CommunicationBackend, Tag};
use crate::error::{CouplerError, Result};
use crate::wire::{self, WireValue};

/// Local rank of `global` within `members`.
pub fn local_rank_in(members: &[usize], global: usize) -> Result<usize> {
    members
        .iter()
        .position(|&m| m == global)
        .ok_or(CouplerError::NotAMember { rank: global })
}

pub(crate) fn check_root(members: &[usize], root: usize) -> Result<()> {
    if root >= members.len() {
        return Err(CouplerError::InvalidRoot {
            root,
            size: members.len(),
        });
    }
    Ok(())
}

/// Collect one payload per member at `members[root]`.
///
/// Returns the payloads in local-rank order on the root and `None` elsewhere.
pub fn gather<C: CommunicationBackend + ?Sized>(
    comm: &C,
    members: &[usize],
    root: usize,
    tag: Tag,
    payload: &[u8],
) -> Result<Option<Vec<Vec<u8>>>> {
    check_root(members, root)?;
    let me = local_rank_in(members, comm.rank())?;

    if me != root {
        comm.send(members[root], tag, payload)?;
        return Ok(None);
    }

    let mut frames = Vec::with_capacity(members.len());
    for (local, &global) in members.iter().enumerate() {
        if local == root {
            frames.push(payload.to_vec());
        } else {
            frames.push(comm.receive(global, tag)?);
        }
    }
    Ok(Some(frames))
}

/// Send the root's `payload` to every member. Non-root payloads are ignored.
pub fn broadcast_p2p<C: CommunicationBackend + ?Sized>(
    comm: &C,
    members: &[usize],
    root: usize,
    tag: Tag,
    payload: &[u8],
) -> Result<Vec<u8>> {
    check_root(members, root)?;
    let me = local_rank_in(members, comm.rank())?;

    if me == root {
        for (local, &global) in members.iter().enumerate() {
            if local != root {
                comm.send(global, tag, payload)?;
            }
        }
        Ok(payload.to_vec())
    } else {
        comm.receive(members[root], tag)
    }
}

/// Gather at local rank 0, then broadcast the framed result.
pub fn all_gather_p2p<C: CommunicationBackend + ?Sized>(
    comm: &C,
    members: &[usize],
    tag: Tag,
    payload: &[u8],
) -> Result<Vec<Vec<u8>>> {
    let gathered = gather(comm, members, 0, tag, payload)?;
    let framed = gathered.map(|frames| wire::encode_frames(&frames)).unwrap_or_default();
    let framed = broadcast_p2p(comm, members, 0, tag, &framed)?;
    wire::decode_frames(&framed)
}

/// Empty gather at local rank 0 followed by an empty release broadcast.
pub fn barrier_p2p<C: CommunicationBackend + ?Sized>(comm: &C, members: &[usize], tag: Tag) -> Result<()> {
    gather(comm, members, 0, tag, &[])?;
    broadcast_p2p(comm, members, 0, tag, &[])?;
    Ok(())
}

pub fn broadcast_value<T: WireValue>(
    comm: &dyn CommunicationBackend,
    members: &[usize],
    root: usize,
    tag: Tag,
    value: &T,
) -> Result<T> {
    let me = local_rank_in(members, comm.rank())?;
    let payload = if me == root { value.encode() } else { Vec::new() };
    T::decode(&comm.broadcast(members, root, tag, &payload)?)
}

pub fn all_gather_values<T: WireValue>(
    comm: &dyn CommunicationBackend,
    members: &[usize],
    tag: Tag,
    value: &T,
) -> Result<Vec<T>> {
    comm.all_gather(members, tag, &value.encode())?
        .iter()
        .map(|frame| T::decode(frame))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LocalUniverse, SingleProcessComm};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn universe(size: usize) -> LocalUniverse {
        LocalUniverse::with_timeout(size, Duration::from_secs(5))
    }

    #[test]
    fn single_member_collectives_need_no_messages() {
        let comm = SingleProcessComm;
        let labels = all_gather_values(&comm, &[0], Tag::Gather, &"solo".to_string()).unwrap();
        assert_eq!(labels, vec!["solo".to_string()]);
        assert_eq!(broadcast_value(&comm, &[0], 0, Tag::Broadcast, &3u32).unwrap(), 3);
    }

    #[test]
    fn all_gather_orders_by_local_rank() {
        let results = universe(4)
            .run(|comm| {
                let members: Vec<usize> = (0..4).collect();
                all_gather_values(&comm, &members, Tag::Gather, &(comm.rank() as u32 * 3)).unwrap()
            })
            .unwrap();
        for gathered in results {
            assert_eq!(gathered, vec![0, 3, 6, 9]);
        }
    }

    #[test]
    fn broadcast_from_nonzero_root_within_subgroup() {
        // Members {1, 3}; local root 1 is global rank 3.
        let results = universe(4)
            .run(|comm| {
                let members = [1, 3];
                if !members.contains(&comm.rank()) {
                    return None;
                }
                Some(broadcast_value(&comm, &members, 1, Tag::Broadcast, &(comm.rank() as u32)).unwrap())
            })
            .unwrap();
        assert_eq!(results, vec![None, Some(3), None, Some(3)]);
    }

    #[test]
    fn non_member_is_rejected() {
        let comm = SingleProcessComm;
        assert!(matches!(
            comm.broadcast(&[4, 5], 0, Tag::Broadcast, &[]),
            Err(CouplerError::NotAMember { rank: 0 })
        ));
    }

    #[test]
    fn root_outside_group_is_rejected() {
        let comm = SingleProcessComm;
        assert!(matches!(
            gather(&comm, &[0], 2, Tag::Gather, &[]),
            Err(CouplerError::InvalidRoot { root: 2, size: 1 })
        ));
    }

    #[test]
    fn barrier_holds_members_until_all_arrive() {
        let arrived = AtomicUsize::new(0);
        let seen = universe(4)
            .run(|comm| {
                let members: Vec<usize> = (0..4).collect();
                arrived.fetch_add(1, Ordering::SeqCst);
                comm.barrier(&members).unwrap();
                arrived.load(Ordering::SeqCst)
            })
            .unwrap();
        assert_eq!(seen, vec![4; 4]);
    }

    #[test]
    fn barrier_within_subgroup_leaves_others_alone() {
        let results = universe(3)
            .run(|comm| {
                if comm.rank() == 1 {
                    return true;
                }
                comm.barrier(&[0, 2]).is_ok()
            })
            .unwrap();
        assert_eq!(results, vec![true; 3]);
    }
}
