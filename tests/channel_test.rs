//! Inter-group channel behaviour over an in-process universe.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use mpmd_coupler::channel::{InterGroupChannel, RootRole};
use mpmd_coupler::comm::{CommunicationBackend, LocalComm, LocalUniverse};
use mpmd_coupler::context::ProcessContext;
use mpmd_coupler::demo::{self, CASES};
use mpmd_coupler::error::CouplerError;
use mpmd_coupler::partition::{self, Group};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Ranks below `split` are labelled "a", the rest "b".
fn connect(comm: &LocalComm, split: usize) -> (Group, InterGroupChannel) {
    let ctx = ProcessContext::from_backend(comm).unwrap();
    let label = if comm.rank() < split { "a" } else { "b" };
    let group = partition::partition(&ctx, comm, label).unwrap().group;
    let remote_leader = if comm.rank() < split { split } else { 0 };
    let channel = InterGroupChannel::connect(comm, &group, remote_leader).unwrap();
    (group, channel)
}

#[test]
fn channel_knows_both_sides() {
    let channels = LocalUniverse::with_timeout(5, TIMEOUT)
        .run(|comm| connect(&comm, 3).1)
        .unwrap();

    for (rank, channel) in channels.iter().enumerate() {
        if rank < 3 {
            assert_eq!(channel.local_size(), 3);
            assert_eq!(channel.remote_members(), &[3, 4]);
            assert_eq!(channel.local_rank(), rank);
        } else {
            assert_eq!(channel.local_size(), 2);
            assert_eq!(channel.remote_members(), &[0, 1, 2]);
            assert_eq!(channel.local_rank(), rank - 3);
        }
    }
}

#[test]
fn only_the_designated_root_sources_a_broadcast() {
    // Sending group of 3, receiving group of 2, local root 1.
    let results = LocalUniverse::with_timeout(5, TIMEOUT)
        .run(|comm| {
            let (_, channel) = connect(&comm, 3);
            let sending = comm.rank() < 3;
            let value = 100 + comm.rank() as u32;
            channel.broadcast_with_root(&comm, &value, 1, sending).unwrap()
        })
        .unwrap();
    assert_eq!(results, vec![None, None, None, Some(101), Some(101)]);
}

#[test]
fn broadcast_works_from_every_root_in_both_directions() {
    for a_sends in [true, false] {
        let senders = if a_sends { 3 } else { 2 };
        for root in 0..senders {
            let results = LocalUniverse::with_timeout(5, TIMEOUT)
                .run(|comm| {
                    let (group, channel) = connect(&comm, 3);
                    let sending = (comm.rank() < 3) == a_sends;
                    let role = RootRole::resolve(group.local_rank(), root, sending);
                    let value = format!("from {}", comm.rank());
                    (sending, channel.broadcast(&comm, &value, role).unwrap())
                })
                .unwrap();

            let source = if a_sends { root } else { 3 + root };
            for (sending, received) in results {
                if sending {
                    assert_eq!(received, None);
                } else {
                    assert_eq!(received, Some(format!("from {source}")));
                }
            }
        }
    }
}

#[test]
fn consumer_with_out_of_range_root_is_rejected() {
    let results = LocalUniverse::with_timeout(3, TIMEOUT)
        .run(|comm| {
            let (_, channel) = connect(&comm, 1);
            if comm.rank() == 0 {
                // The lone rank of group "a" listens for a root group "b" lacks.
                Some(channel.broadcast(&comm, &0u32, RootRole::Consumer { remote_root: 5 }))
            } else {
                None
            }
        })
        .unwrap();
    assert!(matches!(
        results[0],
        Some(Err(CouplerError::InvalidRoot { root: 5, size: 2 }))
    ));
}

#[test]
fn sending_root_outside_group_is_rejected() {
    let results = LocalUniverse::with_timeout(2, TIMEOUT)
        .run(|comm| {
            let (_, channel) = connect(&comm, 1);
            if comm.rank() == 0 {
                Some(channel.broadcast_with_root(&comm, &1u32, 3, true))
            } else {
                None
            }
        })
        .unwrap();
    assert!(matches!(
        results[0],
        Some(Err(CouplerError::InvalidRoot { root: 3, size: 1 }))
    ));
}

#[test]
fn all_gather_concatenates_in_remote_rank_order() {
    let results = LocalUniverse::with_timeout(5, TIMEOUT)
        .run(|comm| {
            let (group, channel) = connect(&comm, 3);
            if comm.rank() < 3 {
                let slice = vec![group.local_rank() as f64; 2];
                channel.all_gather_into(&comm, &slice, &mut []).unwrap();
                Vec::new()
            } else {
                let mut full = vec![-1.0; 6];
                channel.all_gather_into(&comm, &[], &mut full).unwrap();
                full
            }
        })
        .unwrap();

    for received in &results[3..] {
        assert_eq!(received, &vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0]);
    }
}

#[test]
fn connecting_to_a_local_rank_is_rejected() {
    let comm = mpmd_coupler::comm::SingleProcessComm;
    let ctx = ProcessContext::from_backend(&comm).unwrap();
    let group = partition::partition(&ctx, &comm, "solo").unwrap().group;
    assert!(matches!(
        InterGroupChannel::connect(&comm, &group, 0),
        Err(CouplerError::Channel(_))
    ));
}

#[test]
fn channel_barrier_waits_for_both_groups() {
    let entered = AtomicUsize::new(0);
    let seen = LocalUniverse::with_timeout(5, TIMEOUT)
        .run(|comm| {
            let (_, channel) = connect(&comm, 2);
            let mut seen = Vec::new();
            for round in 1..=3 {
                if comm.rank() == 4 {
                    std::thread::sleep(Duration::from_millis(20));
                }
                entered.fetch_add(1, Ordering::SeqCst);
                channel.barrier(&comm).unwrap();
                seen.push(entered.load(Ordering::SeqCst));
                channel.barrier(&comm).unwrap();
                assert!(entered.load(Ordering::SeqCst) <= 5 * round + 4);
            }
            seen
        })
        .unwrap();

    // Nobody leaves a round's first barrier before all five ranks entered it.
    for rank_view in seen {
        for (round, count) in rank_view.into_iter().enumerate() {
            assert!(count >= 5 * (round + 1), "round {round} released early at {count}");
        }
    }
}

#[test]
fn half_split_broadcasts_reach_the_other_half() {
    let received = LocalUniverse::with_timeout(5, TIMEOUT)
        .run(|comm| demo::run_broadcasts(&comm).unwrap())
        .unwrap();

    // Ranks 0 and 1 form the first half, ranks 2 to 4 the second.
    for (rank, values) in received.iter().enumerate() {
        let first_half = rank < 2;
        let expected: Vec<Option<u32>> = CASES
            .iter()
            .map(|case| {
                let sending = (case.sending_group == 0) == first_half;
                (!sending).then(|| case.value())
            })
            .collect();
        assert_eq!(values, &expected, "rank {rank}");
    }
    assert_eq!(received[3], vec![Some(999), None, Some(1000)]);
}

#[test]
fn half_split_needs_four_processes() {
    let results = LocalUniverse::with_timeout(3, TIMEOUT)
        .run(|comm| demo::run_broadcasts(&comm))
        .unwrap();
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(CouplerError::Usage(_)))));
}

#[test]
fn passive_sender_never_touches_the_transport() {
    let channels = LocalUniverse::with_timeout(2, TIMEOUT)
        .run(|comm| connect(&comm, 1).1)
        .unwrap();
    // A backend that fails every send and receive.
    let offline = mpmd_coupler::comm::SingleProcessComm;
    let result = channels[0].broadcast(&offline, &7u32, RootRole::PassiveSender);
    assert_eq!(result.unwrap(), None);
    assert!(channels[0]
        .broadcast(&offline, &7u32, RootRole::Source)
        .is_err());
}
