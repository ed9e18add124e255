//! In-process universe: N simulated processes, one thread per rank.
//!
//! Each rank owns a mailbox keyed by (source, tag). `send` never blocks;
//! `receive` blocks until a matching message arrives, or until the optional
//! timeout expires. With a timeout a mismatched call sequence surfaces as
//! `CollectiveMismatch` instead of a silent hang.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{CommunicationBackend, Tag};
use crate::error::{CouplerError, Result};

#[derive(Default)]
struct Mailbox {
    queues: Mutex<HashMap<(usize, Tag), VecDeque<Vec<u8>>>>,
    arrived: Condvar,
}

struct Shared {
    mailboxes: Vec<Mailbox>,
    timeout: Option<Duration>,
}

/// A universe of simulated processes sharing one address space.
pub struct LocalUniverse {
    shared: Arc<Shared>,
}

impl LocalUniverse {
    /// Universe whose receives block forever, as under MPI.
    pub fn new(size: usize) -> Self {
        Self::build(size, None)
    }

    /// Universe whose receives give up after `timeout`.
    pub fn with_timeout(size: usize, timeout: Duration) -> Self {
        Self::build(size, Some(timeout))
    }

    fn build(size: usize, timeout: Option<Duration>) -> Self {
        let mailboxes = (0..size).map(|_| Mailbox::default()).collect();
        Self {
            shared: Arc::new(Shared { mailboxes, timeout }),
        }
    }

    pub fn size(&self) -> usize {
        self.shared.mailboxes.len()
    }

    /// Endpoint for global rank `rank`.
    pub fn comm(&self, rank: usize) -> Result<LocalComm> {
        if rank >= self.size() {
            return Err(CouplerError::Transport(format!(
                "rank {rank} outside local universe of size {}",
                self.size()
            )));
        }
        Ok(LocalComm {
            shared: Arc::clone(&self.shared),
            rank,
        })
    }

    /// Run `body` once per rank, each on its own thread, and collect the
    /// results in rank order. A panic on any rank is re-raised here.
    ///
    /// No rank starts until every thread has been spawned. If a spawn
    /// fails, the ranks already spawned exit without running `body`.
    pub fn run<T, F>(&self, body: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(LocalComm) -> T + Sync,
    {
        let comms = (0..self.size())
            .map(|rank| self.comm(rank))
            .collect::<Result<Vec<_>>>()?;
        let gate = StartGate::default();
        let (body, gate_ref) = (&body, &gate);

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(comms.len());
            for comm in comms {
                let spawned = thread::Builder::new()
                    .name(format!("rank-{}", comm.rank))
                    .spawn_scoped(scope, move || gate_ref.wait().then(|| body(comm)));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        gate.release(false);
                        return Err(e.into());
                    }
                }
            }
            gate.release(true);

            Ok(handles
                .into_iter()
                .filter_map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect())
        })
    }
}

/// Holds spawned ranks until `run` decides whether they may start.
#[derive(Default)]
struct StartGate {
    decision: Mutex<Option<bool>>,
    decided: Condvar,
}

impl StartGate {
    fn release(&self, start: bool) {
        *self.decision.lock() = Some(start);
        self.decided.notify_all();
    }

    fn wait(&self) -> bool {
        let mut decision = self.decision.lock();
        loop {
            if let Some(start) = *decision {
                return start;
            }
            self.decided.wait(&mut decision);
        }
    }
}

/// One rank's endpoint into a `LocalUniverse`.
#[derive(Clone)]
pub struct LocalComm {
    shared: Arc<Shared>,
    rank: usize,
}

impl LocalComm {
    fn check_rank(&self, peer: usize) -> Result<()> {
        if peer >= self.shared.mailboxes.len() {
            return Err(CouplerError::Transport(format!(
                "rank {peer} outside local universe of size {}",
                self.shared.mailboxes.len()
            )));
        }
        Ok(())
    }
}

impl CommunicationBackend for LocalComm {
    fn send(&self, dest: usize, tag: Tag, payload: &[u8]) -> Result<()> {
        self.check_rank(dest)?;
        let mailbox = &self.shared.mailboxes[dest];
        mailbox
            .queues
            .lock()
            .entry((self.rank, tag))
            .or_default()
            .push_back(payload.to_vec());
        mailbox.arrived.notify_all();
        Ok(())
    }

    fn receive(&self, source: usize, tag: Tag) -> Result<Vec<u8>> {
        self.check_rank(source)?;
        let mailbox = &self.shared.mailboxes[self.rank];
        let started = Instant::now();
        let mut queues = mailbox.queues.lock();
        loop {
            if let Some(payload) = queues.get_mut(&(source, tag)).and_then(VecDeque::pop_front) {
                return Ok(payload);
            }
            match self.shared.timeout {
                Some(limit) => {
                    let waited = started.elapsed();
                    if waited >= limit {
                        tracing::warn!(rank = self.rank, source, ?tag, "receive timed out");
                        return Err(CouplerError::CollectiveMismatch {
                            rank: self.rank,
                            peer: source,
                            tag,
                            waited,
                        });
                    }
                    mailbox.arrived.wait_for(&mut queues, limit - waited);
                }
                None => mailbox.arrived.wait(&mut queues),
            }
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.shared.mailboxes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_fifo_per_source_and_tag() {
        let universe = LocalUniverse::new(2);
        let a = universe.comm(0).unwrap();
        let b = universe.comm(1).unwrap();
        a.send(1, Tag::Gather, &[1]).unwrap();
        a.send(1, Tag::Broadcast, &[9]).unwrap();
        a.send(1, Tag::Gather, &[2]).unwrap();
        assert_eq!(b.receive(0, Tag::Broadcast).unwrap(), vec![9]);
        assert_eq!(b.receive(0, Tag::Gather).unwrap(), vec![1]);
        assert_eq!(b.receive(0, Tag::Gather).unwrap(), vec![2]);
    }

    #[test]
    fn receive_times_out_without_matching_send() {
        let universe = LocalUniverse::with_timeout(2, Duration::from_millis(20));
        let b = universe.comm(1).unwrap();
        let err = b.receive(0, Tag::Broadcast).unwrap_err();
        assert!(matches!(
            err,
            CouplerError::CollectiveMismatch { rank: 1, peer: 0, tag: Tag::Broadcast, .. }
        ));
        assert!(err.to_string().contains("for Broadcast from rank 0"));
    }

    #[test]
    fn run_returns_results_in_rank_order() {
        let universe = LocalUniverse::new(4);
        let ranks = universe.run(|comm| comm.rank() * 10).unwrap();
        assert_eq!(ranks, vec![0, 10, 20, 30]);
    }

    #[test]
    fn closed_gate_turns_waiting_ranks_away() {
        let gate = StartGate::default();
        let started = thread::scope(|scope| {
            let waiter = scope.spawn(|| gate.wait());
            gate.release(false);
            waiter.join().unwrap()
        });
        assert!(!started);

        let open = StartGate::default();
        open.release(true);
        assert!(open.wait());
    }

    #[test]
    fn out_of_range_peer_is_rejected() {
        let universe = LocalUniverse::new(2);
        let a = universe.comm(0).unwrap();
        assert!(a.send(5, Tag::Gather, &[]).is_err());
        assert!(universe.comm(2).is_err());
    }
}
