//! Solver/tracker coupling protocol.
//!
//! A `Coordinator` walks each process through the protocol:
//!
//! ```text
//! AwaitingValidation -> AwaitingHandshake -> Exchanging -> Done
//! ```
//!
//! Every step checks the current state before touching the transport, so a
//! step called out of order fails immediately with `OutOfSequence` instead
//! of entering a collective the partner program will never match.

pub mod exchange;
pub mod handshake;

use std::fmt;

use crate::channel::InterGroupChannel;
use crate::comm::CommunicationBackend;
use crate::config::{RoleConfig, ValidationReport};
use crate::context::ProcessContext;
use crate::discovery::{self, Rendezvous};
use crate::error::{CouplerError, Result};
use crate::partition::{self, Group, Partition};
use crate::stats::Stats;
use crate::wire::WireValue;

pub use exchange::{Component, FieldBuffer, VelocityField};
pub use handshake::HandshakeOutcome;

/// The two programs that can be coupled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Produces the velocity field each iteration.
    Solver,
    /// Consumes the full field; cannot run without a solver.
    Tracker,
}

impl Role {
    /// Default partition label for processes playing this role.
    pub fn label(self) -> &'static str {
        match self {
            Role::Solver => "solver",
            Role::Tracker => "tracker",
        }
    }

    pub fn requires_partner(self) -> bool {
        matches!(self, Role::Tracker)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Solver => "Solver",
            Role::Tracker => "Tracker",
        })
    }
}

impl WireValue for Role {
    fn encode(&self) -> Vec<u8> {
        vec![match self {
            Role::Solver => 0,
            Role::Tracker => 1,
        }]
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [0] => Ok(Role::Solver),
            [1] => Ok(Role::Tracker),
            other => Err(CouplerError::Wire(format!("unknown role announcement {other:?}"))),
        }
    }
}

/// Protocol step a coordinator is waiting to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    AwaitingValidation,
    AwaitingHandshake,
    Exchanging,
    Done,
}

/// Per-process protocol driver for one role.
pub struct Coordinator<'a> {
    comm: &'a dyn CommunicationBackend,
    ctx: ProcessContext,
    role: Role,
    partition: Partition,
    rendezvous: Rendezvous,
    state: ProtocolState,
    local_errors: u32,
    channel: Option<InterGroupChannel>,
}

impl<'a> Coordinator<'a> {
    /// Partition the universe by `label` and find the partner group.
    ///
    /// Collective over the whole universe.
    pub fn join(
        comm: &'a dyn CommunicationBackend,
        ctx: ProcessContext,
        role: Role,
        label: &str,
    ) -> Result<Self> {
        let partition = partition::partition(&ctx, comm, label)?;
        let rendezvous = discovery::rendezvous(&ctx, comm, &partition, role)?;
        Ok(Self {
            comm,
            ctx,
            role,
            partition,
            rendezvous,
            state: ProtocolState::AwaitingValidation,
            local_errors: 0,
            channel: None,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn context(&self) -> &ProcessContext {
        &self.ctx
    }

    pub fn group(&self) -> &Group {
        &self.partition.group
    }

    pub fn rendezvous(&self) -> &Rendezvous {
        &self.rendezvous
    }

    pub fn is_coupled(&self) -> bool {
        self.rendezvous.is_coupled()
    }

    /// The channel to the partner group, once the handshake has built it.
    pub fn channel(&self) -> Option<&InterGroupChannel> {
        self.channel.as_ref()
    }

    fn expect(&self, expected: ProtocolState, attempted: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(CouplerError::OutOfSequence {
                state: self.state,
                attempted,
            });
        }
        Ok(())
    }

    /// Record the local validation result. Purely local; no messaging.
    pub fn record_validation(&mut self, report: &ValidationReport) -> Result<()> {
        self.expect(ProtocolState::AwaitingValidation, "record_validation")?;
        self.local_errors = report.error_count();
        self.state = ProtocolState::AwaitingHandshake;
        Ok(())
    }

    /// Leave the exchange loop.
    pub fn finish(&mut self) -> Result<()> {
        self.expect(ProtocolState::Exchanging, "finish")?;
        self.state = ProtocolState::Done;
        Ok(())
    }
}

/// Run one process of a coupled (or standalone) run from start to finish.
///
/// Returns the field buffers as they stood after the last iteration: the
/// local slice on a solver, the full field on a tracker.
pub fn run(
    comm: &dyn CommunicationBackend,
    config: &RoleConfig,
    label: Option<&str>,
    stats: Option<&mut Stats>,
) -> Result<VelocityField> {
    let ctx = ProcessContext::from_backend(comm)?;
    let role = config.role();
    let mut coordinator = Coordinator::join(comm, ctx, role, label.unwrap_or(role.label()))?;

    let report = config.validate(coordinator.group().local_size());
    if coordinator.group().is_leader() {
        report.log(role);
    }
    coordinator.record_validation(&report)?;

    let outcome = coordinator.handshake()?;
    if coordinator.group().is_leader() {
        let ranks = coordinator.group().local_size();
        match outcome {
            HandshakeOutcome::Coupled { remote_size } => {
                tracing::info!("Starting the {role} with {ranks} rank(s), coupled to {remote_size} partner rank(s)")
            }
            HandshakeOutcome::Standalone => {
                tracing::info!("Starting the {role} with {ranks} rank(s), uncoupled")
            }
        }
    }

    match config {
        RoleConfig::Solver(config) => exchange::run_solver(&mut coordinator, config, stats),
        RoleConfig::Tracker(config) => exchange::run_tracker(&mut coordinator, config, stats),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SingleProcessComm;

    #[test]
    fn role_announcements_round_trip() {
        assert_eq!(Role::decode(&Role::Tracker.encode()).unwrap(), Role::Tracker);
        assert!(Role::decode(&[7]).is_err());
    }

    #[test]
    fn only_the_tracker_requires_a_partner() {
        assert!(Role::Tracker.requires_partner());
        assert!(!Role::Solver.requires_partner());
    }

    #[test]
    fn handshake_before_validation_is_out_of_sequence() {
        let comm = SingleProcessComm;
        let ctx = ProcessContext::from_backend(&comm).unwrap();
        let mut coordinator = Coordinator::join(&comm, ctx, Role::Solver, "solver").unwrap();
        let err = coordinator.handshake().unwrap_err();
        assert!(matches!(
            err,
            CouplerError::OutOfSequence {
                state: ProtocolState::AwaitingValidation,
                attempted: "handshake"
            }
        ));
        assert_eq!(coordinator.state(), ProtocolState::AwaitingValidation);
    }

    #[test]
    fn validation_cannot_be_recorded_twice() {
        let comm = SingleProcessComm;
        let ctx = ProcessContext::from_backend(&comm).unwrap();
        let mut coordinator = Coordinator::join(&comm, ctx, Role::Solver, "solver").unwrap();
        coordinator.record_validation(&ValidationReport::default()).unwrap();
        assert!(coordinator.record_validation(&ValidationReport::default()).is_err());
    }
}
