//! Startup handshake.
//!
//! Both roles agree on continue/abort before entering the exchange loop:
//!
//! 1. The solver's error count is broadcast to the whole universe from the
//!    solver group's leader. The solver does this even when it has no
//!    partner, so a tracker can never be left waiting for it.
//! 2. A tracker without a partner stops before step 1; no solver exists to
//!    wait for it.
//! 3. When coupled, both groups build the channel and the tracker's error
//!    count is broadcast from tracker local rank 0 to every solver rank.
//!
//! Both sides see both counts before deciding, so they always make the same
//! decision.

use super::{Coordinator, ProtocolState, Role};
use crate::channel::{InterGroupChannel, RootRole};
use crate::comm::collective;
use crate::comm::Tag;
use crate::error::{CouplerError, Result};

/// Tracker local rank that reports the tracker's status to the solver.
const TRACKER_STATUS_ROOT: usize = 0;

/// How the handshake left this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Coupled { remote_size: usize },
    Standalone,
}

impl Coordinator<'_> {
    /// Run the startup handshake for this process's role.
    ///
    /// On success the coordinator moves to `Exchanging`; on any failure it
    /// moves to `Done` and issues no further collectives.
    pub fn handshake(&mut self) -> Result<HandshakeOutcome> {
        self.expect(ProtocolState::AwaitingHandshake, "handshake")?;
        let _span = tracing::info_span!("handshake", role = %self.role).entered();

        let result = match self.role {
            Role::Solver => self.solver_handshake(),
            Role::Tracker => self.tracker_handshake(),
        };
        self.state = match result {
            Ok(_) => ProtocolState::Exchanging,
            Err(_) => ProtocolState::Done,
        };
        result
    }

    /// Universe-wide broadcast of the solver's error count.
    fn universe_status(&self, solver_errors: u32) -> Result<u32> {
        let root = self.rendezvous.leader_of(Role::Solver).ok_or_else(|| {
            CouplerError::RoleConflict("no solver group to lead the startup handshake".into())
        })?;
        collective::broadcast_value(self.comm, &self.ctx.universe(), root, Tag::Broadcast, &solver_errors)
    }

    fn connect(&self) -> Result<Option<InterGroupChannel>> {
        match self.rendezvous.remote() {
            Some(remote) => {
                InterGroupChannel::connect(self.comm, &self.partition.group, remote.leader()).map(Some)
            }
            None => Ok(None),
        }
    }

    fn solver_handshake(&mut self) -> Result<HandshakeOutcome> {
        let solver_errors = self.universe_status(self.local_errors)?;
        if solver_errors > 0 {
            return Err(CouplerError::HandshakeFailed {
                side: Role::Solver,
                errors: solver_errors,
            });
        }

        let Some(channel) = self.connect()? else {
            tracing::debug!("no tracker present; running uncoupled");
            return Ok(HandshakeOutcome::Standalone);
        };

        // The solver sends nothing; the value is only read on a source.
        let tracker_errors = channel
            .broadcast(
                self.comm,
                &0u32,
                RootRole::Consumer {
                    remote_root: TRACKER_STATUS_ROOT,
                },
            )?
            .ok_or_else(|| CouplerError::Channel("tracker status missing".into()))?;
        if tracker_errors > 0 {
            return Err(CouplerError::HandshakeFailed {
                side: Role::Tracker,
                errors: tracker_errors,
            });
        }

        let remote_size = channel.remote_size();
        self.channel = Some(channel);
        Ok(HandshakeOutcome::Coupled { remote_size })
    }

    fn tracker_handshake(&mut self) -> Result<HandshakeOutcome> {
        if !self.rendezvous.is_coupled() && self.role.requires_partner() {
            if self.ctx.global_rank() == 0 {
                tracing::error!("Looks like we're all alone in the universe");
            }
            return Err(CouplerError::Standalone { role: self.role });
        }

        let solver_errors = self.universe_status(0)?;
        if solver_errors > 0 {
            return Err(CouplerError::HandshakeFailed {
                side: Role::Solver,
                errors: solver_errors,
            });
        }

        let channel = self
            .connect()?
            .ok_or(CouplerError::Standalone { role: self.role })?;

        let role = RootRole::resolve(self.partition.group.local_rank(), TRACKER_STATUS_ROOT, true);
        channel.broadcast(self.comm, &self.local_errors, role)?;
        if self.local_errors > 0 {
            return Err(CouplerError::HandshakeFailed {
                side: Role::Tracker,
                errors: self.local_errors,
            });
        }

        let remote_size = channel.remote_size();
        self.channel = Some(channel);
        Ok(HandshakeOutcome::Coupled { remote_size })
    }
}
