//! Coordination of two independently launched process groups.
//!
//! Processes are partitioned into groups by role label, discover their
//! partner group, agree on startup success in a handshake, and then stream
//! a velocity field from the solver group to the tracker group once per
//! iteration over an inter-group channel.

pub mod channel;
pub mod comm;
pub mod config;
pub mod context;
pub mod coupling;
pub mod demo;
pub mod discovery;
pub mod error;
pub mod partition;
pub mod simulate;
pub mod stats;
pub mod wire;
