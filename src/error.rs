use std::time::Duration;

use thiserror::Error;

use crate::comm::Tag;
use crate::coupling::{ProtocolState, Role};

#[derive(Debug, Error)]
pub enum CouplerError {
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("{role} found no partner group in the universe")]
    Standalone { role: Role },

    #[error("{side} had {errors} error(s) during startup")]
    HandshakeFailed { side: Role, errors: u32 },

    #[error(
        "rank {rank} waited {waited:?} for {tag:?} from rank {peer}; \
         the peer never entered the matching call"
    )]
    CollectiveMismatch {
        rank: usize,
        peer: usize,
        tag: Tag,
        waited: Duration,
    },

    #[error("protocol step `{attempted}` attempted while in state {state:?}")]
    OutOfSequence {
        state: ProtocolState,
        attempted: &'static str,
    },

    #[error("{0} groups in the universe; at most two can be coupled")]
    TooManyGroups(usize),

    #[error("Role conflict: {0}")]
    RoleConflict(String),

    #[error("rank {rank} is not a member of the group")]
    NotAMember { rank: usize },

    #[error("root {root} is outside a group of size {size}")]
    InvalidRoot { root: usize, size: usize },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("field size mismatch: buffer holds {expected} values, received {received}")]
    FieldSizeMismatch { expected: usize, received: usize },

    #[error("Wire format error: {0}")]
    Wire(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CouplerError>;
