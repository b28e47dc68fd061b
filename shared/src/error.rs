//! Error types for the bit stream and the control protocol

use crate::replica::ReplicaId;
use thiserror::Error;

/// Failures while reading a bit-packed payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream exhausted: wanted {wanted} bits, {remaining} remaining")]
    Exhausted { wanted: u32, remaining: usize },
    #[error("ranged value {value} outside [{min}, {max}]")]
    OutOfRange { value: u32, min: u32, max: u32 },
}

/// Conditions that mean the peer is malformed or hostile.
///
/// The session never tears anything down itself. Whoever owns the connection
/// receives one of these and is expected to drop it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("{pending} pending moves exceeds the limit of {limit}")]
    TooManyPendingMoves { pending: usize, limit: usize },
    #[error("move window starts at {declared} but only {received} moves were received")]
    MoveWindowGap { declared: u32, received: u32 },
    #[error("move window ends at {end} but {received} moves were already received")]
    StaleMoveWindow { end: u32, received: u32 },
    #[error("stalled move backlog exceeds the limit of {limit}")]
    BacklogOverflow { limit: usize },
    #[error("correction names unknown replica {0:?}")]
    UnknownReplica(ReplicaId),
    #[error("malformed packet: {0}")]
    Stream(#[from] StreamError),
}
