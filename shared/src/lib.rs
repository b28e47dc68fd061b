//! Control-actor synchronization protocol shared by client and server
//!
//! Everything in here is role-independent: the bit stream, the move record
//! and its queue, the delivery pipeline, position compression, the divergence
//! checksum, the actor contract and the minimal replica and connection layers
//! the sessions ride on. The two session roles live in the `client` and
//! `server` crates.

use serde::{Deserialize, Serialize};

pub mod actor;
pub mod bitstream;
pub mod checksum;
pub mod connection;
pub mod error;
pub mod move_queue;
pub mod moves;
pub mod pipeline;
pub mod position;
pub mod replica;
pub mod session;
pub mod ship;

pub use actor::{drive, ControlActor, ControlHandle, SimulationMode};
pub use bitstream::BitStream;
pub use checksum::control_checksum;
pub use connection::{Connection, Delivery, DeliveryRecord};
pub use error::{ProtocolError, StreamError};
pub use move_queue::MoveQueue;
pub use moves::Move;
pub use pipeline::{DeliveryPipeline, DELIVERY_PIPELINE_DEPTH};
pub use position::{Point, PointCompressor};
pub use replica::{Ghost, GhostTable, ReplicaId, ReplicaLayer};
pub use session::{ControlSession, SessionState};
pub use ship::Ship;

pub const PROTOCOL_VERSION: u32 = 1;

/// Most moves a client may have outstanding, and the most one packet declares
pub const MAX_PENDING_MOVES: usize = 48;
/// Ceiling of the server's per-client time budget, in milliseconds
pub const MAX_MOVE_CREDIT_MS: u32 = 512;

/// Datagram envelope. Protocol traffic rides bit-packed inside `Data`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect { client_version: u32 },
    Connected { client_id: u32 },
    Data { payload: Vec<u8> },
    Disconnect,
    Disconnected { reason: String },
}
