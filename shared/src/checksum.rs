//! Divergence fingerprint of the controlled actor

use crate::actor::ControlActor;
use crate::bitstream::BitStream;
use crate::replica::{ReplicaId, GHOST_ID_BITS};

/// CRC-32 over the replica id and control state; zero without an actor.
///
/// Only an equality oracle between the two copies of the actor.
pub fn control_checksum<A: ControlActor>(replica: Option<ReplicaId>, actor: Option<&A>) -> u32 {
    let Some(actor) = actor else {
        return 0;
    };

    let mut scratch = BitStream::new();
    scratch.write_int(ReplicaId::wire_value(replica), GHOST_ID_BITS);
    actor.write_control_state(&mut scratch);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(scratch.as_bytes());
    hasher.finalize()
}
