//! Client side of the control protocol
//!
//! Local input is applied to the controlled actor immediately and queued.
//! Every outgoing packet carries the unconfirmed tail of the queue starting
//! at the oldest boundary in the delivery pipeline, so each move rides in
//! several consecutive packets. When the server sends a correction, the
//! actor snaps to it and the queued moves are replayed on top.

use log::debug;
use shared::actor::{drive, ControlActor, ControlHandle, SimulationMode};
use shared::bitstream::BitStream;
use shared::checksum::control_checksum;
use shared::connection::DeliveryRecord;
use shared::error::ProtocolError;
use shared::move_queue::MoveQueue;
use shared::moves::Move;
use shared::pipeline::{DeliveryPipeline, DELIVERY_PIPELINE_DEPTH};
use shared::position::{decode_point, Point, PointCompressor};
use shared::replica::{ReplicaId, ReplicaLayer, GHOST_ID_BITS};
use shared::session::{ControlSession, SessionState};
use shared::MAX_PENDING_MOVES;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug)]
pub struct ClientControlSession<A, const N: usize = DELIVERY_PIPELINE_DEPTH> {
    control: ControlHandle<A>,
    compressor: PointCompressor,
    pending_moves: MoveQueue,
    pipeline: DeliveryPipeline<N>,
    replay_required: bool,

    pub corrections_received: u64,
    pub last_checksum_sent: u32,
}

impl<A, const N: usize> Default for ClientControlSession<A, N> {
    fn default() -> Self {
        Self {
            control: ControlHandle::empty(),
            compressor: PointCompressor::default(),
            pending_moves: MoveQueue::new(),
            pipeline: DeliveryPipeline::new(),
            replay_required: false,
            corrections_received: 0,
            last_checksum_sent: 0,
        }
    }
}

impl<A: ControlActor, const N: usize> ClientControlSession<A, N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_moves(&self) -> &MoveQueue {
        &self.pending_moves
    }

    pub fn pipeline(&self) -> &DeliveryPipeline<N> {
        &self.pipeline
    }

    /// Forgets send history, e.g. after the connection was re-established
    pub fn reset_pipeline(&mut self, index: u32) {
        self.pipeline.reset(index);
    }

    /// Applies a fresh local move and queues it for the server.
    ///
    /// A full queue means the server has stopped confirming anything, which
    /// the owner must treat as a dead connection.
    pub fn push_move(&mut self, mv: Move) -> Result<(), ProtocolError> {
        if self.pending_moves.len() >= MAX_PENDING_MOVES {
            return Err(ProtocolError::TooManyPendingMoves {
                pending: self.pending_moves.len() + 1,
                limit: MAX_PENDING_MOVES,
            });
        }
        if let Some(actor) = self.control.get() {
            drive(&mut *actor.borrow_mut(), &mv, SimulationMode::ClientPredict);
        }
        self.pending_moves.append(mv);
        Ok(())
    }

    /// Re-applies every unconfirmed move to the corrected actor
    fn replay(&mut self) {
        self.replay_required = false;
        let Some(actor) = self.control.get() else {
            return;
        };
        let mut actor = actor.borrow_mut();
        for mv in self.pending_moves.iter() {
            drive(&mut *actor, mv, SimulationMode::ClientReplay);
        }
        actor.on_replay_complete();
        debug!(
            "Replayed {} moves from index {}",
            self.pending_moves.len(),
            self.pending_moves.first_move_index()
        );
    }
}

impl<A: ControlActor, const N: usize> ControlSession<A> for ClientControlSession<A, N> {
    fn write_packet<R: ReplicaLayer<A>>(
        &mut self,
        replicas: &R,
        stream: &mut BitStream,
        record: &mut DeliveryRecord,
    ) -> Result<(), ProtocolError> {
        let first_move_index = self.pending_moves.first_move_index();
        let end_index = self.pending_moves.end_index();
        let first_send_index = self.pipeline.oldest().max(first_move_index).min(end_index);

        let actor = self.control.get();
        let state = actor.as_ref().map(|a| a.borrow());
        let replica = actor.as_ref().and_then(|a| replicas.index_of_replica(a));
        let checksum = control_checksum(replica, state.as_deref());
        stream.write_u32(checksum);
        self.last_checksum_sent = checksum;

        let count = end_index - first_send_index;
        if count as usize > MAX_PENDING_MOVES {
            return Err(ProtocolError::TooManyPendingMoves {
                pending: count as usize,
                limit: MAX_PENDING_MOVES,
            });
        }
        stream.write_u32(first_send_index);
        stream.write_ranged_u32(count, 0, MAX_PENDING_MOVES as u32);

        let mut prev = Move::default();
        for mv in self.pending_moves.range_from(first_send_index) {
            mv.pack(stream, &prev);
            prev = *mv;
        }

        record.first_unsent_move_index = Some(end_index);
        record.last_control_position = state.as_ref().map(|a| a.position());
        self.pipeline.push(end_index);
        Ok(())
    }

    fn read_packet<R: ReplicaLayer<A>>(
        &mut self,
        replicas: &R,
        stream: &mut BitStream,
    ) -> Result<(), ProtocolError> {
        let valid = stream.read_flag()?;
        self.compressor.relative = valid;
        let changed = stream.read_flag()?;

        match (valid, changed) {
            (true, true) => {
                let id = ReplicaId(stream.read_int(GHOST_ID_BITS)?);
                let actor = replicas
                    .resolve_replica(id)
                    .ok_or(ProtocolError::UnknownReplica(id))?;
                actor.borrow_mut().read_control_state(stream)?;
                self.compressor.reference = actor.borrow().position();
                if !self.control.points_to(&actor) {
                    debug!("Now controlling {:?}", id);
                    self.control.attach(&actor);
                }
                self.replay_required = true;
                self.corrections_received += 1;
            }
            (true, false) => {
                self.compressor.reference = decode_point(Point::ZERO, false, stream)?;
            }
            (false, _) => {
                if self.control.is_valid() {
                    debug!("Server released the control object");
                }
                self.control.release();
            }
        }
        Ok(())
    }

    fn finish_packet(&mut self) {
        if self.replay_required {
            self.replay();
        }
    }

    fn packet_delivered(&mut self, record: &DeliveryRecord) {
        if let Some(upto) = record.first_unsent_move_index {
            self.pending_moves.retire(upto);
        }
    }

    fn packet_dropped(&mut self, record: &DeliveryRecord) {
        debug!(
            "Client packet {} dropped with moves below {:?}",
            record.sequence, record.first_unsent_move_index
        );
    }

    fn state(&self) -> SessionState {
        if !self.control.is_valid() {
            SessionState::Idle
        } else if self.replay_required {
            SessionState::AwaitingResync
        } else {
            SessionState::Controlling
        }
    }

    fn control_object(&self) -> Option<Rc<RefCell<A>>> {
        self.control.get()
    }

    fn compressor(&self) -> &PointCompressor {
        &self.compressor
    }
}
