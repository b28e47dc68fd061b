//! Server side of the control protocol
//!
//! The server owns the authoritative copy of the controlled actor. It applies
//! client moves in index order, never faster than the real time credited to
//! the client, and only sends the actor's full state back when the client's
//! fingerprint says the two copies have diverged.

use log::{debug, warn};
use shared::actor::{drive, ControlActor, ControlHandle, SimulationMode};
use shared::bitstream::BitStream;
use shared::checksum::control_checksum;
use shared::connection::DeliveryRecord;
use shared::error::ProtocolError;
use shared::moves::{Move, MAX_MOVE_DURATION_MS};
use shared::position::{encode_point, Point, PointCompressor};
use shared::replica::{ReplicaLayer, GHOST_ID_BITS};
use shared::session::{ControlSession, SessionState};
use shared::{MAX_MOVE_CREDIT_MS, MAX_PENDING_MOVES};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Debug)]
pub struct ServerControlSession<A> {
    control: ControlHandle<A>,
    compressor: PointCompressor,

    /// Index after the last move applied to the actor
    first_move_index: u32,
    /// Index the next newly received move must carry
    next_receive_index: u32,
    /// Received moves the credit ledger could not cover yet, in index order
    stalled: VecDeque<(u32, Move)>,

    credit: u32,
    last_client_checksum: u32,

    pub moves_applied: u64,
    pub moves_skipped: u64,
    pub corrections_sent: u64,
}

impl<A> Default for ServerControlSession<A> {
    fn default() -> Self {
        Self {
            control: ControlHandle::empty(),
            compressor: PointCompressor::default(),
            first_move_index: 0,
            next_receive_index: 0,
            stalled: VecDeque::new(),
            credit: 0,
            last_client_checksum: 0,
            moves_applied: 0,
            moves_skipped: 0,
            corrections_sent: 0,
        }
    }
}

impl<A: ControlActor> ServerControlSession<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands control of `actor` to this client, e.g. after a respawn
    pub fn set_control_object(&mut self, actor: &Rc<RefCell<A>>) {
        self.control.attach(actor);
    }

    pub fn release_control(&mut self) {
        self.control.release();
    }

    pub fn first_move_index(&self) -> u32 {
        self.first_move_index
    }

    pub fn credit(&self) -> u32 {
        self.credit
    }

    pub fn stalled_moves(&self) -> usize {
        self.stalled.len()
    }

    pub fn last_client_checksum(&self) -> u32 {
        self.last_client_checksum
    }

    /// Credits `amount` milliseconds of real time to the client.
    ///
    /// Stalled moves are applied first. Whatever then exceeds the ceiling is
    /// not banked: the actor is run forward by exactly that much using its
    /// current input.
    pub fn add_credit(&mut self, amount: u32) {
        self.credit = self.credit.saturating_add(amount);
        self.apply_stalled_moves();

        if self.credit <= MAX_MOVE_CREDIT_MS {
            return;
        }
        let overflow = self.credit - MAX_MOVE_CREDIT_MS;
        self.credit = MAX_MOVE_CREDIT_MS;

        let Some(actor) = self.control.get() else {
            return;
        };
        debug!("Forcing {}ms catch-up tick", overflow);
        let mut actor = actor.borrow_mut();
        let current = actor.current_move();
        let mut remaining = overflow;
        while remaining > 0 {
            let step = remaining.min(MAX_MOVE_DURATION_MS);
            drive(
                &mut *actor,
                &current.with_duration(step),
                SimulationMode::ServerFromClient,
            );
            remaining -= step;
        }
    }

    /// Applies held moves in order while the ledger covers them
    fn apply_stalled_moves(&mut self) {
        let Some(actor) = self.control.get() else {
            // Nothing to drive: consume the input without effect
            if let Some(&(last, _)) = self.stalled.back() {
                self.first_move_index = last + 1;
            }
            self.moves_skipped += self.stalled.len() as u64;
            self.stalled.clear();
            return;
        };

        while let Some(&(index, mv)) = self.stalled.front() {
            if mv.duration() > self.credit {
                debug!(
                    "Move {} stalled: needs {}ms, ledger holds {}ms",
                    index,
                    mv.duration(),
                    self.credit
                );
                break;
            }
            self.credit -= mv.duration();
            drive(
                &mut *actor.borrow_mut(),
                &mv,
                SimulationMode::ServerFromClient,
            );
            self.first_move_index = index + 1;
            self.moves_applied += 1;
            self.stalled.pop_front();
        }
    }
}

impl<A: ControlActor> ControlSession<A> for ServerControlSession<A> {
    fn write_packet<R: ReplicaLayer<A>>(
        &mut self,
        replicas: &R,
        stream: &mut BitStream,
        record: &mut DeliveryRecord,
    ) -> Result<(), ProtocolError> {
        let actor = self.control.get();
        let replica = actor.as_ref().and_then(|a| replicas.index_of_replica(a));

        // Positions are only sent relative once the client holds the actor
        self.compressor.relative = stream.write_flag(replica.is_some());

        let state = actor.as_ref().map(|a| a.borrow());
        if let Some(actor) = &state {
            self.compressor.reference = actor.position();
            record.last_control_position = Some(self.compressor.reference);
        }

        let checksum = control_checksum(replica, state.as_deref());
        let changed = replica.is_none() || checksum != self.last_client_checksum;
        stream.write_flag(changed);

        match (replica, &state) {
            (Some(id), Some(actor)) if changed => {
                stream.write_int(id.0, GHOST_ID_BITS);
                actor.write_control_state(stream);
                self.corrections_sent += 1;
                debug!(
                    "Correction sent for {:?} (server {:08x}, client {:08x})",
                    id, checksum, self.last_client_checksum
                );
            }
            (Some(_), Some(_)) => {
                // Client agrees with us; it only needs the compression origin
                encode_point(self.compressor.reference, Point::ZERO, false, stream);
            }
            _ => {}
        }
        Ok(())
    }

    fn read_packet<R: ReplicaLayer<A>>(
        &mut self,
        _replicas: &R,
        stream: &mut BitStream,
    ) -> Result<(), ProtocolError> {
        self.last_client_checksum = stream.read_u32()?;
        let first = stream.read_u32()?;
        let count = stream.read_ranged_u32(0, MAX_PENDING_MOVES as u32)?;

        let Some(end) = first.checked_add(count) else {
            warn!("Move window {}+{} overflows the index space", first, count);
            return Err(ProtocolError::MoveWindowGap {
                declared: first,
                received: self.next_receive_index,
            });
        };
        // A client's window always reaches its newest move, so it can never
        // end short of what it already delivered
        if end < self.next_receive_index {
            warn!(
                "Move window ends at {}, behind {} received moves",
                end, self.next_receive_index
            );
            return Err(ProtocolError::StaleMoveWindow {
                end,
                received: self.next_receive_index,
            });
        }

        if first > self.next_receive_index {
            let gap = first - self.next_receive_index;
            if gap as usize > MAX_PENDING_MOVES {
                warn!(
                    "Move window starts at {}, {} past the last received move",
                    first, gap
                );
                return Err(ProtocolError::MoveWindowGap {
                    declared: first,
                    received: self.next_receive_index,
                });
            }
            // Every packet carrying these moves was lost; the checksum repairs
            // whatever divergence that causes.
            debug!("Moves {}..{} never arrived", self.next_receive_index, first);
            self.moves_skipped += gap as u64;
            self.next_receive_index = first;
            if self.stalled.is_empty() {
                self.first_move_index = first;
            }
        }

        let mut prev = Move::default();
        for index in first..end {
            let mv = Move::unpack(stream, &prev)?;
            prev = mv;
            if index < self.next_receive_index {
                continue;
            }
            if self.stalled.len() >= MAX_PENDING_MOVES {
                warn!("Client outran its credit by {} moves", self.stalled.len());
                return Err(ProtocolError::BacklogOverflow {
                    limit: MAX_PENDING_MOVES,
                });
            }
            self.stalled.push_back((index, mv));
            self.next_receive_index = index + 1;
        }

        self.apply_stalled_moves();
        Ok(())
    }

    fn packet_delivered(&mut self, record: &DeliveryRecord) {
        // Only matters while no actor is attached: write_packet resets the
        // reference from the live actor before using it
        if let Some(position) = record.last_control_position {
            self.compressor.reference = position;
        }
    }

    fn packet_dropped(&mut self, record: &DeliveryRecord) {
        debug!("Server packet {} dropped", record.sequence);
    }

    fn state(&self) -> SessionState {
        if self.control.is_valid() {
            SessionState::Controlling
        } else {
            SessionState::Idle
        }
    }

    fn control_object(&self) -> Option<Rc<RefCell<A>>> {
        self.control.get()
    }

    fn compressor(&self) -> &PointCompressor {
        &self.compressor
    }
}
