//! Client-side protocol state for one server connection
//!
//! Ties the packet connection, the replica table and the control session
//! together so that every incoming payload is consumed in protocol order:
//! delivery notifications, control block, ghost block, then replay.

use crate::session::ClientControlSession;
use log::debug;
use shared::actor::ControlActor;
use shared::bitstream::BitStream;
use shared::connection::{Connection, Delivery};
use shared::error::ProtocolError;
use shared::moves::Move;
use shared::position::Point;
use shared::replica::{GhostTable, ReplicaId};
use shared::session::{ControlSession, SessionState};
use shared::ship::Ship;

#[derive(Debug, Default)]
pub struct ClientGameState {
    pub connection: Connection,
    pub ghosts: GhostTable<Ship>,
    pub session: ClientControlSession<Ship>,
}

impl ClientGameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Predicts `mv` locally and queues it for the server
    pub fn apply_input(&mut self, mv: Move) -> Result<(), ProtocolError> {
        self.session.push_move(mv)
    }

    fn notify(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Delivered(record) => self.session.packet_delivered(&record),
            Delivery::Dropped(record) => self.session.packet_dropped(&record),
        }
    }

    pub fn write_packet(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let mut stream = BitStream::new();
        let mut record = self.connection.begin_packet(&mut stream);
        self.session
            .write_packet(&self.ghosts, &mut stream, &mut record)?;

        for expired in self.connection.end_packet(record) {
            self.notify(expired);
        }
        Ok(stream.into_bytes())
    }

    /// Consumes one payload from the server. Stale packets are ignored.
    pub fn read_packet(&mut self, payload: Vec<u8>) -> Result<(), ProtocolError> {
        let mut stream = BitStream::from_bytes(payload);
        let Some(deliveries) = self.connection.read_header(&mut stream)? else {
            debug!("Ignoring stale packet from server");
            return Ok(());
        };

        for delivery in deliveries {
            self.notify(delivery);
        }
        self.session.read_packet(&self.ghosts, &mut stream)?;

        // Everything else in the packet lands before the controlled ship is
        // replayed, so it never runs ahead of the world around it.
        let controlled = self.session.control_object();
        self.ghosts
            .read_ghost_block(&mut stream, self.session.compressor(), controlled.as_ref())?;
        self.session.finish_packet();
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Predicted position of the ship under our control
    pub fn own_position(&self) -> Option<Point> {
        self.session
            .control_object()
            .map(|ship| ship.borrow().position())
    }

    /// Positions of every replica except our own ship
    pub fn other_positions(&self) -> Vec<(ReplicaId, Point)> {
        let controlled = self.session.control_object();
        self.ghosts
            .ids()
            .filter_map(|id| {
                let ship = self.ghosts.get(id)?;
                if controlled
                    .as_ref()
                    .is_some_and(|own| std::rc::Rc::ptr_eq(own, ship))
                {
                    return None;
                }
                let position = ship.borrow().position();
                Some((id, position))
            })
            .collect()
    }
}
