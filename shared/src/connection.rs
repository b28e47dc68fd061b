//! Sequenced packet connection with delivery notification
//!
//! Every outgoing packet carries a header with its sequence number plus the
//! receiver's view of the peer's packets (latest sequence and a 32-bit
//! history). Out-of-order and duplicate packets are rejected whole, so the
//! payload layers only ever see packets in ascending sequence order.

use crate::bitstream::BitStream;
use crate::error::StreamError;
use crate::position::Point;
use crate::replica::ReplicaId;
use std::collections::VecDeque;

/// Packets older than this relative to the latest ack can no longer be confirmed
pub const ACK_WINDOW: u32 = 32;

/// What the payload layers remember about one sent packet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryRecord {
    pub sequence: u32,
    pub first_unsent_move_index: Option<u32>,
    pub last_control_position: Option<Point>,
    pub ghosts_announced: Vec<ReplicaId>,
    pub ghosts_removed: Vec<ReplicaId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Delivered(DeliveryRecord),
    Dropped(DeliveryRecord),
}

#[derive(Debug, Default)]
pub struct Connection {
    next_sequence: u32,
    in_flight: VecDeque<DeliveryRecord>,
    last_received: Option<u32>,
    received_history: u32,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_rejected: u64,
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Writes the header and returns the record the payload layers fill in
    pub fn begin_packet(&mut self, stream: &mut BitStream) -> DeliveryRecord {
        let sequence = self.next_sequence;
        stream.write_u32(sequence);
        if let Some(ack) = self.last_received {
            stream.write_flag(true);
            stream.write_u32(ack);
            stream.write_u32(self.received_history);
        } else {
            stream.write_flag(false);
        }
        DeliveryRecord {
            sequence,
            ..DeliveryRecord::default()
        }
    }

    /// Commits a sent packet. Returns anything that fell out of the ack
    /// window, which the caller must treat as dropped.
    pub fn end_packet(&mut self, record: DeliveryRecord) -> Vec<Delivery> {
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.packets_sent += 1;
        self.in_flight.push_back(record);

        let mut expired = Vec::new();
        while self.in_flight.len() > (ACK_WINDOW + 1) as usize {
            if let Some(record) = self.in_flight.pop_front() {
                expired.push(Delivery::Dropped(record));
            }
        }
        expired
    }

    /// Reads the header of an incoming packet.
    ///
    /// `Ok(None)` means the packet is stale or duplicated and its payload must
    /// be ignored. Otherwise the returned notifications are in send order.
    pub fn read_header(&mut self, stream: &mut BitStream) -> Result<Option<Vec<Delivery>>, StreamError> {
        let sequence = stream.read_u32()?;
        let ack = if stream.read_flag()? {
            Some((stream.read_u32()?, stream.read_u32()?))
        } else {
            None
        };

        match self.last_received {
            Some(last) if sequence <= last => {
                self.packets_rejected += 1;
                return Ok(None);
            }
            Some(last) => {
                let gap = sequence - last;
                let shifted = self.received_history.checked_shl(gap).unwrap_or(0);
                let previous = if gap <= ACK_WINDOW { 1u32 << (gap - 1) } else { 0 };
                self.received_history = shifted | previous;
            }
            None => self.received_history = 0,
        }
        self.last_received = Some(sequence);
        self.packets_received += 1;

        let mut notifications = Vec::new();
        if let Some((ack, history)) = ack {
            while self.in_flight.front().is_some_and(|r| r.sequence <= ack) {
                let Some(record) = self.in_flight.pop_front() else {
                    break;
                };
                let distance = ack - record.sequence;
                let delivered = distance == 0
                    || (distance <= ACK_WINDOW && history & (1 << (distance - 1)) != 0);
                notifications.push(if delivered {
                    Delivery::Delivered(record)
                } else {
                    Delivery::Dropped(record)
                });
            }
        }
        Ok(Some(notifications))
    }
}
