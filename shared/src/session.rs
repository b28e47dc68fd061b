//! The four hooks both roles of a control session implement

use crate::actor::ControlActor;
use crate::bitstream::BitStream;
use crate::connection::DeliveryRecord;
use crate::error::ProtocolError;
use crate::position::PointCompressor;
use crate::replica::ReplicaLayer;
use std::cell::RefCell;
use std::rc::Rc;

/// Where a session stands with respect to its controlled actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No controlled actor, or it has been destroyed
    Idle,
    Controlling,
    /// A correction was read and the replay has not run yet
    AwaitingResync,
}

/// One side of the control protocol on one connection.
///
/// Per incoming packet the owner calls `read_packet`, lets the replica layer
/// consume the rest of the payload, then calls `finish_packet`. Delivery
/// notifications from the connection are forwarded before `read_packet`.
pub trait ControlSession<A: ControlActor> {
    fn write_packet<R: ReplicaLayer<A>>(
        &mut self,
        replicas: &R,
        stream: &mut BitStream,
        record: &mut DeliveryRecord,
    ) -> Result<(), ProtocolError>;

    fn read_packet<R: ReplicaLayer<A>>(
        &mut self,
        replicas: &R,
        stream: &mut BitStream,
    ) -> Result<(), ProtocolError>;

    /// Runs once the rest of the incoming packet has been processed
    fn finish_packet(&mut self) {}

    fn packet_delivered(&mut self, record: &DeliveryRecord);

    fn packet_dropped(&mut self, _record: &DeliveryRecord) {}

    fn state(&self) -> SessionState;

    fn control_object(&self) -> Option<Rc<RefCell<A>>>;

    /// Compression settings for positions written after the control block
    fn compressor(&self) -> &PointCompressor;
}
