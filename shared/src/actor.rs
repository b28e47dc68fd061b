//! Contract between the control protocol and the object it drives

use crate::bitstream::BitStream;
use crate::error::StreamError;
use crate::moves::Move;
use crate::position::Point;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Why the actor is being simulated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationMode {
    /// Client applying fresh local input ahead of the server
    ClientPredict,
    /// Client re-applying queued moves after a correction
    ClientReplay,
    /// Server applying a move received from the controlling client
    ServerFromClient,
}

pub trait ControlActor {
    /// Serializes exactly the state that checksums and corrections cover
    fn write_control_state(&self, stream: &mut BitStream);

    fn read_control_state(&mut self, stream: &mut BitStream) -> Result<(), StreamError>;

    fn apply_move(&mut self, mv: &Move);

    fn advance_simulation(&mut self, mode: SimulationMode);

    fn position(&self) -> Point;

    /// Last move handed to `apply_move`
    fn current_move(&self) -> Move;

    fn on_replay_complete(&mut self) {}
}

/// Non-owning link to the controlled actor.
///
/// The replica layer owns the actor; once it drops it, `get` returns `None`
/// and the session treats the link as empty.
#[derive(Debug)]
pub struct ControlHandle<A> {
    inner: Option<Weak<RefCell<A>>>,
}

impl<A> Default for ControlHandle<A> {
    fn default() -> Self {
        Self { inner: None }
    }
}

impl<A> Clone for ControlHandle<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A> ControlHandle<A> {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, actor: &Rc<RefCell<A>>) {
        self.inner = Some(Rc::downgrade(actor));
    }

    pub fn release(&mut self) {
        self.inner = None;
    }

    pub fn get(&self) -> Option<Rc<RefCell<A>>> {
        self.inner.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_valid(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    pub fn points_to(&self, actor: &Rc<RefCell<A>>) -> bool {
        self.get().is_some_and(|own| Rc::ptr_eq(&own, actor))
    }
}

/// Applies one move through the actor's own simulation step
pub fn drive<A: ControlActor>(actor: &mut A, mv: &Move, mode: SimulationMode) {
    actor.apply_move(mv);
    actor.advance_simulation(mode);
}
