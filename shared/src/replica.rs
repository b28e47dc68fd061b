//! Minimal replication layer: replica ids, lookup, and the ghost block
//!
//! The server keeps one [`GhostTable`] per connection referencing the shared
//! world objects. A replica becomes usable for control (and for relative
//! compression) only after the packet announcing it was confirmed delivered.

use crate::actor::ControlActor;
use crate::bitstream::BitStream;
use crate::connection::DeliveryRecord;
use crate::error::StreamError;
use crate::position::{Point, PointCompressor};
use log::debug;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

pub const GHOST_ID_BITS: u32 = 10;

const KIND_BITS: u32 = 2;
const KIND_ANNOUNCE: u32 = 0;
const KIND_UPDATE: u32 = 1;
const KIND_REMOVE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(pub u32);

impl ReplicaId {
    /// Highest assignable id; the all-ones value means "no replica"
    pub const MAX: u32 = (1 << GHOST_ID_BITS) - 2;
    const INVALID: u32 = (1 << GHOST_ID_BITS) - 1;

    pub fn wire_value(id: Option<ReplicaId>) -> u32 {
        id.map_or(Self::INVALID, |id| id.0)
    }
}

pub trait ReplicaLayer<A> {
    fn resolve_replica(&self, id: ReplicaId) -> Option<Rc<RefCell<A>>>;

    /// Id of `actor` if the remote side already holds a replica of it
    fn index_of_replica(&self, actor: &Rc<RefCell<A>>) -> Option<ReplicaId>;
}

/// Objects that can be replicated as ghosts
pub trait Ghost: ControlActor + Default {
    fn set_ghost_position(&mut self, position: Point);
}

#[derive(Debug)]
struct GhostEntry<A> {
    actor: Rc<RefCell<A>>,
    ghosted: bool,
}

#[derive(Debug)]
pub struct GhostTable<A> {
    entries: BTreeMap<ReplicaId, GhostEntry<A>>,
    tombstones: BTreeSet<ReplicaId>,
}

impl<A> Default for GhostTable<A> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            tombstones: BTreeSet::new(),
        }
    }
}

impl<A> GhostTable<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a replica the remote side has not seen yet
    pub fn insert(&mut self, id: ReplicaId, actor: Rc<RefCell<A>>) {
        self.tombstones.remove(&id);
        self.entries.insert(
            id,
            GhostEntry {
                actor,
                ghosted: false,
            },
        );
    }

    /// Adds a replica that is usable immediately (client side)
    pub fn insert_ghosted(&mut self, id: ReplicaId, actor: Rc<RefCell<A>>) {
        self.entries.insert(
            id,
            GhostEntry {
                actor,
                ghosted: true,
            },
        );
    }

    /// Drops the table's reference. If the remote had it, a removal is sent.
    pub fn remove(&mut self, id: ReplicaId) -> Option<Rc<RefCell<A>>> {
        let entry = self.entries.remove(&id)?;
        if entry.ghosted {
            self.tombstones.insert(id);
        }
        Some(entry.actor)
    }

    pub fn get(&self, id: ReplicaId) -> Option<&Rc<RefCell<A>>> {
        self.entries.get(&id).map(|entry| &entry.actor)
    }

    pub fn is_ghosted(&self, id: ReplicaId) -> bool {
        self.entries.get(&id).is_some_and(|entry| entry.ghosted)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        self.entries.keys().copied()
    }

    /// Marks announcements as held remotely and forgets delivered removals
    pub fn packet_delivered(&mut self, record: &DeliveryRecord) {
        for id in &record.ghosts_announced {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.ghosted = true;
            }
        }
        for id in &record.ghosts_removed {
            self.tombstones.remove(id);
        }
    }
}

impl<A> ReplicaLayer<A> for GhostTable<A> {
    fn resolve_replica(&self, id: ReplicaId) -> Option<Rc<RefCell<A>>> {
        self.get(id).cloned()
    }

    fn index_of_replica(&self, actor: &Rc<RefCell<A>>) -> Option<ReplicaId> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.ghosted && Rc::ptr_eq(&entry.actor, actor))
            .map(|(id, _)| *id)
    }
}

impl<A: Ghost> GhostTable<A> {
    /// Appends announcements, position updates, and removals
    pub fn write_ghost_block(
        &self,
        stream: &mut BitStream,
        compressor: &PointCompressor,
        record: &mut DeliveryRecord,
    ) {
        for (id, entry) in &self.entries {
            stream.write_flag(true);
            stream.write_int(id.0, GHOST_ID_BITS);
            let actor = entry.actor.borrow();
            if entry.ghosted {
                stream.write_int(KIND_UPDATE, KIND_BITS);
                compressor.write_point(stream, actor.position());
            } else {
                stream.write_int(KIND_ANNOUNCE, KIND_BITS);
                actor.write_control_state(stream);
                record.ghosts_announced.push(*id);
            }
        }
        for id in &self.tombstones {
            stream.write_flag(true);
            stream.write_int(id.0, GHOST_ID_BITS);
            stream.write_int(KIND_REMOVE, KIND_BITS);
            record.ghosts_removed.push(*id);
        }
        stream.write_flag(false);
    }

    /// Applies a ghost block. The controlled actor's own state only ever
    /// comes from the control block, so entries for it are read and skipped.
    pub fn read_ghost_block(
        &mut self,
        stream: &mut BitStream,
        compressor: &PointCompressor,
        controlled: Option<&Rc<RefCell<A>>>,
    ) -> Result<(), StreamError> {
        let is_controlled = |actor: &Rc<RefCell<A>>| controlled.is_some_and(|c| Rc::ptr_eq(c, actor));

        while stream.read_flag()? {
            let id = ReplicaId(stream.read_int(GHOST_ID_BITS)?);
            match stream.read_int(KIND_BITS)? {
                KIND_ANNOUNCE => match self.entries.get(&id) {
                    Some(entry) if !is_controlled(&entry.actor) => {
                        entry.actor.borrow_mut().read_control_state(stream)?;
                    }
                    Some(_) => {
                        A::default().read_control_state(stream)?;
                    }
                    None => {
                        let mut actor = A::default();
                        actor.read_control_state(stream)?;
                        debug!("Replica {:?} created at {:?}", id, actor.position());
                        self.insert_ghosted(id, Rc::new(RefCell::new(actor)));
                    }
                },
                KIND_UPDATE => {
                    let position = compressor.read_point(stream)?;
                    if let Some(entry) = self.entries.get(&id) {
                        if !is_controlled(&entry.actor) {
                            entry.actor.borrow_mut().set_ghost_position(position);
                        }
                    }
                }
                KIND_REMOVE => {
                    if self.entries.remove(&id).is_some() {
                        debug!("Replica {:?} removed", id);
                    }
                }
                kind => {
                    return Err(StreamError::OutOfRange {
                        value: kind,
                        min: KIND_ANNOUNCE,
                        max: KIND_REMOVE,
                    })
                }
            }
        }
        Ok(())
    }
}
