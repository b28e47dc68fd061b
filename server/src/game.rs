//! Authoritative world: every ship and the replica id it is known by

use log::{debug, info};
use shared::position::Point;
use shared::replica::ReplicaId;
use shared::ship::Ship;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Spawn points, cycled through by replica id
const SPAWN_POINTS: [(f32, f32); 4] = [
    (-200.0, -150.0),
    (200.0, -150.0),
    (-200.0, 150.0),
    (200.0, 150.0),
];

#[derive(Debug, Default)]
pub struct GameState {
    pub tick: u32,
    ships: BTreeMap<ReplicaId, Rc<RefCell<Ship>>>,
    next_id: u32,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ship under a fresh replica id. `None` once ids run out.
    pub fn spawn_ship(&mut self) -> Option<(ReplicaId, Rc<RefCell<Ship>>)> {
        if self.next_id > ReplicaId::MAX {
            return None;
        }
        let id = ReplicaId(self.next_id);
        self.next_id += 1;

        let (x, y) = SPAWN_POINTS[id.0 as usize % SPAWN_POINTS.len()];
        let ship = Rc::new(RefCell::new(Ship::spawn(Point::new(x, y))));
        info!("Spawned ship {:?} at ({}, {})", id, x, y);
        self.ships.insert(id, Rc::clone(&ship));
        Some((id, ship))
    }

    pub fn remove_ship(&mut self, id: ReplicaId) -> Option<Rc<RefCell<Ship>>> {
        let ship = self.ships.remove(&id);
        if ship.is_some() {
            debug!("Removed ship {:?}", id);
        }
        ship
    }

    pub fn ship(&self, id: ReplicaId) -> Option<&Rc<RefCell<Ship>>> {
        self.ships.get(&id)
    }

    pub fn ships(&self) -> impl Iterator<Item = (ReplicaId, &Rc<RefCell<Ship>>)> + '_ {
        self.ships.iter().map(|(id, ship)| (*id, ship))
    }

    pub fn len(&self) -> usize {
        self.ships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ships.is_empty()
    }
}
