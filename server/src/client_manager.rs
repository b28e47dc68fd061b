//! Per-client connection state for the server
//!
//! This module handles the server-side management of connected clients, including:
//! - Client connection lifecycle (connect, disconnect, timeout)
//! - One packet connection, ghost table and control session per client
//! - Building outgoing payloads and consuming incoming ones in protocol order
//! - Crediting real elapsed time to every client's move budget
//!
//! A protocol violation surfaces as an error from [`Client::read_packet`] or
//! [`Client::write_packet`]; the network layer is expected to drop the client.

use crate::session::ServerControlSession;
use log::{debug, info};
use shared::bitstream::BitStream;
use shared::connection::{Connection, Delivery};
use shared::error::ProtocolError;
use shared::replica::{GhostTable, ReplicaId};
use shared::session::ControlSession;
use shared::ship::Ship;
use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Represents a connected client and their protocol state
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// Ship this client controls, if any
    pub ship: Option<ReplicaId>,
    pub connection: Connection,
    pub ghosts: GhostTable<Ship>,
    pub session: ServerControlSession<Ship>,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            ship: None,
            connection: Connection::new(),
            ghosts: GhostTable::new(),
            session: ServerControlSession::new(),
        }
    }

    /// Gives this client control of a ship it will also receive as a ghost
    pub fn take_control(&mut self, id: ReplicaId, ship: &Rc<RefCell<Ship>>) {
        if self.ghosts.get(id).is_none() {
            self.ghosts.insert(id, Rc::clone(ship));
        }
        self.session.set_control_object(ship);
        self.ship = Some(id);
    }

    /// Checks if the client has exceeded the connection timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    fn notify(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Delivered(record) => {
                self.session.packet_delivered(&record);
                self.ghosts.packet_delivered(&record);
            }
            Delivery::Dropped(record) => self.session.packet_dropped(&record),
        }
    }

    /// Builds the next payload: header, control block, ghost block
    pub fn write_packet(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let mut stream = BitStream::new();
        let mut record = self.connection.begin_packet(&mut stream);
        self.session
            .write_packet(&self.ghosts, &mut stream, &mut record)?;
        self.ghosts
            .write_ghost_block(&mut stream, self.session.compressor(), &mut record);

        for expired in self.connection.end_packet(record) {
            self.notify(expired);
        }
        Ok(stream.into_bytes())
    }

    /// Consumes one payload from the client. Stale packets are ignored.
    pub fn read_packet(&mut self, payload: Vec<u8>) -> Result<(), ProtocolError> {
        let mut stream = BitStream::from_bytes(payload);
        let Some(deliveries) = self.connection.read_header(&mut stream)? else {
            debug!("Ignoring stale packet from client {}", self.id);
            return Ok(());
        };
        self.last_seen = Instant::now();

        for delivery in deliveries {
            self.notify(delivery);
        }
        self.session.read_packet(&self.ghosts, &mut stream)?;
        self.session.finish_packet();
        Ok(())
    }
}

/// Manages all connected clients
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<u32, Client>,
    /// Next available client ID for new connections
    next_client_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Attempts to add a new client connection
    ///
    /// Returns Some(client_id) if successful, None if server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    pub fn remove_client(&mut self, client_id: &u32) -> Option<Client> {
        let client = self.clients.remove(client_id)?;
        info!("Client {} disconnected", client.id);
        Some(client)
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn get(&self, client_id: u32) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: u32) -> Option<&mut Client> {
        self.clients.get_mut(&client_id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Client> + '_ {
        self.clients.values_mut()
    }

    /// Starts replicating a ship to every client
    pub fn ghost_ship(&mut self, id: ReplicaId, ship: &Rc<RefCell<Ship>>) {
        for client in self.clients.values_mut() {
            if client.ghosts.get(id).is_none() {
                client.ghosts.insert(id, Rc::clone(ship));
            }
        }
    }

    /// Stops replicating a ship; clients that held it receive a removal
    pub fn unghost_ship(&mut self, id: ReplicaId) {
        for client in self.clients.values_mut() {
            client.ghosts.remove(id);
        }
    }

    /// Credits elapsed real time to every client's move budget
    pub fn add_credit(&mut self, elapsed_ms: u32) {
        for client in self.clients.values_mut() {
            client.session.add_credit(elapsed_ms);
        }
    }

    /// Removes and returns clients that have been silent for `timeout`
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<Client> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        timed_out
            .iter()
            .filter_map(|client_id| self.remove_client(client_id))
            .collect()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::position::Point;
    use shared::session::SessionState;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn ship() -> Rc<RefCell<Ship>> {
        Rc::new(RefCell::new(Ship::spawn(Point::ZERO)))
    }

    #[test]
    fn test_client_creation() {
        let client = Client::new(1, test_addr());
        assert_eq!(client.id, 1);
        assert_eq!(client.addr, test_addr());
        assert!(client.ship.is_none());
        assert_eq!(client.session.state(), SessionState::Idle);
    }

    #[test]
    fn test_client_timeout() {
        let mut client = Client::new(1, test_addr());
        assert!(!client.is_timed_out(Duration::from_secs(1)));

        client.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(client.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_take_control_ghosts_the_ship() {
        let mut client = Client::new(1, test_addr());
        let ship = ship();
        client.take_control(ReplicaId(4), &ship);

        assert_eq!(client.ship, Some(ReplicaId(4)));
        assert!(client.ghosts.get(ReplicaId(4)).is_some());
        assert!(!client.ghosts.is_ghosted(ReplicaId(4)));
        assert_eq!(client.session.state(), SessionState::Controlling);
    }

    #[test]
    fn test_write_packet_records_announcement() {
        let mut client = Client::new(1, test_addr());
        client.take_control(ReplicaId(0), &ship());
        let first = client.write_packet().unwrap();
        assert!(!first.is_empty());
        assert_eq!(client.connection.in_flight(), 1);
    }

    #[test]
    fn test_garbage_payload_is_an_error() {
        let mut client = Client::new(1, test_addr());
        assert!(client.read_packet(vec![0x01]).is_err());
    }

    #[test]
    fn test_client_manager_capacity() {
        let mut manager = ClientManager::new(1);
        assert!(manager.add_client(test_addr()).is_some());
        assert!(manager.add_client(test_addr2()).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_client_manager_find_and_remove() {
        let mut manager = ClientManager::new(4);
        let id = manager.add_client(test_addr()).unwrap();
        assert_eq!(manager.find_client_by_addr(test_addr()), Some(id));
        assert_eq!(manager.find_client_by_addr(test_addr2()), None);

        let removed = manager.remove_client(&id).unwrap();
        assert_eq!(removed.id, id);
        assert!(manager.remove_client(&id).is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_ghost_ship_reaches_every_client() {
        let mut manager = ClientManager::new(4);
        let a = manager.add_client(test_addr()).unwrap();
        let b = manager.add_client(test_addr2()).unwrap();
        let ship = ship();

        manager.ghost_ship(ReplicaId(2), &ship);
        assert!(manager.get(a).unwrap().ghosts.get(ReplicaId(2)).is_some());
        assert!(manager.get(b).unwrap().ghosts.get(ReplicaId(2)).is_some());
        assert_eq!(Rc::strong_count(&ship), 3);

        manager.unghost_ship(ReplicaId(2));
        assert_eq!(Rc::strong_count(&ship), 1);
    }

    #[test]
    fn test_credit_reaches_sessions() {
        let mut manager = ClientManager::new(4);
        let id = manager.add_client(test_addr()).unwrap();
        manager.add_credit(33);
        assert_eq!(manager.get(id).unwrap().session.credit(), 33);
    }

    #[test]
    fn test_check_timeouts_removes_silent_clients() {
        let mut manager = ClientManager::new(4);
        let a = manager.add_client(test_addr()).unwrap();
        let b = manager.add_client(test_addr2()).unwrap();
        manager.get_mut(a).unwrap().last_seen = Instant::now() - Duration::from_secs(10);

        let removed = manager.check_timeouts(Duration::from_secs(5));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, a);
        assert!(manager.get(b).is_some());
        assert_eq!(manager.len(), 1);
    }
}
