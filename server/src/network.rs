//! Server network layer handling UDP communications and game loop coordination

use crate::client_manager::{Client, ClientManager};
use crate::game::GameState;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::interval;

/// Clients silent for this long are dropped
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// Settings a server is started with
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_duration: Duration,
    pub max_clients: usize,
    /// Fraction of outgoing data packets silently discarded, for testing
    pub packet_loss: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_duration: Duration::from_millis(33),
            max_clients: 16,
            packet_loss: 0.0,
        }
    }
}

/// Splits elapsed wall time into whole milliseconds, carrying the remainder
#[derive(Debug, Default)]
pub struct CreditClock {
    carry_us: u128,
}

impl CreditClock {
    pub fn elapsed_ms(&mut self, elapsed: Duration) -> u32 {
        let total = elapsed.as_micros() + self.carry_us;
        self.carry_us = total % 1000;
        (total / 1000).min(u32::MAX as u128) as u32
    }
}

/// Main server coordinating networking and game simulation.
///
/// Protocol state is single-threaded: it lives on the task driving
/// [`Server::run`], and only raw datagrams cross to the socket tasks.
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: ClientManager,
    game_state: GameState,
    config: ServerConfig,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(addr: &str, config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: ClientManager::new(config.max_clients),
            game_state: GameState::new(),
            config,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Tears down a client and the ship it controlled
    fn drop_client(&mut self, client: Client) {
        if let Some(ship) = client.ship {
            self.game_state.remove_ship(ship);
            self.clients.unghost_ship(ship);
        }
    }

    fn disconnect(&mut self, client_id: u32, reason: &str) {
        if let Some(client) = self.clients.remove_client(&client_id) {
            self.send_packet(
                Packet::Disconnected {
                    reason: reason.to_string(),
                },
                client.addr,
            );
            self.drop_client(client);
        }
    }

    fn accept_client(&mut self, addr: SocketAddr) {
        let Some(client_id) = self.clients.add_client(addr) else {
            self.send_packet(
                Packet::Disconnected {
                    reason: "Server full".to_string(),
                },
                addr,
            );
            return;
        };

        let Some((ship_id, ship)) = self.game_state.spawn_ship() else {
            self.disconnect(client_id, "No free ship slots");
            return;
        };

        self.clients.ghost_ship(ship_id, &ship);
        if let Some(client) = self.clients.get_mut(client_id) {
            for (id, other) in self.game_state.ships() {
                if client.ghosts.get(id).is_none() {
                    client.ghosts.insert(id, Rc::clone(other));
                }
            }
            client.take_control(ship_id, &ship);
        }

        self.send_packet(Packet::Connected { client_id }, addr);
    }

    /// Processes incoming packets
    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                // Remove existing connection if present
                if let Some(existing_id) = self.clients.find_client_by_addr(addr) {
                    info!("Removing existing client {} from {}", existing_id, addr);
                    if let Some(client) = self.clients.remove_client(&existing_id) {
                        self.drop_client(client);
                    }
                }

                self.accept_client(addr);
            }

            Packet::Data { payload } => {
                let Some(client_id) = self.clients.find_client_by_addr(addr) else {
                    debug!("Data from unknown address {}", addr);
                    return;
                };

                let result = match self.clients.get_mut(client_id) {
                    Some(client) => client.read_packet(payload),
                    None => Ok(()),
                };
                if let Err(e) = result {
                    warn!("Protocol violation from client {}: {}", client_id, e);
                    self.disconnect(client_id, "Protocol violation");
                }
            }

            Packet::Disconnect => {
                if let Some(client_id) = self.clients.find_client_by_addr(addr) {
                    if let Some(client) = self.clients.remove_client(&client_id) {
                        self.drop_client(client);
                    }
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Credits elapsed time, then sends every client its next payload
    fn tick(&mut self, elapsed_ms: u32) {
        self.clients.add_credit(elapsed_ms);
        self.game_state.tick += 1;

        let mut outgoing = Vec::new();
        let mut violations = Vec::new();
        for client in self.clients.iter_mut() {
            match client.write_packet() {
                Ok(payload) => outgoing.push((client.addr, payload)),
                Err(e) => violations.push((client.id, e)),
            }
        }

        for (client_id, e) in violations {
            warn!("Dropping client {}: {}", client_id, e);
            self.disconnect(client_id, "Protocol violation");
        }

        for (addr, payload) in outgoing {
            if self.config.packet_loss > 0.0 && rand::random::<f64>() < self.config.packet_loss {
                continue;
            }
            self.send_packet(Packet::Data { payload }, addr);
        }

        for client in self.clients.check_timeouts(CLIENT_TIMEOUT) {
            self.drop_client(client);
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();

        let mut tick_interval = interval(self.config.tick_duration);
        let mut last_tick = Instant::now();
        let mut clock = CreditClock::default();

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let elapsed_ms = clock.elapsed_ms(now.duration_since(last_tick));
                    last_tick = now;

                    self.tick(elapsed_ms);

                    if self.game_state.tick % 300 == 0 && !self.clients.is_empty() {
                        for client in self.clients.iter_mut() {
                            debug!(
                                "Tick {}: client {} applied {} moves, {} corrections, credit {}ms",
                                self.game_state.tick,
                                client.id,
                                client.session.moves_applied,
                                client.session.corrections_sent,
                                client.session.credit()
                            );
                        }
                    }
                },
            }
        }

        Ok(())
    }
}
