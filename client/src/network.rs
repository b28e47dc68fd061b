use crate::game::ClientGameState;
use crate::input::{InputManager, Pattern};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::session::SessionState;
use shared::{Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::interval;

/// Settings a client is started with
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub input_interval: Duration,
    pub pattern: Pattern,
    /// Fraction of outgoing data packets silently discarded, for testing
    pub packet_loss: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            input_interval: Duration::from_millis(16),
            pattern: Pattern::Circle,
            packet_loss: 0.0,
        }
    }
}

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    client_id: Option<u32>,
    connected: bool,

    game_state: ClientGameState,
    input_manager: InputManager,
    config: ClientConfig,
    last_input: Instant,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        config: ClientConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            client_id: None,
            connected: false,
            game_state: ClientGameState::new(),
            input_manager: InputManager::new(config.pattern),
            config,
            last_input: Instant::now(),
        })
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server...");

        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        self.send_packet(&packet).await?;

        Ok(())
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Handles one datagram. `Err` means the session is beyond repair.
    async fn handle_packet(&mut self, packet: Packet) -> Result<(), Box<dyn std::error::Error>> {
        match packet {
            Packet::Connected { client_id } => {
                info!("Connected! Client ID: {}", client_id);
                self.client_id = Some(client_id);
                self.connected = true;
                self.last_input = Instant::now();
            }

            Packet::Data { payload } => {
                if !self.connected {
                    return Ok(());
                }
                let was = self.game_state.state();
                self.game_state.read_packet(payload)?;
                if was == SessionState::Idle && self.game_state.state() != SessionState::Idle {
                    info!("Took control of ship at {:?}", self.game_state.own_position());
                }
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                self.client_id = None;
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }
        Ok(())
    }

    /// Samples input for the time since the last frame and sends a payload
    async fn send_input(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if !self.connected {
            return Ok(());
        }

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_input).as_millis() as u32;
        if elapsed == 0 {
            return Ok(());
        }
        self.last_input = now;

        let mv = self.input_manager.sample(elapsed);
        self.game_state.apply_input(mv)?;
        let payload = self.game_state.write_packet()?;

        if self.config.packet_loss > 0.0 && rand::random::<f64>() < self.config.packet_loss {
            return Ok(());
        }
        self.send_packet(&Packet::Data { payload }).await
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut input_interval = interval(self.config.input_interval);
        let mut status_interval = interval(Duration::from_secs(5));

        let mut buffer = [0u8; 2048];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                                if let Err(e) = self.handle_packet(packet).await {
                                    error!("Protocol violation from server: {}", e);
                                    break;
                                }
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = input_interval.tick() => {
                    if let Err(e) = self.send_input().await {
                        error!("Error sending input: {}", e);
                        break;
                    }
                },

                _ = status_interval.tick() => {
                    if self.connected {
                        let session = &self.game_state.session;
                        debug!(
                            "{:?}: {} pending moves, {} corrections, {} other ships",
                            self.game_state.state(),
                            session.pending_moves().len(),
                            session.corrections_received,
                            self.game_state.other_positions().len()
                        );
                    }
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, disconnecting");
                    break;
                },
            }
        }

        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }

        Ok(())
    }
}
