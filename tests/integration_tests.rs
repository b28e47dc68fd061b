//! Integration tests for the control protocol across client and server
//!
//! These tests run both roles over an in-memory link, with loss and
//! duplication decided by the test, plus one run over real UDP sockets.

use client::game::ClientGameState;
use server::client_manager::Client as RemoteClient;
use server::game::GameState;
use shared::actor::{drive, ControlActor, SimulationMode};
use shared::moves::Move;
use shared::position::Point;
use shared::replica::ReplicaId;
use shared::session::{ControlSession, SessionState};
use shared::ship::Ship;
use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

/// One server-side client and the client it talks to
struct Link {
    game: GameState,
    ship_id: ReplicaId,
    remote: RemoteClient,
    local: ClientGameState,
}

impl Link {
    fn new() -> Self {
        let mut game = GameState::new();
        let (ship_id, ship) = game.spawn_ship().unwrap();
        let mut remote = RemoteClient::new(1, addr());
        remote.take_control(ship_id, &ship);
        Self {
            game,
            ship_id,
            remote,
            local: ClientGameState::new(),
        }
    }

    fn server_ship(&self) -> Rc<RefCell<Ship>> {
        Rc::clone(self.game.ship(self.ship_id).unwrap())
    }

    fn local_ship(&self) -> Rc<RefCell<Ship>> {
        self.local.session.control_object().unwrap()
    }

    fn server_payload(&mut self) -> Vec<u8> {
        self.remote.write_packet().unwrap()
    }

    fn client_payload(&mut self) -> Vec<u8> {
        self.local.write_packet().unwrap()
    }

    fn to_client(&mut self) {
        let payload = self.server_payload();
        self.local.read_packet(payload).unwrap();
    }

    fn to_server(&mut self) {
        let payload = self.client_payload();
        self.remote.read_packet(payload).unwrap();
    }

    /// Announce, acknowledge, then the first full state
    fn handshake(&mut self) {
        self.to_client();
        self.to_server();
        self.to_client();
        assert_eq!(self.local.state(), SessionState::Controlling);
    }

    fn push(&mut self, mv: Move) {
        self.local.apply_input(mv).unwrap();
    }

    /// A lossless exchange that funds exactly the moves the server holds
    fn settle_round(&mut self) {
        self.push(Move::idle(16));
        self.to_server();
        while self.remote.session.stalled_moves() > 0 {
            self.remote.session.add_credit(16);
        }
        self.to_client();
    }
}

fn addr() -> SocketAddr {
    "127.0.0.1:9000".parse().unwrap()
}

fn thrust(duration: u32) -> Move {
    Move::new(Point::new(1.0, 0.5), 0.25, duration)
}

/// CONTROL HANDOFF TESTS
mod handoff_tests {
    use super::*;

    #[test]
    fn test_control_arrives_after_announcement() {
        let mut link = Link::new();

        link.to_client();
        assert_eq!(link.local.state(), SessionState::Idle);
        assert!(link.local.ghosts.get(link.ship_id).is_some());

        link.to_server();
        link.to_client();
        assert_eq!(link.local.state(), SessionState::Controlling);
        assert_eq!(link.remote.session.corrections_sent, 1);
        assert_eq!(link.local.session.corrections_received, 1);
        assert_eq!(
            link.local.own_position(),
            Some(link.server_ship().borrow().position())
        );
    }

    #[test]
    fn test_moves_queued_before_control_are_replayed() {
        let mut link = Link::new();
        link.to_client();

        link.push(thrust(16));
        link.push(thrust(16));
        link.remote.session.add_credit(32);
        link.to_server();
        assert_eq!(link.remote.session.moves_applied, 2);

        link.to_client();
        assert_eq!(link.local.state(), SessionState::Controlling);
        assert!(link.local.session.pending_moves().is_empty());
        assert_eq!(
            link.local_ship().borrow().position(),
            link.server_ship().borrow().position()
        );
    }
}

/// MOVE DELIVERY TESTS
mod delivery_tests {
    use super::*;

    #[test]
    fn test_confirmed_moves_need_no_correction() {
        let mut link = Link::new();
        link.handshake();

        for _ in 0..10 {
            link.push(thrust(16));
        }
        link.remote.session.add_credit(160);
        link.to_server();
        link.to_client();
        assert_eq!(link.local.session.pending_moves().first_move_index(), 10);
        assert!(link.local.session.pending_moves().is_empty());

        let corrections = link.remote.session.corrections_sent;
        let replays = link.local_ship().borrow().replays_completed;
        let applied = link.remote.session.moves_applied;

        for _ in 0..5 {
            link.push(thrust(16));
        }
        link.remote.session.add_credit(80);
        link.to_server();

        assert_eq!(link.remote.session.moves_applied - applied, 5);
        assert_eq!(link.remote.session.first_move_index(), 15);
        assert_eq!(link.remote.session.credit(), 0);

        link.to_client();
        assert_eq!(link.remote.session.corrections_sent, corrections);
        assert!(link.local.session.pending_moves().is_empty());
        assert_eq!(link.local_ship().borrow().replays_completed, replays);
        assert_eq!(
            link.local_ship().borrow().position(),
            link.server_ship().borrow().position()
        );
    }

    #[test]
    fn test_resent_moves_never_double_apply() {
        let mut link = Link::new();
        link.handshake();
        let before = link.server_ship().borrow().moves_applied;
        link.remote.session.add_credit(48);

        // Server replies are lost, so every packet repeats the whole tail
        for _ in 0..3 {
            link.push(thrust(16));
            link.to_server();
        }

        assert_eq!(link.remote.session.moves_applied, 3);
        assert_eq!(link.server_ship().borrow().moves_applied - before, 3);
        assert_eq!(link.local.session.pending_moves().len(), 3);
    }

    #[test]
    fn test_duplicate_datagram_is_ignored() {
        let mut link = Link::new();
        link.handshake();
        link.remote.session.add_credit(16);
        link.push(thrust(16));

        let payload = link.client_payload();
        link.remote.read_packet(payload.clone()).unwrap();
        link.remote.read_packet(payload).unwrap();

        assert_eq!(link.remote.session.moves_applied, 1);
        assert_eq!(link.remote.connection.packets_rejected, 1);
    }

    #[test]
    fn test_moves_wait_for_credit() {
        let mut link = Link::new();
        link.handshake();

        for _ in 0..4 {
            link.push(thrust(20));
        }
        link.remote.session.add_credit(50);
        link.to_server();
        assert_eq!(link.remote.session.moves_applied, 2);
        assert_eq!(link.remote.session.stalled_moves(), 2);

        link.remote.session.add_credit(30);
        assert_eq!(link.remote.session.moves_applied, 4);
        assert_eq!(link.remote.session.credit(), 0);

        link.to_client();
        assert_eq!(
            link.local_ship().borrow().position(),
            link.server_ship().borrow().position()
        );
    }
}

/// CORRECTION AND REPLAY TESTS
mod correction_tests {
    use super::*;
    use client::input::{InputManager, Pattern};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use shared::checksum::control_checksum;
    use shared::MAX_PENDING_MOVES;

    #[test]
    fn test_server_disturbance_is_corrected_and_replayed() {
        let mut link = Link::new();
        link.handshake();

        for _ in 0..3 {
            link.push(thrust(16));
        }
        link.remote.session.add_credit(48);
        link.to_server();
        link.to_client();
        let before = link.local.session.corrections_received;

        drive(
            &mut *link.server_ship().borrow_mut(),
            &Move::new(Point::new(0.0, 1.0), 0.0, 100),
            SimulationMode::ServerFromClient,
        );

        let fired = thrust(16).with_fire(true);
        let plain = thrust(16);
        link.push(fired);
        link.push(plain);
        let _lost = link.client_payload();

        link.to_client();
        assert_eq!(link.local.session.corrections_received, before + 1);
        assert_eq!(link.local.session.pending_moves().len(), 2);

        let mut expected = link.server_ship().borrow().clone();
        drive(&mut expected, &fired, SimulationMode::ClientReplay);
        drive(&mut expected, &plain, SimulationMode::ClientReplay);
        {
            let ship = link.local_ship();
            let ship = ship.borrow();
            assert_eq!(ship.position(), expected.position());
            assert_eq!(ship.velocity(), expected.velocity());
            assert_eq!(ship.shots_fired, 1);
        }

        link.remote.session.add_credit(32);
        link.to_server();
        link.to_client();
        assert_eq!(link.local.session.corrections_received, before + 1);
        assert_eq!(
            link.local_ship().borrow().position(),
            link.server_ship().borrow().position()
        );
    }

    #[test]
    fn test_lossy_link_converges() {
        let mut link = Link::new();
        link.handshake();

        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut input = InputManager::with_seed(Pattern::Random, 99);

        for _ in 0..300 {
            if link.local.session.pending_moves().len() < MAX_PENDING_MOVES {
                link.push(input.sample(16));
            }
            link.remote.session.add_credit(16);

            let up = link.client_payload();
            if rng.gen_bool(0.75) {
                link.remote.read_packet(up).unwrap();
            }
            let down = link.server_payload();
            if rng.gen_bool(0.75) {
                link.local.read_packet(down).unwrap();
            }
        }

        for _ in 0..8 {
            link.settle_round();
        }
        let corrections = link.local.session.corrections_received;
        for _ in 0..4 {
            link.settle_round();
        }

        assert_eq!(link.local.session.corrections_received, corrections);
        assert_eq!(link.local.state(), SessionState::Controlling);

        let server_ship = link.server_ship();
        let local_ship = link.local_ship();
        assert_eq!(local_ship.borrow().position(), server_ship.borrow().position());
        assert_eq!(
            control_checksum(Some(link.ship_id), Some(&*local_ship.borrow())),
            control_checksum(Some(link.ship_id), Some(&*server_ship.borrow()))
        );
    }

    #[test]
    fn test_forced_catch_up_tick_is_corrected() {
        let mut link = Link::new();
        link.handshake();

        link.push(thrust(100));
        link.remote.session.add_credit(100);
        link.to_server();
        link.to_client();
        let before = link.local.session.corrections_received;

        // Idle client, but real time keeps passing on the server
        link.remote.session.add_credit(shared::MAX_MOVE_CREDIT_MS + 200);
        link.to_client();

        assert_eq!(link.local.session.corrections_received, before + 1);
        assert_eq!(
            link.local_ship().borrow().position(),
            link.server_ship().borrow().position()
        );
    }
}

/// ACTOR LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_destroyed_ship_releases_control() {
        let mut link = Link::new();
        link.handshake();
        let id = link.ship_id;

        link.game.remove_ship(id);
        link.remote.ghosts.remove(id);
        assert_eq!(link.remote.session.state(), SessionState::Idle);

        link.to_client();
        assert_eq!(link.local.state(), SessionState::Idle);
        assert!(link.local.own_position().is_none());
        assert!(link.local.ghosts.get(id).is_none());
    }

    #[test]
    fn test_moves_without_ship_are_consumed() {
        let mut link = Link::new();
        link.handshake();
        link.game.remove_ship(link.ship_id);
        link.remote.ghosts.remove(link.ship_id);
        link.remote.session.add_credit(32);

        link.push(thrust(16));
        link.push(thrust(16));
        link.to_server();

        assert_eq!(link.remote.session.moves_applied, 0);
        assert_eq!(link.remote.session.moves_skipped, 2);
        assert_eq!(link.remote.session.first_move_index(), 2);
    }

    #[test]
    fn test_other_ships_follow_server_positions() {
        let mut link = Link::new();
        let (other_id, other) = link.game.spawn_ship().unwrap();
        link.remote.ghosts.insert(other_id, Rc::clone(&other));
        link.handshake();

        drive(
            &mut *other.borrow_mut(),
            &Move::new(Point::new(-1.0, 0.0), 0.0, 120),
            SimulationMode::ServerFromClient,
        );
        link.to_server();
        link.to_client();

        let others = link.local.other_positions();
        assert_eq!(others, vec![(other_id, other.borrow().position())]);
    }
}

/// PROTOCOL VIOLATION TESTS
mod violation_tests {
    use super::*;
    use shared::bitstream::BitStream;
    use shared::connection::Connection;
    use shared::error::ProtocolError;
    use shared::replica::GHOST_ID_BITS;
    use shared::MAX_PENDING_MOVES;

    #[test]
    fn test_move_window_past_received_moves() {
        let mut remote = RemoteClient::new(1, addr());
        let mut connection = Connection::new();
        let mut stream = BitStream::new();
        let record = connection.begin_packet(&mut stream);
        stream.write_u32(0);
        stream.write_u32(100);
        stream.write_ranged_u32(0, 0, MAX_PENDING_MOVES as u32);
        connection.end_packet(record);

        let err = remote.read_packet(stream.into_bytes()).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::MoveWindowGap {
                declared: 100,
                received: 0
            }
        );
    }

    #[test]
    fn test_correction_for_unknown_replica() {
        let mut local = ClientGameState::new();
        let mut connection = Connection::new();
        let mut stream = BitStream::new();
        let record = connection.begin_packet(&mut stream);
        stream.write_flag(true);
        stream.write_flag(true);
        stream.write_int(77, GHOST_ID_BITS);
        Ship::spawn(Point::ZERO).write_control_state(&mut stream);
        stream.write_flag(false);
        connection.end_packet(record);

        let err = local.read_packet(stream.into_bytes()).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownReplica(ReplicaId(77)));
    }

    #[test]
    fn test_unconfirmed_queue_is_bounded() {
        let mut local = ClientGameState::new();
        for _ in 0..MAX_PENDING_MOVES {
            local.apply_input(Move::idle(16)).unwrap();
        }
        assert!(matches!(
            local.apply_input(Move::idle(16)),
            Err(ProtocolError::TooManyPendingMoves { .. })
        ));
    }

    #[test]
    fn test_truncated_client_payload() {
        let mut link = Link::new();
        link.handshake();
        link.push(thrust(16));

        let mut payload = link.client_payload();
        payload.truncate(payload.len() - 2);
        assert!(matches!(
            link.remote.read_packet(payload),
            Err(ProtocolError::Stream(_))
        ));
    }
}

/// CLIENT-SERVER INTEGRATION TESTS
mod client_server_tests {
    use super::*;
    use bincode::{deserialize, serialize};
    use server::network::{Server, ServerConfig};
    use shared::{Packet, PROTOCOL_VERSION};
    use std::time::Duration;
    use tokio::net::UdpSocket;

    #[tokio::test]
    async fn test_udp_handshake_gains_control() {
        let config = ServerConfig {
            tick_duration: Duration::from_millis(10),
            max_clients: 4,
            packet_loss: 0.0,
        };
        let mut server = Server::new("127.0.0.1:0", config).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let client = async {
            let connect = serialize(&Packet::Connect {
                client_version: PROTOCOL_VERSION,
            })
            .unwrap();
            socket.send_to(&connect, server_addr).await.unwrap();

            let mut game = ClientGameState::new();
            let mut buffer = [0u8; 2048];
            loop {
                let (len, _) = socket.recv_from(&mut buffer).await.unwrap();
                match deserialize::<Packet>(&buffer[..len]).unwrap() {
                    Packet::Connected { .. } => {}
                    Packet::Data { payload } => {
                        game.read_packet(payload).unwrap();
                        if game.state() == SessionState::Controlling {
                            return game;
                        }
                        let reply = Packet::Data {
                            payload: game.write_packet().unwrap(),
                        };
                        socket
                            .send_to(&serialize(&reply).unwrap(), server_addr)
                            .await
                            .unwrap();
                    }
                    other => panic!("Unexpected packet: {:?}", other),
                }
            }
        };

        let game = tokio::select! {
            result = server.run() => panic!("Server stopped: {:?}", result.err()),
            game = tokio::time::timeout(Duration::from_secs(5), client) => {
                game.expect("Handshake timed out")
            }
        };
        assert!(game.own_position().is_some());
    }

    #[tokio::test]
    async fn test_version_mismatch_is_rejected() {
        let mut server = Server::new("127.0.0.1:0", ServerConfig::default())
            .await
            .unwrap();
        let server_addr = server.local_addr().unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let client = async {
            let connect = serialize(&Packet::Connect {
                client_version: PROTOCOL_VERSION + 1,
            })
            .unwrap();
            socket.send_to(&connect, server_addr).await.unwrap();

            let mut buffer = [0u8; 2048];
            let (len, _) = socket.recv_from(&mut buffer).await.unwrap();
            deserialize::<Packet>(&buffer[..len]).unwrap()
        };

        let reply = tokio::select! {
            result = server.run() => panic!("Server stopped: {:?}", result.err()),
            reply = tokio::time::timeout(Duration::from_secs(5), client) => {
                reply.expect("No reply from server")
            }
        };
        assert!(matches!(reply, Packet::Disconnected { .. }));
    }
}
