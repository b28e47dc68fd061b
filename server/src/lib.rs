//! # Control Server Library
//!
//! This library provides the authoritative side of the control-actor
//! synchronization protocol. The server owns the true state of every ship,
//! applies each client's moves no faster than real time allows, and sends a
//! ship's full state back only when the client's fingerprint of it disagrees.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Ships only move when a move from their controlling client is applied, or
//! when the credit ledger forces a catch-up tick. The client predicts the same
//! simulation locally and is corrected whenever the two copies diverge.
//!
//! ### Input Rate Limiting
//! Every client has a ledger of milliseconds it may spend. The game loop tops
//! it up with the real time elapsed between ticks; each applied move debits
//! its duration. A move the ledger cannot cover is held back until it can.
//!
//! ### Client Management
//! Handles the complete lifecycle of client connections including:
//! - Connection establishment and ship assignment
//! - Per-client packet connection, ghost table and control session
//! - Disconnection, timeout and protocol-violation cleanup
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! The server role of the protocol: move intake, the credit ledger and the
//! conditional full-state resend.
//!
//! ### Client Manager Module (`client_manager`)
//! Per-client protocol state and payload assembly in protocol order.
//!
//! ### Game Module (`game`)
//! The set of ships and their replica ids.
//!
//! ### Network Module (`network`)
//! UDP sockets, the datagram envelope and the tick loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         tick_duration: Duration::from_millis(33),
//!         max_clients: 16,
//!         packet_loss: 0.0,
//!     };
//!     let mut server = Server::new("127.0.0.1:8080", config).await?;
//!
//!     // Runs until the socket tasks stop:
//!     // - credits elapsed time to every client each tick
//!     // - applies client moves as they arrive
//!     // - sends every client its control block and ghost updates
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! Socket receive and send run on spawned tasks. All protocol state stays on
//! the task awaiting [`network::Server::run`], so it is never shared.

pub mod client_manager;
pub mod game;
pub mod network;
pub mod session;
