//! # Control Client Library
//!
//! This library provides the predicting side of the control-actor
//! synchronization protocol. The client applies every move to its own ship
//! the moment it is sampled, keeps the move until the server is known to have
//! it, and replays whatever is still pending whenever the server corrects it.
//!
//! ## Architecture Overview
//!
//! ### Client-Side Prediction
//! Moves are applied locally without waiting for the server. The ship the
//! player sees is always the server's last word plus every move since.
//!
//! ### Redundant Move Delivery
//! Each outgoing packet repeats every move sent by the last few packets that
//! have not been acknowledged yet, so a single lost packet never costs a move.
//!
//! ### Correction and Replay
//! The client sends a checksum of its predicted state with each batch. When
//! the server's copy disagrees it answers with the full state, which the
//! client adopts before replaying its pending moves on top.
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! The client role of the protocol: the move queue, the delivery pipeline,
//! the checksum and replay.
//!
//! ### Game Module (`game`)
//! One connection, ghost table and session consumed in protocol order.
//!
//! ### Input Module (`input`)
//! Scripted autopilot patterns that stand in for a player.
//!
//! ### Network Module (`network`)
//! UDP socket, the datagram envelope and the input loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::input::Pattern;
//! use client::network::{Client, ClientConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig {
//!         input_interval: Duration::from_millis(16),
//!         pattern: Pattern::Zigzag,
//!         packet_loss: 0.05,
//!     };
//!     let mut client = Client::new("127.0.0.1:8080", config).await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod input;
pub mod network;
pub mod session;
