//! # Game Client Library
//!
//! Headless terminal client for the gravity-cube platformer. Typed lines
//! become chat messages or slash commands, and server packets are printed
//! as they arrive while a local mirror of the match keeps moving.
//!
//! ## Architecture Overview
//!
//! ### Server Authority
//! The client never decides anything about the match. It sends intents
//! (jump, pause, ready) and overwrites its cubes with every position and
//! motion update the server streams.
//!
//! ### Client-Side Prediction
//! Between updates each cube keeps stepping with the same physics the
//! server runs, so the mirror does not freeze while the next update is in
//! flight.
//!
//! ### Staying Connected
//! A session answers server pings, pings the server itself and gives up
//! once too many pings go unanswered. The client then dials again at a
//! fixed interval until the server is back.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! - Mirror of lobby, level and players
//! - Level loading and colouring from critical blocks
//! - Prediction with the shared cube physics
//!
//! ### Input Module (`input`)
//! - Slash command parsing
//! - Plain lines as lobby chat
//!
//! ### Network Module (`network`)
//! - Connect-with-retry
//! - Session loop over socket, input, heartbeat and prediction
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientConfig};
//! use tokio::io::BufReader;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new(ClientConfig::default());
//!     client.run(BufReader::new(tokio::io::stdin())).await?;
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod input;
pub mod network;
