//! # Game Server Library
//!
//! Authoritative server for the gravity-cube platformer. It owns the
//! canonical physics of every running match, groups clients into lobbies
//! and streams state to them over a line-based TCP protocol.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Each match runs the shared cube physics at a fixed tick rate. Clients
//! only send intents (jump, pause); positions and gravity changes always
//! come from the server.
//!
//! ### Client Management
//! Handles the complete lifecycle of client connections including:
//! - Connection establishment and id assignment
//! - Display names, chat and whispers
//! - Liveness checks through ping/pong heartbeats
//! - Teardown on logout, transport errors or missed heartbeats
//!
//! ### Lobbies
//! Up to four clients share a password-protected lobby. Once every member
//! is ready the lobby starts a match on a freshly coloured level.
//!
//! ## Architecture Design
//!
//! ### Hub Event Loop
//! A single hub task owns the client registry and all lobbies. Connection
//! tasks, match tasks and the acceptor never touch that state directly;
//! they send [`network::ServerMessage`]s into the hub's queue.
//!
//! ### Tasks Per Connection
//! Every socket gets a reader, a writer and a heartbeat task that share a
//! cancellation token, so one teardown stops all three.
//!
//! ### One Task Per Match
//! A match task exclusively owns its simulation. The hub talks to it with
//! [`match_runner::MatchCommand`]s and it reports back when it ends.
//!
//! ## Module Organization
//!
//! - [`config`]: runtime settings and their defaults
//! - [`connection`]: per-socket reader, writer and heartbeat tasks
//! - [`client_manager`]: registry of connected clients
//! - [`lobby`]: lobby membership, passwords and readiness
//! - [`game`]: the match simulation itself
//! - [`match_runner`]: fixed-tick loop driving a match
//! - [`network`]: acceptor and hub
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod connection;
pub mod game;
pub mod lobby;
pub mod match_runner;
pub mod network;
