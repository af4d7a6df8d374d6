//! # Lobby Server Library
//!
//! This library provides the authoritative lobby server that sits in front of
//! a multiplayer game. It owns the shared session state, validates who may
//! join, and pushes every change to all connected clients so their views stay
//! consistent.
//!
//! ## Core Responsibilities
//!
//! ### Connection Registry
//! Tracks every live connection and the participant attached to it:
//! - Connection registration on accept and removal on close or error
//! - Player name validation and uniqueness among players
//! - Per-connection outbound queues for targeted sends and broadcasts
//!
//! ### Session State Machine
//! Holds the lobby phase (`waiting`, `starting`, `running`, `finished`) and
//! the roster view. Phase changes are driven by the player count and by
//! delayed transitions, each tagged with the session epoch it was scheduled
//! for so that late timers can be recognised and ignored.
//!
//! ### Message Routing
//! Decodes inbound frames once at the boundary, applies them to the registry
//! and session, and answers with either a broadcast `gameState` or a
//! single-recipient `error`.
//!
//! ## Architecture Design
//!
//! ### Single-Writer Dispatcher
//! All lobby state is owned by one task, [`lobby::Lobby`], which processes
//! connection, message, disconnect and timer events one at a time in arrival
//! order. This removes any need for locks and guarantees that two joins with
//! the same name can never race on the uniqueness check.
//!
//! ### WebSocket Transport
//! Each client holds one WebSocket. Reading and writing run in their own
//! tasks and only communicate with the dispatcher through channels, so a
//! slow or broken client never delays anyone else.
//!
//! ## Module Organization
//!
//! - `config`: server configuration and defaults
//! - `registry`: connections, participants and outbound queues
//! - `session`: lifecycle phases, timers and roster view
//! - `router`: per-message handling and broadcasting
//! - `lobby`: the dispatcher task and its handle
//! - `network`: axum WebSocket and HTTP endpoints
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Listens on 0.0.0.0:3001 with the default session timings
//!     let server = server::network::start(ServerConfig::default()).await?;
//!     println!("Lobby ready on port {}", server.port());
//!
//!     server.wait().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod lobby;
pub mod network;
pub mod registry;
pub mod router;
pub mod session;
