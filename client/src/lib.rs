//! # Lobby Client Library
//!
//! A terminal client for the lobby server. It keeps one WebSocket open to the
//! server, mirrors every `gameState` broadcast into a local [`view::LobbyView`]
//! and reconnects when the connection drops.
//!
//! ## Module Organization
//!
//! ### Sync Module (`sync`)
//! Connection handling:
//! - Connect, then request the current state
//! - Join as a player or spectator, replayed after every reconnect
//! - Reconnection with a fixed delay and optional attempt limit
//! - `leaveGame` on shutdown
//!
//! ### View Module (`view`)
//! The client's copy of the lobby:
//! - Latest authoritative snapshot
//! - Status line for the current phase
//! - Lobby leader detection for the local player
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::sync::{Participation, ReconnectPolicy, SyncAgent};
//!
//! # async fn example() -> Result<(), client::sync::SyncError> {
//! let mut agent = SyncAgent::new(
//!     "ws://127.0.0.1:3001",
//!     Participation::Player { name: "Ada".into(), flag: None },
//!     ReconnectPolicy::default(),
//! );
//!
//! agent.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

pub mod sync;
pub mod view;
