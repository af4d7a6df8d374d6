//! Connection tracking and participant identity for the lobby server
//!
//! This module owns the mapping between live connections and the lobby
//! participant (if any) attached to each of them:
//! - Connection lifecycle (register on accept, unregister on close or error)
//! - Identity validation and uniqueness among players
//! - Per-connection outbound queues for targeted sends and broadcasts
//!
//! The registry is only ever mutated from the lobby dispatcher, so it needs
//! no locking of its own.

use log::{debug, info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::{ServerMessage, DEFAULT_FLAG, DEFAULT_SPECTATOR_NAME, MAX_NAME_LEN};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

const PARTICIPANT_ID_LEN: usize = 9;

/// Opaque handle for a registered connection.
///
/// Handles are allocated in increasing order, so ordering by handle is
/// ordering by registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Player,
    Observer,
}

/// A lobby identity attached to exactly one live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub identity: String,
    pub avatar: String,
    pub role: Role,
    join_order: u64,
}

impl Participant {
    pub fn is_player(&self) -> bool {
        self.role == Role::Player
    }

    /// Position in the sequence of successful joins; lower joined earlier.
    pub fn join_order(&self) -> u64 {
        self.join_order
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("Invalid player name")]
    InvalidIdentity,
    #[error("Name already taken")]
    NameTaken,
    #[error("Connection is not registered")]
    UnknownConnection,
}

#[derive(Debug)]
struct Connection {
    outbound: mpsc::Sender<String>,
    participant: Option<Participant>,
}

/// Registry of every live connection and the participant attached to it.
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionId, Connection>,
    next_connection_id: u64,
    next_join_order: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: BTreeMap::new(),
            next_connection_id: 1,
            next_join_order: 1,
        }
    }

    /// Adds a connection with no participant and returns its handle.
    pub fn register(&mut self, outbound: mpsc::Sender<String>) -> ConnectionId {
        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;

        self.connections.insert(
            id,
            Connection {
                outbound,
                participant: None,
            },
        );
        info!("Connection {} registered ({} live)", id, self.connections.len());

        id
    }

    /// Attaches a participant to a registered connection.
    ///
    /// Player identities are taken verbatim: 1..=20 characters and unique
    /// among the other connections' players. Observers never fail
    /// validation: a blank identity becomes "Spectator" and long ones are
    /// truncated. Any participant previously attached to the connection is
    /// replaced.
    pub fn attach_participant(
        &mut self,
        id: ConnectionId,
        identity: Option<&str>,
        avatar: Option<&str>,
        role: Role,
    ) -> Result<Participant, JoinError> {
        if !self.connections.contains_key(&id) {
            return Err(JoinError::UnknownConnection);
        }

        let identity = match role {
            Role::Player => validate_player_identity(identity)?,
            Role::Observer => observer_identity(identity),
        };

        if role == Role::Player && self.player_name_taken(&identity, id) {
            return Err(JoinError::NameTaken);
        }

        let avatar = avatar
            .filter(|a| !a.is_empty())
            .unwrap_or(DEFAULT_FLAG)
            .to_string();

        let next_join_order = &mut self.next_join_order;
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(JoinError::UnknownConnection)?;

        // A player renaming or re-sending its join keeps its seniority.
        let join_order = match &connection.participant {
            Some(previous) if previous.is_player() && role == Role::Player => previous.join_order,
            _ => {
                let order = *next_join_order;
                *next_join_order += 1;
                order
            }
        };

        let participant = Participant {
            id: generate_id(),
            identity,
            avatar,
            role,
            join_order,
        };

        if let Some(previous) = connection.participant.replace(participant.clone()) {
            debug!(
                "Connection {} replaced participant {} with {}",
                id, previous.identity, participant.identity
            );
        }

        Ok(participant)
    }

    /// Removes the participant attached to a connection, if any.
    pub fn detach(&mut self, id: ConnectionId) -> Option<Participant> {
        self.connections
            .get_mut(&id)
            .and_then(|connection| connection.participant.take())
    }

    /// Removes a connection entirely, returning the participant it carried.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Participant> {
        let connection = self.connections.remove(&id)?;
        info!(
            "Connection {} unregistered ({} live)",
            id,
            self.connections.len()
        );
        connection.participant
    }

    /// Participants in registration order of their connections.
    pub fn snapshot(&self) -> Vec<Participant> {
        self.connections
            .values()
            .filter_map(|connection| connection.participant.clone())
            .collect()
    }

    pub fn participant(&self, id: ConnectionId) -> Option<&Participant> {
        self.connections
            .get(&id)
            .and_then(|connection| connection.participant.as_ref())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn player_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.participant.as_ref().is_some_and(Participant::is_player))
            .count()
    }

    /// Queues a message for one connection without waiting.
    ///
    /// Returns false if the connection is unknown, its queue is full or its
    /// writer has gone away.
    pub fn send_to(&self, id: ConnectionId, message: &ServerMessage) -> bool {
        let Some(connection) = self.connections.get(&id) else {
            return false;
        };

        match shared::encode(message) {
            Ok(text) => Self::enqueue(id, connection, text),
            Err(e) => {
                warn!("Failed to encode message for {}: {}", id, e);
                false
            }
        }
    }

    /// Queues a message for every registered connection.
    ///
    /// Each connection is handled independently; returns how many queues
    /// accepted the message.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        let text = match shared::encode(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode broadcast: {}", e);
                return 0;
            }
        };

        self.connections
            .iter()
            .filter(|(id, connection)| Self::enqueue(**id, connection, text.clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn enqueue(id: ConnectionId, connection: &Connection, text: String) -> bool {
        match connection.outbound.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound queue full for {}, dropping message", id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Outbound queue closed for {}", id);
                false
            }
        }
    }

    fn player_name_taken(&self, identity: &str, requester: ConnectionId) -> bool {
        self.connections.iter().any(|(id, connection)| {
            *id != requester
                && connection
                    .participant
                    .as_ref()
                    .is_some_and(|p| p.is_player() && p.identity == identity)
        })
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_player_identity(identity: Option<&str>) -> Result<String, JoinError> {
    let identity = identity.unwrap_or_default();
    let length = identity.chars().count();

    if length == 0 || length > MAX_NAME_LEN {
        return Err(JoinError::InvalidIdentity);
    }

    Ok(identity.to_string())
}

fn observer_identity(identity: Option<&str>) -> String {
    let identity = identity.unwrap_or_default();

    if identity.is_empty() {
        DEFAULT_SPECTATOR_NAME.to_string()
    } else {
        identity.chars().take(MAX_NAME_LEN).collect()
    }
}

/// Short lowercase alphanumeric id used for participants and sessions.
pub fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PARTICIPANT_ID_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}
