//! Wire protocol shared by the lobby server and its clients.
//!
//! Every message is a JSON object with a `type` tag and an optional `data`
//! payload. Inbound messages are decoded once, at the connection boundary,
//! into the closed [`ClientMessage`] enum; the server only ever emits
//! [`ServerMessage`] values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3001;
pub const MAX_NAME_LEN: usize = 20;
pub const DEFAULT_FLAG: &str = "us";
pub const DEFAULT_SPECTATOR_NAME: &str = "Spectator";
pub const MIN_PLAYERS_TO_START: usize = 2;

/// Message types a client is allowed to send.
pub const CLIENT_MESSAGE_TYPES: [&str; 5] = [
    "joinGame",
    "spectateGame",
    "leaveGame",
    "requestGameState",
    "endGame",
];

/// Lifecycle phase of the lobby session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Waiting,
    Starting,
    Running,
    Finished,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// One roster entry as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: String,
    pub name: String,
    pub flag: String,
    pub is_spectator: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_lobby_leader: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Full session state pushed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub player_count: usize,
    pub players: Vec<PlayerInfo>,
    #[serde(default)]
    pub game_id: Option<String>,
}

impl SessionSnapshot {
    /// Roster entries that are players, in roster order.
    pub fn active_players(&self) -> impl Iterator<Item = &PlayerInfo> {
        self.players.iter().filter(|p| !p.is_spectator)
    }

    /// Roster entries that are spectators, in roster order.
    pub fn spectators(&self) -> impl Iterator<Item = &PlayerInfo> {
        self.players.iter().filter(|p| p.is_spectator)
    }
}

/// A missing name still decodes so the server can answer it with an error.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_flag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_flag: Option<String>,
}

/// Messages sent from clients to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    JoinGame(JoinRequest),
    SpectateGame(SpectateRequest),
    LeaveGame,
    RequestGameState,
    EndGame,
}

/// Messages sent from the server to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    GameState(SessionSnapshot),
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message has no `type` field")]
    MissingType,
    #[error("unknown message type `{0}`")]
    UnknownType(String),
}

/// Decodes a raw client frame.
///
/// Unknown message types are reported separately from malformed payloads so
/// the server can ignore the former quietly. A `joinGame` or `spectateGame`
/// without a `data` object decodes as an empty request.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, DecodeError> {
    let mut value: Value = serde_json::from_str(text)?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?
        .to_owned();

    if !CLIENT_MESSAGE_TYPES.contains(&kind.as_str()) {
        return Err(DecodeError::UnknownType(kind));
    }

    if kind == "joinGame" || kind == "spectateGame" {
        if let Some(object) = value.as_object_mut() {
            let missing = object.get("data").map_or(true, Value::is_null);
            if missing {
                object.insert("data".to_owned(), Value::Object(Default::default()));
            }
        }
    }

    Ok(serde_json::from_value(value)?)
}

pub fn decode_server_message(text: &str) -> Result<ServerMessage, DecodeError> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
