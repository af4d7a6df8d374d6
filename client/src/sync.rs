//! Connection loop that keeps a [`LobbyView`] in sync with the server.

use crate::view::LobbyView;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{
    decode_server_message, encode, ClientMessage, DecodeError, JoinRequest, ServerMessage,
    SpectateRequest,
};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, Message};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("gave up after {0} failed connection attempts")]
    Exhausted(u32),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// How long to wait between connection attempts and how many to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// `failures` counts consecutive failed attempts so far.
    pub fn should_retry(&self, failures: u32) -> bool {
        self.max_attempts.map_or(true, |max| failures < max)
    }
}

/// What the agent asks to be once connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Participation {
    /// Only watch snapshots
    Watch,
    Player { name: String, flag: Option<String> },
    Spectator {
        name: Option<String>,
        flag: Option<String>,
    },
}

#[derive(Debug, PartialEq, Eq)]
enum ConnectionEnd {
    Closed,
    Shutdown,
}

pub struct SyncAgent {
    url: String,
    participation: Participation,
    policy: ReconnectPolicy,
    view: LobbyView,
    last_error: Option<String>,
    print_updates: bool,
}

impl SyncAgent {
    pub fn new(url: impl Into<String>, participation: Participation, policy: ReconnectPolicy) -> Self {
        let own_name = match &participation {
            Participation::Player { name, .. } => Some(name.clone()),
            _ => None,
        };

        Self {
            url: url.into(),
            participation,
            policy,
            view: LobbyView::new(own_name),
            last_error: None,
            print_updates: false,
        }
    }

    /// Print the rendered view to stdout whenever it changes.
    pub fn print_updates(mut self, enabled: bool) -> Self {
        self.print_updates = enabled;
        self
    }

    pub fn view(&self) -> &LobbyView {
        &self.view
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Messages sent right after every (re)connect. The server forgets a
    /// participant when its connection closes, so the join is replayed.
    pub fn opening_messages(&self) -> Vec<ClientMessage> {
        let mut messages = vec![ClientMessage::RequestGameState];

        match &self.participation {
            Participation::Watch => {}
            Participation::Player { name, flag } => {
                messages.push(ClientMessage::JoinGame(JoinRequest {
                    player_name: Some(name.clone()),
                    player_flag: flag.clone(),
                }));
            }
            Participation::Spectator { name, flag } => {
                messages.push(ClientMessage::SpectateGame(SpectateRequest {
                    player_name: name.clone(),
                    player_flag: flag.clone(),
                }));
            }
        }

        messages
    }

    /// Applies one text frame from the server. Returns true if the view changed.
    pub fn handle_text(&mut self, text: &str) -> bool {
        match decode_server_message(text) {
            Ok(ServerMessage::GameState(snapshot)) => {
                if snapshot.status != self.view.status() {
                    info!("Lobby is now {}", snapshot.status);
                }
                self.view.apply(snapshot);
                true
            }
            Ok(ServerMessage::Error { message }) => {
                error!("Server error: {}", message);
                self.last_error = Some(message);
                false
            }
            Err(DecodeError::UnknownType(kind)) => {
                debug!("Ignoring server message of type {}", kind);
                false
            }
            Err(e) => {
                warn!("Malformed server message: {}", e);
                false
            }
        }
    }

    /// Connects and keeps reconnecting until `shutdown` completes or the
    /// policy gives up.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), SyncError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut failures = 0;

        loop {
            match self.run_connection(&mut shutdown).await {
                Ok(ConnectionEnd::Shutdown) => return Ok(()),
                Ok(ConnectionEnd::Closed) => {
                    info!("Connection to {} closed", self.url);
                    failures = 0;
                }
                Err(ConnectionError::Encode(e)) => return Err(e.into()),
                Err(ConnectionError::Transport { connected, error }) => {
                    warn!("Connection to {} failed: {}", self.url, error);
                    failures = if connected { 0 } else { failures + 1 };
                }
            }

            if !self.policy.should_retry(failures) {
                return Err(SyncError::Exhausted(failures));
            }

            info!("Reconnecting in {:?}", self.policy.delay);
            tokio::select! {
                _ = tokio::time::sleep(self.policy.delay) => {}
                _ = &mut shutdown => return Ok(()),
            }
        }
    }

    async fn run_connection<F>(&mut self, shutdown: &mut F) -> Result<ConnectionEnd, ConnectionError>
    where
        F: Future<Output = ()> + Unpin,
    {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(ConnectionError::before_open)?;
        info!("Connected to {}", self.url);

        let (mut write, mut read) = stream.split();

        for message in self.opening_messages() {
            let text = encode(&message)?;
            write
                .send(Message::Text(text.into()))
                .await
                .map_err(ConnectionError::after_open)?;
        }

        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if self.handle_text(text.as_str()) && self.print_updates {
                            println!("{}\n", self.view.render());
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(ConnectionEnd::Closed),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ConnectionError::after_open(e)),
                },
                _ = &mut *shutdown => {
                    if self.participation != Participation::Watch {
                        let text = encode(&ClientMessage::LeaveGame)?;
                        let _ = write.send(Message::Text(text.into())).await;
                    }
                    let _ = write.close().await;
                    info!("Left the lobby");
                    return Ok(ConnectionEnd::Shutdown);
                }
            }
        }
    }
}

#[derive(Debug, Error)]
enum ConnectionError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{error}")]
    Transport {
        connected: bool,
        #[source]
        error: tungstenite::Error,
    },
}

impl ConnectionError {
    fn before_open(error: tungstenite::Error) -> Self {
        Self::Transport {
            connected: false,
            error,
        }
    }

    fn after_open(error: tungstenite::Error) -> Self {
        Self::Transport {
            connected: true,
            error,
        }
    }
}
