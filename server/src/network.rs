//! Server network layer: WebSocket connections and HTTP status endpoints
//!
//! Each WebSocket gets a reader (socket -> dispatcher queue) and a writer
//! (bounded outbound queue -> socket). Nothing here touches lobby state
//! directly; everything goes through the [`LobbyHandle`].

use crate::config::ServerConfig;
use crate::lobby::{Lobby, LobbyHandle};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use log::{error, info, warn};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Shared state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub lobby: LobbyHandle,
    pub send_queue: usize,
}

/// Builds the axum router. The WebSocket is served on `/` (where browser
/// clients dial) as well as `/ws`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/api/health", get(health_handler))
        .route("/api/game-state", get(game_state_handler))
        .route("/api/end-game", post(end_game_handler))
        .with_state(state)
}

/// Handle returned by [`start`]; keeps the server and dispatcher tasks.
pub struct ServerHandle {
    pub local_addr: SocketAddr,
    lobby: LobbyHandle,
    server: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn lobby(&self) -> &LobbyHandle {
        &self.lobby
    }

    /// Waits for the HTTP server task to finish.
    pub async fn wait(self) {
        if let Err(e) = self.server.await {
            error!("Server task failed: {}", e);
        }
        self.dispatcher.abort();
    }

    pub fn shutdown(self) {
        self.server.abort();
        self.dispatcher.abort();
    }
}

/// Binds the listener, spawns the dispatcher and starts serving.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    let local_addr = listener.local_addr()?;

    let (lobby, dispatcher) = Lobby::spawn(config.timings, config.event_queue);
    let state = AppState {
        lobby: lobby.clone(),
        send_queue: config.send_queue.max(1),
    };

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, build_router(state)).await {
            error!("HTTP server error: {}", e);
        }
    });

    info!("Lobby server listening on {}", local_addr);

    Ok(ServerHandle {
        local_addr,
        lobby,
        server,
        dispatcher,
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Runs one WebSocket connection until either side closes it.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(state.send_queue);

    let Some(id) = state.lobby.connect(outbound_tx).await else {
        warn!("Lobby unavailable, closing new connection");
        return;
    };
    info!("New client connected as {}", id);

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Ends when the registry drops the sender or the socket stops accepting
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => state.lobby.message(id, text.to_string()).await,
            Ok(Message::Binary(bytes)) => {
                warn!("Ignoring {} byte binary frame from {}", bytes.len(), id);
            }
            Ok(Message::Close(_)) => break,
            // Pings are answered by axum
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error on {}: {}", id, e);
                break;
            }
        }
    }

    state.lobby.disconnect(id).await;
    writer.abort();
    info!("Client {} disconnected", id);
}

async fn health_handler(State(state): State<AppState>) -> Response {
    match state.lobby.snapshot().await {
        Some(snapshot) => Json(json!({ "status": "ok", "gameState": snapshot })).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable" })),
        )
            .into_response(),
    }
}

async fn game_state_handler(State(state): State<AppState>) -> Response {
    match state.lobby.snapshot().await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn end_game_handler(State(state): State<AppState>) -> Response {
    if state.lobby.end_session().await {
        Json(json!({ "ended": true })).into_response()
    } else {
        (StatusCode::CONFLICT, Json(json!({ "ended": false }))).into_response()
    }
}
