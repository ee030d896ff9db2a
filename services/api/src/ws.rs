//! HTTP surface: the `/ws` relay endpoint and a `/health` probe.

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use voice_relay_core::{ClientFrame, RealtimeConnector, SessionDefaults, SessionRelay};

/// Client frames buffered ahead of the relay loop.
const CLIENT_FRAME_BUFFER: usize = 64;

/// Shared by every connection.
pub struct AppState<C> {
    pub connector: Arc<C>,
    pub defaults: Arc<SessionDefaults>,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            defaults: self.defaults.clone(),
        }
    }
}

pub fn router<C: RealtimeConnector>(state: AppState<C>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::<C>))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn ws_handler<C: RealtimeConnector>(
    State(state): State<AppState<C>>,
    ws: WebSocketUpgrade,
) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Bridges one WebSocket to its own [`SessionRelay`].
///
/// The socket reader feeds the relay loop, and a writer task serializes
/// everything the relay emits. Closing the socket ends the relay, which
/// tears down any upstream session.
async fn handle_socket<C: RealtimeConnector>(socket: WebSocket, state: AppState<C>) {
    info!("WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (frames_tx, frames_rx) = mpsc::channel(CLIENT_FRAME_BUFFER);
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

    let relay = SessionRelay::new(state.connector, state.defaults, outbound_tx);
    let relay_task = tokio::spawn(relay.run(frames_rx));

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to serialize relay message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                // Client disconnected.
                break;
            }
        }
        if let Err(e) = sender.close().await {
            tracing::debug!("Closing client socket: {}", e);
        }
    });

    while let Some(msg) = receiver.next().await {
        let frame = match msg {
            Ok(Message::Text(text)) => ClientFrame::Text(text.as_str().to_owned()),
            Ok(Message::Binary(bytes)) => ClientFrame::Binary(bytes.to_vec()),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                info!("WebSocket error: {}", e);
                break;
            }
        };
        if frames_tx.send(frame).await.is_err() {
            break;
        }
    }

    drop(frames_tx);
    if let Err(e) = relay_task.await {
        tracing::error!("Relay task failed: {}", e);
    }
    if let Err(e) = writer.await {
        tracing::error!("Client writer task failed: {}", e);
    }

    info!("WebSocket connection closed");
}
