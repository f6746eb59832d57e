//! WebSocket transport for game events
//!
//! A connection receives broadcasts immediately. Per-user events (balance,
//! roll results, recent rolls) start flowing once the client sends
//! `{"type":"authenticate","userId":"..."}`.

use super::handlers::AppState;
use crate::notifications::{GameEvent, Notifier, SessionId, SessionRegistry};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::interval};
use tracing::{debug, error, info, warn};

/// Messages accepted from clients
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate {
        #[serde(rename = "userId")]
        user_id: String,
    },
}

/// GET /ws
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let sessions = state.sessions.clone();
    ws.on_upgrade(move |socket| handle_connection(socket, sessions))
}

async fn handle_connection(socket: WebSocket, sessions: Arc<SessionRegistry>) {
    let (session_id, mut events) = sessions.connect();
    info!(
        session_id,
        total = sessions.session_count(),
        "🔌 WebSocket client connected"
    );

    let (mut sender, mut receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let message = match serde_json::to_string(&event) {
                Ok(json) => Message::Text(json),
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if sender.send(message).await.is_err() {
                debug!(session_id, "Client went away");
                break;
            }
        }
    });

    let receive_sessions = sessions.clone();
    let receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => handle_client_message(&receive_sessions, session_id, &text),
                Ok(Message::Close(_)) => {
                    debug!(session_id, "Client requested close");
                    break;
                }
                Err(e) => {
                    warn!(session_id, "WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = receive_task => {}
    }

    sessions.disconnect(session_id);
    info!(
        session_id,
        remaining = sessions.session_count(),
        "🔌 WebSocket client disconnected"
    );
}

fn handle_client_message(sessions: &SessionRegistry, session_id: SessionId, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Authenticate { user_id }) => {
            let user_id = user_id.trim();
            if user_id.is_empty() {
                sessions.send_to_session(
                    session_id,
                    GameEvent::Error {
                        message: "userId is required".to_string(),
                    },
                );
                return;
            }
            sessions.authenticate(session_id, user_id);
        }
        Err(e) => {
            debug!(session_id, "Ignoring unrecognised client message: {}", e);
        }
    }
}

/// Broadcast a heartbeat every `period` until the task is aborted
pub fn spawn_heartbeat(sessions: Arc<SessionRegistry>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sessions.broadcast(GameEvent::Heartbeat {
                timestamp: Utc::now().timestamp(),
            });
        }
    })
}
