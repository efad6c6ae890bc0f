//! WebSocket handler for live cycle reports.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use serde::Deserialize;
use tokio::sync::broadcast;

/// WebSocket upgrade handler for /ws/events.
pub async fn events_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Commands a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientCommand {
    Stats,
    Patterns,
}

fn envelope(kind: &str, data: impl serde::Serialize) -> Option<String> {
    serde_json::to_string(&serde_json::json!({
        "type": kind,
        "data": data
    }))
    .ok()
}

async fn send_stats(socket: &mut WebSocket, state: &AppState) -> bool {
    match envelope("stats", state.swarm.stats()) {
        Some(json) => socket.send(Message::Text(json)).await.is_ok(),
        None => true,
    }
}

/// Handle a WebSocket connection.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.subscribe();

    // Current stats first, then every cycle report as it completes.
    if !send_stats(&mut socket, &state).await {
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(report) => {
                        if let Some(json) = envelope("cycle", &report) {
                            if socket.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "websocket client lagging, reports skipped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientCommand>(&text) {
                            Ok(ClientCommand::Stats) => {
                                if !send_stats(&mut socket, &state).await {
                                    break;
                                }
                            }
                            Ok(ClientCommand::Patterns) => {
                                if let Some(json) = envelope("patterns", state.swarm.patterns()) {
                                    if socket.send(Message::Text(json)).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(error) => {
                                tracing::debug!(%error, "ignoring unknown websocket command");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
