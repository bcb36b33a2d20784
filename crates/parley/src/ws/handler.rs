//! WebSocket handler for client connections.

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::relay::TurnRequest;

use super::types::{WsCommand, WsEvent};

/// Ping interval for keepalive.
const PING_INTERVAL_SECS: u64 = 30;

/// Query parameters for the websocket upgrade.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Session to bind this connection to; generated when absent.
    pub session_id: Option<String>,
}

/// WebSocket upgrade handler.
///
/// GET /api/ws
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let session_id = query
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(session_id = %session_id, "websocket upgrade request");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, session_id))
}

/// Handle a WebSocket connection.
async fn handle_ws_connection(socket: WebSocket, state: AppState, session_id: String) {
    let (mut sender, mut receiver) = socket.split();

    // Register connection with the hub
    let (mut event_rx, conn_id) = state.hub.register(&session_id);

    // Send connected message
    let connected = WsEvent::Connected {
        session_id: session_id.clone(),
    };
    if let Err(e) = sender
        .send(Message::Text(
            serde_json::to_string(&connected).unwrap().into(),
        ))
        .await
    {
        warn!(session_id = %session_id, error = %e, "failed to send connected message");
        state.hub.unregister(&session_id, conn_id);
        return;
    }

    // Spawn task to send events to the client
    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));

        loop {
            tokio::select! {
                // Events from the per-connection channel
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "failed to serialize event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }

                // Periodic ping
                _ = ping_interval.tick() => {
                    let ping = serde_json::to_string(&WsEvent::Ping).unwrap();
                    if sender.send(Message::Text(ping.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Process incoming messages
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<WsCommand>(&text) {
                Ok(command) => handle_command(&state, &session_id, command).await,
                Err(e) => {
                    warn!(
                        session_id = %session_id,
                        error = %e,
                        raw = %text,
                        "failed to parse command"
                    );
                }
            },
            Ok(Message::Binary(_)) => {
                debug!(session_id = %session_id, "ignoring binary message");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                debug!(session_id = %session_id, "keepalive frame");
            }
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "client closed websocket");
                break;
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "websocket error");
                break;
            }
        }
    }

    // Clean up. A turn still streaming keeps running; its remaining
    // chunks are dropped by the hub and the answer is still persisted.
    send_task.abort();
    state.hub.unregister(&session_id, conn_id);
    info!(session_id = %session_id, "websocket connection closed");
}

/// Handle a command from a client.
async fn handle_command(state: &AppState, session_id: &str, command: WsCommand) {
    match command {
        WsCommand::Pong => {}

        WsCommand::AskQuestion {
            question,
            prompt_id,
            model,
        } => {
            let request = TurnRequest {
                session_id: session_id.to_string(),
                prompt_id,
                model,
                question,
            };
            match state.relay.submit_turn(request).await {
                Ok(accepted) => {
                    state
                        .hub
                        .send_to_session(
                            session_id,
                            WsEvent::Accepted {
                                session_id: accepted.session_id,
                                chat_id: accepted.chat_id,
                            },
                        )
                        .await;
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "question rejected");
                    state
                        .hub
                        .send_to_session(
                            session_id,
                            WsEvent::Error {
                                message: e.public_message(),
                                session_id: Some(session_id.to_string()),
                            },
                        )
                        .await;
                }
            }
        }

        WsCommand::Reset => {
            state.relay.reset(session_id);
            state
                .hub
                .send_to_session(
                    session_id,
                    WsEvent::Reset {
                        session_id: session_id.to_string(),
                    },
                )
                .await;
        }
    }
}
