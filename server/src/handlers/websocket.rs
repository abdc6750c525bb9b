//! WebSocket handler for change notifications.
//!
//! Registers the connection so it receives change-log broadcasts, and
//! answers `changes` and `ping` requests sent over the socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::syncer::Syncer;
use crate::websocket::{ClientMessage, ConnectionManager, ServerMessage};

/// Handle an established WebSocket connection until the peer goes away.
pub async fn handle_websocket_connection(
    socket: WebSocket,
    syncer: Arc<Syncer>,
    conn_manager: Arc<ConnectionManager>,
    peer: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_id = conn_manager.register(peer.clone(), tx);

    tracing::info!(conn_id = %conn_id, peer = %peer, "WebSocket client connected");

    // Tell the new peer where the log stands so it can catch up right away.
    match syncer.changes_since_sequence(None).await {
        Ok(current) => {
            conn_manager.send_to(&conn_id, ServerMessage::Changes { sequence: current.sequence });
        }
        Err(e) => tracing::warn!(conn_id = %conn_id, "Failed to read current sequence: {}", e),
    }

    // Forward queued messages to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_message(&text, &syncer).await;
                conn_manager.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message and return the reply.
async fn process_message(text: &str, syncer: &Syncer) -> ServerMessage {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return ServerMessage::error(format!("Invalid message format: {}", e), None);
        }
    };

    match client_msg {
        ClientMessage::Changes { since, request_id } => {
            match syncer.changes_since_sequence(since).await {
                Ok(response) => ServerMessage::ChangesResponse {
                    sequence: response.sequence,
                    atoms: response.atoms,
                    request_id,
                },
                Err(e) => {
                    tracing::error!("Changes request failed: {}", e);
                    ServerMessage::error(e.to_string(), request_id)
                }
            }
        }
        ClientMessage::Ping => ServerMessage::Pong,
    }
}
