//! WebSocket connection manager.
//!
//! Tracks connected peers and fans change notifications out to them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use docsync_engine::Sequence;
use tokio::sync::mpsc;

use super::ServerMessage;
use crate::syncer::ChangeListener;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection, keyed by its id in the manager.
#[derive(Debug)]
pub struct Connection {
    /// Label reported at connect time (the user agent).
    pub peer: String,
    pub sender: MessageSender,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: DashMap<String, Connection>,
    /// Highest sequence announced so far.
    announced: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection and return its id.
    pub fn register(&self, peer: String, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        self.connections.insert(
            conn_id.clone(),
            Connection {
                peer,
                sender,
            },
        );

        tracing::info!(conn_id = %conn_id, "WebSocket connection registered");
        conn_id
    }

    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, conn)) = self.connections.remove(conn_id) {
            tracing::info!(
                conn_id = %conn_id,
                peer = %conn.peer,
                "WebSocket connection unregistered"
            );
        }
    }

    /// Broadcast a message to all connections.
    ///
    /// Returns the number of connections that received the message.
    pub fn broadcast_all(&self, message: ServerMessage) -> usize {
        let mut sent_count = 0;

        for entry in self.connections.iter() {
            if entry.value().sender.send(message.clone()).is_ok() {
                sent_count += 1;
            }
        }

        tracing::debug!(recipients = sent_count, "Broadcast message to connections");
        sent_count
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        match self.connections.get(conn_id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn announced_sequence(&self) -> Sequence {
        self.announced.load(Ordering::SeqCst)
    }
}

impl ChangeListener for ConnectionManager {
    /// Batches finishing out of order must not move peers backwards, so a
    /// sequence at or below one already announced is dropped.
    fn changes_available(&self, sequence: Sequence) {
        let previous = self.announced.fetch_max(sequence, Ordering::SeqCst);
        if sequence <= previous {
            tracing::debug!(sequence, previous, "Skipping stale change notification");
            return;
        }
        self.broadcast_all(ServerMessage::Changes { sequence });
    }
}
