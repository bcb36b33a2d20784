//! WebSocket hub: push-mode delivery keyed by session id.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::types::WsEvent;
use crate::delivery::{DeliveryChannel, StreamSignal};

/// Size of the per-connection send buffer.
const CONNECTION_BUFFER_SIZE: usize = 64;

/// A sender for WebSocket events to a specific connection.
type ConnectionSender = mpsc::Sender<WsEvent>;

/// Push-mode hub managing the live subscribers of each session.
///
/// Publishing to a session with no connections drops the event: push
/// mode buffers nothing, so a subscriber that attaches mid-stream only
/// sees what arrives afterwards.
#[derive(Default)]
pub struct RelayHub {
    /// Session id -> that session's open connections.
    connections: DashMap<String, Vec<(u64, ConnectionSender)>>,

    /// Monotonic connection id source.
    next_conn_id: AtomicU64,
}

impl RelayHub {
    /// Create a new hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection for a session.
    ///
    /// Returns a receiver for events targeted at this connection and
    /// the connection id.
    pub fn register(&self, session_id: &str) -> (mpsc::Receiver<WsEvent>, u64) {
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER_SIZE);
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.connections
            .entry(session_id.to_string())
            .or_default()
            .push((conn_id, tx));
        info!(session_id, conn_id, "registered websocket connection");
        (rx, conn_id)
    }

    /// Unregister a connection.
    pub fn unregister(&self, session_id: &str, conn_id: u64) {
        if let Some(mut conns) = self.connections.get_mut(session_id) {
            conns.retain(|(id, _)| *id != conn_id);
            info!(session_id, conn_id, "unregistered websocket connection");
        }

        // Clean up empty entries
        self.connections.retain(|_, conns| !conns.is_empty());
    }

    /// Number of live connections for a session.
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.connections
            .get(session_id)
            .map(|conns| conns.len())
            .unwrap_or(0)
    }

    /// Send an event to every connection of a session.
    pub async fn send_to_session(&self, session_id: &str, event: WsEvent) {
        let senders: Vec<ConnectionSender> = match self.connections.get(session_id) {
            Some(conns) => conns.iter().map(|(_, tx)| tx.clone()).collect(),
            None => {
                debug!(session_id, "no subscribers, event dropped");
                return;
            }
        };

        for (i, tx) in senders.iter().enumerate() {
            if tx.send(event.clone()).await.is_err() {
                warn!(session_id, connection = i, "failed to deliver event");
            }
        }
    }
}

#[async_trait]
impl DeliveryChannel for RelayHub {
    async fn publish(&self, session_id: &str, signal: StreamSignal) {
        self.send_to_session(session_id, WsEvent::from_signal(session_id, signal))
            .await;
    }

    fn forget_session(&self, _session_id: &str) {
        // Connections are socket-scoped, not turn-scoped: a reset
        // leaves the live sockets attached.
    }
}
