//! Pull-mode delivery: per-session signal queues drained by polling.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use super::{DeliveryChannel, StreamSignal};

/// Per-session single-producer/single-consumer queues.
///
/// The relay is the producer; a polling client is the consumer. Each
/// poll removes what it returns, so concurrent pollers would race for
/// signals rather than share them; one poller per session is the
/// supported configuration.
#[derive(Default)]
pub struct Mailbox {
    queues: DashMap<String, SessionQueue>,
}

struct SessionQueue {
    tx: mpsc::UnboundedSender<StreamSignal>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<StreamSignal>>>,
}

impl SessionQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything queued for the session.
    ///
    /// An empty or unknown session yields an empty list.
    pub async fn drain(&self, session_id: &str) -> Vec<StreamSignal> {
        let Some(rx) = self
            .queues
            .get(session_id)
            .map(|queue| Arc::clone(&queue.rx))
        else {
            return Vec::new();
        };

        let mut rx = rx.lock().await;
        let mut signals = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            signals.push(signal);
        }
        signals
    }

    /// Number of sessions with queued state.
    pub fn session_count(&self) -> usize {
        self.queues.len()
    }
}

#[async_trait]
impl DeliveryChannel for Mailbox {
    async fn publish(&self, session_id: &str, signal: StreamSignal) {
        let queue = self
            .queues
            .entry(session_id.to_string())
            .or_insert_with(SessionQueue::new);
        // Receiver lives as long as the map entry, so this only fails
        // if the session was forgotten concurrently.
        if queue.tx.send(signal).is_err() {
            debug!(session_id, "dropped signal for forgotten session");
        }
    }

    fn forget_session(&self, session_id: &str) {
        self.queues.remove(session_id);
    }
}
