//! Delivery channels for streamed answers.
//!
//! The relay publishes [`StreamSignal`]s per session; a deployment
//! chooses one transport-facing realization:
//!
//! - push mode: the websocket hub ([`crate::ws::RelayHub`]) forwards
//!   each signal to the session's live subscribers as it arrives; with
//!   no subscriber attached the signal is dropped.
//! - pull mode: the [`Mailbox`] queues signals per session until a
//!   polling client drains them.
//!
//! Both preserve the relay's FIFO order.

mod mailbox;

pub use mailbox::Mailbox;

use async_trait::async_trait;
use serde::Serialize;

/// One event on a session's answer stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamSignal {
    /// An incremental fragment of the answer.
    Chunk { text: String },
    /// Normal end of stream.
    End {
        #[serde(skip_serializing_if = "Option::is_none")]
        token_count: Option<u32>,
    },
    /// The turn failed; chunks already delivered remain valid.
    Error { message: String },
}

impl StreamSignal {
    /// Whether this signal closes the stream (normally or not).
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamSignal::End { .. } | StreamSignal::Error { .. })
    }
}

/// Transport-facing edge the relay publishes to.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Deliver one signal to the session's observers.
    async fn publish(&self, session_id: &str, signal: StreamSignal);

    /// Drop any per-session delivery state (called on session reset).
    fn forget_session(&self, session_id: &str);
}
