//! WebSocket message types for the streaming edge.
//!
//! These types define the protocol between client and relay over
//! WebSocket. Every answer-bearing event carries the session id so a
//! client can multiplex if it wants to.

use serde::{Deserialize, Serialize};

use crate::delivery::StreamSignal;

// ============================================================================
// Events (Server -> Client)
// ============================================================================

/// Events sent from the relay to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    /// Connection established; echoes the session id in use.
    Connected { session_id: String },

    /// Heartbeat/keepalive ping.
    Ping,

    /// A question was accepted; the answer follows as chunk events.
    Accepted { session_id: String, chat_id: i64 },

    /// An incremental fragment of the answer.
    Chunk { session_id: String, text: String },

    /// Normal end of the answer stream.
    End {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        token_count: Option<u32>,
    },

    /// The session context was cleared.
    Reset { session_id: String },

    /// Error message, distinguishable from a normal end of stream.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl WsEvent {
    /// Wrap a relay stream signal for one session.
    pub fn from_signal(session_id: &str, signal: StreamSignal) -> Self {
        match signal {
            StreamSignal::Chunk { text } => WsEvent::Chunk {
                session_id: session_id.to_string(),
                text,
            },
            StreamSignal::End { token_count } => WsEvent::End {
                session_id: session_id.to_string(),
                token_count,
            },
            StreamSignal::Error { message } => WsEvent::Error {
                message,
                session_id: Some(session_id.to_string()),
            },
        }
    }
}

// ============================================================================
// Commands (Client -> Server)
// ============================================================================

/// Commands sent from the client to the relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsCommand {
    /// Pong response to ping.
    Pong,

    /// Submit a question for this session.
    AskQuestion {
        question: String,
        prompt_id: i64,
        model: String,
    },

    /// Clear the session context; the next question starts a new chat.
    Reset,
}
