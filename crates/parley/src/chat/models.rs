//! Transcript row types.

use serde::Serialize;
use std::fmt;

/// A persisted conversation.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Chat {
    pub id: i64,
    pub user_id: String,
    pub model: String,
    pub prompt_id: i64,
    pub prompt_title: String,
    pub prompt_text: String,
    pub created_at: String,
}

/// A persisted message within a chat.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub chat_id: i64,
    pub user_id: String,
    pub content: String,
    pub kind: String,
    pub created_at: String,
}

/// Whether a message records the user's question or the model's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Question,
    Answer,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Question => write!(f, "question"),
            MessageKind::Answer => write!(f, "answer"),
        }
    }
}

/// Payload for creating a chat row.
#[derive(Debug, Clone)]
pub struct NewChat {
    pub user_id: String,
    pub model: String,
    pub prompt_id: i64,
    pub prompt_title: String,
    pub prompt_text: String,
}

/// Payload for appending a message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: i64,
    pub user_id: String,
    pub content: String,
    pub kind: MessageKind,
}
