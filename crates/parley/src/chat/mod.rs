//! Transcript store: durable record of chats and their messages.
//!
//! A chat row is written exactly once, when the first question of a
//! session is persisted. Messages are append-only; within a chat their
//! row order is the causal turn order (each question precedes its
//! answer).

mod models;
mod repository;

pub use models::{Chat, ChatMessage, MessageKind, NewChat, NewMessage};
pub use repository::ChatRepository;
