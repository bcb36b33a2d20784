//! Repository for transcript operations.

use anyhow::{Context, Result};
use chrono::Utc;

use super::models::{Chat, ChatMessage, NewChat, NewMessage};
use crate::db::Database;

/// Repository for transcript operations.
#[derive(Debug, Clone)]
pub struct ChatRepository {
    db: Database,
}

impl ChatRepository {
    /// Create a new repository instance.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a chat row, returning its id.
    pub async fn create_chat(&self, chat: NewChat) -> Result<i64> {
        let created_at = Utc::now().to_rfc3339();

        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO chats (user_id, model, prompt_id, prompt_title, prompt_text, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&chat.user_id)
        .bind(&chat.model)
        .bind(chat.prompt_id)
        .bind(&chat.prompt_title)
        .bind(&chat.prompt_text)
        .bind(&created_at)
        .fetch_one(self.db.pool())
        .await
        .context("inserting chat")
    }

    /// Fetch a chat by id.
    pub async fn get_chat(&self, id: i64) -> Result<Option<Chat>> {
        sqlx::query_as::<_, Chat>(
            r#"
            SELECT id, user_id, model, prompt_id, prompt_title, prompt_text, created_at
            FROM chats
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .context("fetching chat")
    }

    /// List all chats, newest first.
    pub async fn list_chats(&self) -> Result<Vec<Chat>> {
        sqlx::query_as::<_, Chat>(
            r#"
            SELECT id, user_id, model, prompt_id, prompt_title, prompt_text, created_at
            FROM chats
            ORDER BY id DESC
            "#,
        )
        .fetch_all(self.db.pool())
        .await
        .context("listing chats")
    }

    /// Append a message to a chat, returning the stored row.
    pub async fn append_message(&self, message: NewMessage) -> Result<ChatMessage> {
        let kind = message.kind.to_string();
        let created_at = Utc::now().to_rfc3339();

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO messages (chat_id, user_id, content, kind, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(message.chat_id)
        .bind(&message.user_id)
        .bind(&message.content)
        .bind(&kind)
        .bind(&created_at)
        .fetch_one(self.db.pool())
        .await
        .context("inserting message")?;

        self.get_message(id).await
    }

    /// Fetch a message by id.
    async fn get_message(&self, id: i64) -> Result<ChatMessage> {
        sqlx::query_as::<_, ChatMessage>(
            "SELECT id, chat_id, user_id, content, kind, created_at FROM messages WHERE id = ?",
        )
        .bind(id)
        .fetch_one(self.db.pool())
        .await
        .context("fetching message")
    }

    /// List a chat's messages in causal order.
    pub async fn list_messages(&self, chat_id: i64) -> Result<Vec<ChatMessage>> {
        sqlx::query_as::<_, ChatMessage>(
            r#"
            SELECT id, chat_id, user_id, content, kind, created_at
            FROM messages
            WHERE chat_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(chat_id)
        .fetch_all(self.db.pool())
        .await
        .context("listing messages")
    }

    /// Count messages in a chat.
    pub async fn count_messages(&self, chat_id: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_one(self.db.pool())
            .await
            .context("counting messages")
    }
}
