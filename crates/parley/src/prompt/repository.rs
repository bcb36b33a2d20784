//! Repository for prompt catalog operations.

use anyhow::{Context, Result};
use chrono::Utc;

use super::models::{NewPrompt, Prompt};
use crate::db::Database;

/// Repository for prompt catalog operations.
#[derive(Debug, Clone)]
pub struct PromptRepository {
    db: Database,
}

impl PromptRepository {
    /// Create a new repository instance.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new prompt.
    pub async fn create(&self, prompt: NewPrompt) -> Result<Prompt> {
        let now = Utc::now().to_rfc3339();

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO prompts (title, text, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&prompt.title)
        .bind(&prompt.text)
        .bind(&now)
        .bind(&now)
        .fetch_one(self.db.pool())
        .await
        .context("inserting prompt")?;

        self.get_required(id).await
    }

    /// Fetch a prompt by id.
    pub async fn get(&self, id: i64) -> Result<Option<Prompt>> {
        sqlx::query_as::<_, Prompt>(
            "SELECT id, title, text, created_at, updated_at FROM prompts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .context("fetching prompt")
    }

    /// Fetch a prompt that must exist.
    async fn get_required(&self, id: i64) -> Result<Prompt> {
        self.get(id)
            .await?
            .with_context(|| format!("prompt {id} not found after insert"))
    }

    /// Update a prompt's title and text.
    ///
    /// Returns the updated row, or `None` if the prompt does not exist.
    pub async fn update(&self, id: i64, prompt: NewPrompt) -> Result<Option<Prompt>> {
        let updated = sqlx::query(
            r#"
            UPDATE prompts
            SET title = ?, text = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&prompt.title)
        .bind(&prompt.text)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.db.pool())
        .await
        .context("updating prompt")?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    /// List all prompts, newest first.
    pub async fn list(&self) -> Result<Vec<Prompt>> {
        sqlx::query_as::<_, Prompt>(
            "SELECT id, title, text, created_at, updated_at FROM prompts ORDER BY id DESC",
        )
        .fetch_all(self.db.pool())
        .await
        .context("listing prompts")
    }
}
