//! Prompt catalog row types.

use serde::{Deserialize, Serialize};

/// A stored system-prompt template.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Prompt {
    pub id: i64,
    pub title: String,
    pub text: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Payload for creating or updating a prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPrompt {
    pub title: String,
    pub text: String,
}
