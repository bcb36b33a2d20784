//! Conversation turns and the per-session context window.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One role-tagged message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The mutable context window of one session.
///
/// `turns[0]` is always the system turn derived from the selected
/// prompt; it is set once at construction and later appends never touch
/// it. Turns are immutable once appended, and the list only grows; the
/// context is never truncated or summarized.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub prompt_id: i64,
    pub chat_id: Option<i64>,
    turns: Vec<Turn>,
}

impl SessionContext {
    /// Create a context seeded with the resolved system prompt.
    pub fn new(prompt_id: i64, system_text: impl Into<String>) -> Self {
        Self {
            prompt_id,
            chat_id: None,
            turns: vec![Turn::system(system_text)],
        }
    }

    /// The ordered turns, system turn first.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub(super) fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Total characters across all turn contents.
    pub fn char_count(&self) -> usize {
        self.turns.iter().map(|turn| turn.content.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_starts_with_system_turn() {
        let context = SessionContext::new(7, "Be terse.");
        assert_eq!(context.turns().len(), 1);
        assert_eq!(context.turns()[0], Turn::system("Be terse."));
        assert_eq!(context.prompt_id, 7);
        assert!(context.chat_id.is_none());
    }

    #[test]
    fn test_char_count() {
        let mut context = SessionContext::new(1, "abc");
        context.push(Turn::user("defg"));
        assert_eq!(context.char_count(), 7);
    }

    #[test]
    fn test_role_serde_shape() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        let turn: Turn = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(turn, Turn::user("hi"));
    }
}
