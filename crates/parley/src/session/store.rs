//! Arena of session contexts keyed by session id.

use dashmap::DashMap;
use thiserror::Error;

use super::context::{SessionContext, Turn};

/// Errors from session-context operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("question must not be empty")]
    EmptyInput,

    #[error("no context for session {0}")]
    UnknownSession(String),
}

/// Owns every live session's context window.
///
/// All operations are short and synchronous; callers that need the
/// turns across an await point take a [`snapshot`](Self::snapshot)
/// rather than holding a reference into the map.
#[derive(Debug, Default)]
pub struct SessionStore {
    contexts: DashMap<String, SessionContext>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a context exists for `session_id`.
    ///
    /// A new context is seeded with the resolved system prompt. An
    /// existing context is left untouched: the system turn is set
    /// exactly once, and a different `prompt_id` on a later call does
    /// not replace it until the session is reset.
    pub fn get_or_init(&self, session_id: &str, prompt_id: i64, system_text: &str) {
        self.contexts
            .entry(session_id.to_string())
            .or_insert_with(|| SessionContext::new(prompt_id, system_text));
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.contexts.contains_key(session_id)
    }

    /// The persisted chat row bound to this session, if any.
    pub fn chat_id(&self, session_id: &str) -> Option<i64> {
        self.contexts.get(session_id).and_then(|ctx| ctx.chat_id)
    }

    /// The prompt the session's context was seeded from.
    pub fn prompt_id(&self, session_id: &str) -> Option<i64> {
        self.contexts.get(session_id).map(|ctx| ctx.prompt_id)
    }

    /// Bind the session to its persisted chat row.
    pub fn bind_chat(&self, session_id: &str, chat_id: i64) -> Result<(), SessionError> {
        let mut ctx = self
            .contexts
            .get_mut(session_id)
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;
        ctx.chat_id = Some(chat_id);
        Ok(())
    }

    /// Append the user's question to the context.
    ///
    /// Empty or whitespace-only text is rejected before anything is
    /// appended.
    pub fn append_user_turn(&self, session_id: &str, text: &str) -> Result<(), SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::EmptyInput);
        }
        let mut ctx = self
            .contexts
            .get_mut(session_id)
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;
        ctx.push(Turn::user(text));
        Ok(())
    }

    /// Append the model's completed answer to the context.
    ///
    /// An empty answer is skipped without error: a turn with no content
    /// is never recorded.
    pub fn append_assistant_turn(&self, session_id: &str, text: &str) -> Result<(), SessionError> {
        if text.is_empty() {
            return Ok(());
        }
        let mut ctx = self
            .contexts
            .get_mut(session_id)
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;
        ctx.push(Turn::assistant(text));
        Ok(())
    }

    /// Copy of the session's ordered turns.
    pub fn snapshot(&self, session_id: &str) -> Option<Vec<Turn>> {
        self.contexts
            .get(session_id)
            .map(|ctx| ctx.turns().to_vec())
    }

    /// Discard the session's context and chat binding.
    ///
    /// Idempotent; a later question behaves as first contact.
    pub fn reset(&self, session_id: &str) {
        self.contexts.remove(session_id);
    }

    /// Total characters held in the session's context.
    ///
    /// A cheap proxy for context size, used for diagnostics only; the
    /// context is never truncated based on it.
    pub fn estimate_size(&self, session_id: &str) -> usize {
        self.contexts
            .get(session_id)
            .map(|ctx| ctx.char_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    #[test]
    fn test_system_turn_set_once() {
        let store = SessionStore::new();
        store.get_or_init("s1", 1, "first prompt");
        store.get_or_init("s1", 2, "second prompt");

        let turns = store.snapshot("s1").unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0], Turn::system("first prompt"));
        assert_eq!(store.prompt_id("s1"), Some(1));
    }

    #[test]
    fn test_system_turn_never_duplicated_or_mutated() {
        let store = SessionStore::new();
        store.get_or_init("s1", 1, "prompt");
        store.append_user_turn("s1", "one").unwrap();
        store.append_assistant_turn("s1", "two").unwrap();
        store.append_user_turn("s1", "three").unwrap();

        let turns = store.snapshot("s1").unwrap();
        assert_eq!(turns[0], Turn::system("prompt"));
        let system_count = turns
            .iter()
            .filter(|turn| turn.role == Role::System)
            .count();
        assert_eq!(system_count, 1);
        assert_eq!(turns.len(), 4);
    }

    #[test]
    fn test_empty_question_rejected() {
        let store = SessionStore::new();
        store.get_or_init("s1", 1, "prompt");

        assert_eq!(
            store.append_user_turn("s1", "   "),
            Err(SessionError::EmptyInput)
        );
        assert_eq!(store.snapshot("s1").unwrap().len(), 1);
    }

    #[test]
    fn test_empty_answer_skipped() {
        let store = SessionStore::new();
        store.get_or_init("s1", 1, "prompt");

        store.append_assistant_turn("s1", "").unwrap();
        assert_eq!(store.snapshot("s1").unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_session() {
        let store = SessionStore::new();
        assert_eq!(
            store.append_user_turn("missing", "hi"),
            Err(SessionError::UnknownSession("missing".to_string()))
        );
        assert!(store.snapshot("missing").is_none());
        assert_eq!(store.estimate_size("missing"), 0);
    }

    #[test]
    fn test_reset_is_idempotent_and_clears_binding() {
        let store = SessionStore::new();
        store.get_or_init("s1", 1, "prompt");
        store.bind_chat("s1", 42).unwrap();
        assert_eq!(store.chat_id("s1"), Some(42));

        store.reset("s1");
        store.reset("s1");
        assert!(!store.contains("s1"));
        assert_eq!(store.chat_id("s1"), None);

        store.get_or_init("s1", 2, "fresh prompt");
        let turns = store.snapshot("s1").unwrap();
        assert_eq!(turns[0], Turn::system("fresh prompt"));
        assert_eq!(store.chat_id("s1"), None);
    }

    #[test]
    fn test_estimate_size_grows_with_turns() {
        let store = SessionStore::new();
        store.get_or_init("s1", 1, "abc");
        assert_eq!(store.estimate_size("s1"), 3);
        store.append_user_turn("s1", "defg").unwrap();
        assert_eq!(store.estimate_size("s1"), 7);
    }
}
