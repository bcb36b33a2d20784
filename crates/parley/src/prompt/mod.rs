//! Prompt catalog: named system-prompt templates selectable at chat
//! creation time.

mod models;
mod repository;

pub use models::{NewPrompt, Prompt};
pub use repository::PromptRepository;
