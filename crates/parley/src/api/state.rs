//! Application state shared across handlers.

use std::sync::Arc;

use crate::chat::ChatRepository;
use crate::db::Database;
use crate::delivery::Mailbox;
use crate::llm::ProviderRegistry;
use crate::prompt::PromptRepository;
use crate::relay::Relay;
use crate::settings::DeliveryMode;
use crate::ws::RelayHub;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The streaming relay driving every turn.
    pub relay: Arc<Relay>,
    /// Prompt catalog access.
    pub prompts: PromptRepository,
    /// Transcript access.
    pub chats: ChatRepository,
    /// Model-to-provider routing.
    pub registry: Arc<ProviderRegistry>,
    /// Push-mode delivery hub (websocket edge).
    pub hub: Arc<RelayHub>,
    /// Pull-mode delivery queues (polling edge).
    pub mailbox: Arc<Mailbox>,
    /// Which delivery realization the relay publishes to.
    pub delivery_mode: DeliveryMode,
    /// Database handle for health checks.
    pub db: Database,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        relay: Arc<Relay>,
        prompts: PromptRepository,
        chats: ChatRepository,
        registry: Arc<ProviderRegistry>,
        hub: Arc<RelayHub>,
        mailbox: Arc<Mailbox>,
        delivery_mode: DeliveryMode,
        db: Database,
    ) -> Self {
        Self {
            relay,
            prompts,
            chats,
            registry,
            hub,
            mailbox,
            delivery_mode,
            db,
        }
    }
}
