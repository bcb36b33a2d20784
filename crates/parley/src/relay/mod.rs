//! Streaming relay: the turn orchestrator.
//!
//! A turn moves through accept -> persist question -> provider stream
//! -> finalize. The submit path returns as soon as the provider stream
//! is initiated; a spawned worker consumes the deltas, fans each one
//! out to the session's delivery channel in arrival order, and records
//! the completed answer. At most one turn is in flight per session;
//! sessions are independent of one another.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::chat::{ChatRepository, MessageKind, NewChat, NewMessage};
use crate::delivery::{DeliveryChannel, StreamSignal};
use crate::llm::{
    CompletionProvider, DeltaChunk, DeltaStream, GenerationParams, ProviderError, ProviderRegistry,
};
use crate::prompt::PromptRepository;
use crate::session::{SessionError, SessionStore};

/// Relay-level tuning and identity.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Placeholder identity stamped on chats and messages (real
    /// authentication is out of scope).
    pub user_id: String,
    /// Generation parameters forwarded to every provider call.
    pub params: GenerationParams,
    /// A provider that produces no delta within this window fails the
    /// turn with a timeout.
    pub first_delta_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            user_id: "b79cb3ba-745e-5d9a-8903-4a02327a7e09".to_string(),
            params: GenerationParams::default(),
            first_delta_timeout: Duration::from_secs(60),
        }
    }
}

/// A user turn submitted for one session.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    pub session_id: String,
    pub prompt_id: i64,
    pub model: String,
    pub question: String,
}

/// Acknowledgement returned once the stream is initiated.
#[derive(Debug, Clone, Serialize)]
pub struct TurnAccepted {
    pub session_id: String,
    pub chat_id: i64,
}

/// Why a turn was rejected or failed.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("question must not be empty")]
    InvalidInput,

    #[error("prompt {0} not found")]
    PromptNotFound(i64),

    #[error("no provider serves model {0:?}")]
    UnknownModel(String),

    #[error("session {0} already has a turn in flight")]
    SessionBusy(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("transcript write failed")]
    Persistence(#[source] anyhow::Error),
}

impl RelayError {
    /// Short message safe for the transport boundary; details stay in
    /// the server log.
    pub fn public_message(&self) -> String {
        match self {
            RelayError::Provider(_) => "the model provider failed to answer".to_string(),
            RelayError::Persistence(_) => "failed to record the conversation".to_string(),
            other => other.to_string(),
        }
    }
}

/// The conversation-turn orchestrator.
pub struct Relay {
    store: Arc<SessionStore>,
    prompts: PromptRepository,
    chats: ChatRepository,
    registry: Arc<ProviderRegistry>,
    delivery: Arc<dyn DeliveryChannel>,
    /// Sessions with a turn in flight.
    active: Arc<DashMap<String, ()>>,
    config: RelayConfig,
}

impl Relay {
    pub fn new(
        store: Arc<SessionStore>,
        prompts: PromptRepository,
        chats: ChatRepository,
        registry: Arc<ProviderRegistry>,
        delivery: Arc<dyn DeliveryChannel>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            prompts,
            chats,
            registry,
            delivery,
            active: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Whether the session has a turn in flight.
    pub fn is_busy(&self, session_id: &str) -> bool {
        self.active.contains_key(session_id)
    }

    /// Accept a user turn and initiate the answer stream.
    ///
    /// Returns once the question is recorded and the provider stream
    /// is issued; deltas are then delivered asynchronously through the
    /// session's delivery channel, ending with an `end` or `error`
    /// signal.
    pub async fn submit_turn(&self, request: TurnRequest) -> Result<TurnAccepted, RelayError> {
        if request.question.trim().is_empty() {
            return Err(RelayError::InvalidInput);
        }
        let provider = self
            .registry
            .resolve(&request.model)
            .ok_or_else(|| RelayError::UnknownModel(request.model.clone()))?;

        // One turn per session: the slot is taken for the whole span
        // and released by the streaming worker (or below, on a failed
        // start).
        match self.active.entry(request.session_id.clone()) {
            Entry::Occupied(_) => {
                return Err(RelayError::SessionBusy(request.session_id.clone()));
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        match self.begin_turn(&request, provider.as_ref()).await {
            Ok((chat_id, stream)) => {
                info!(
                    session_id = %request.session_id,
                    chat_id,
                    model = %request.model,
                    "question accepted, streaming answer"
                );
                let worker = StreamWorker {
                    store: Arc::clone(&self.store),
                    chats: self.chats.clone(),
                    delivery: Arc::clone(&self.delivery),
                    active: Arc::clone(&self.active),
                    user_id: self.config.user_id.clone(),
                    first_delta_timeout: self.config.first_delta_timeout,
                };
                let session_id = request.session_id.clone();
                let vendor = provider.vendor();
                tokio::spawn(worker.run(session_id, chat_id, vendor, stream));
                Ok(TurnAccepted {
                    session_id: request.session_id,
                    chat_id,
                })
            }
            Err(e) => {
                self.active.remove(&request.session_id);
                Err(e)
            }
        }
    }

    /// Validate, persist the question, and issue the provider call.
    async fn begin_turn(
        &self,
        request: &TurnRequest,
        provider: &dyn CompletionProvider,
    ) -> Result<(i64, DeltaStream), RelayError> {
        let session_id = &request.session_id;

        // An existing context keeps the prompt it was seeded with; the
        // requested prompt only applies to a fresh session.
        let prompt_id = self
            .store
            .prompt_id(session_id)
            .unwrap_or(request.prompt_id);
        let prompt = self
            .prompts
            .get(prompt_id)
            .await
            .map_err(RelayError::Persistence)?
            .ok_or(RelayError::PromptNotFound(prompt_id))?;

        self.store.get_or_init(session_id, prompt.id, &prompt.text);

        // The first persisted turn of a session creates its chat row.
        let chat_id = match self.store.chat_id(session_id) {
            Some(id) => id,
            None => {
                let id = self
                    .chats
                    .create_chat(NewChat {
                        user_id: self.config.user_id.clone(),
                        model: request.model.clone(),
                        prompt_id: prompt.id,
                        prompt_title: prompt.title.clone(),
                        prompt_text: prompt.text.clone(),
                    })
                    .await
                    .map_err(RelayError::Persistence)?;
                self.store
                    .bind_chat(session_id, id)
                    .map_err(|e| RelayError::Persistence(anyhow::Error::new(e)))?;
                info!(session_id = %session_id, chat_id = id, "created chat");
                id
            }
        };

        // The question is recorded before any provider spend; if this
        // write fails the context stays untouched and no call is made.
        self.chats
            .append_message(NewMessage {
                chat_id,
                user_id: self.config.user_id.clone(),
                content: request.question.clone(),
                kind: MessageKind::Question,
            })
            .await
            .map_err(RelayError::Persistence)?;

        self.store
            .append_user_turn(session_id, &request.question)
            .map_err(|e| match e {
                SessionError::EmptyInput => RelayError::InvalidInput,
                e @ SessionError::UnknownSession(_) => {
                    RelayError::Persistence(anyhow::Error::new(e))
                }
            })?;

        let turns = self.store.snapshot(session_id).ok_or_else(|| {
            RelayError::Persistence(anyhow::anyhow!("session context vanished mid-turn"))
        })?;
        debug!(
            session_id = %session_id,
            context_chars = self.store.estimate_size(session_id),
            "context ready for provider"
        );

        let stream = provider
            .stream_completion(&request.model, &turns, &self.config.params)
            .await?;
        Ok((chat_id, stream))
    }

    /// Clear the session's context, chat binding, and pending delivery
    /// state. Idempotent; the next question starts a new chat.
    pub fn reset(&self, session_id: &str) {
        self.store.reset(session_id);
        self.delivery.forget_session(session_id);
        info!(session_id = %session_id, "session reset");
    }
}

/// Owns one in-flight answer stream from first delta to finalization.
struct StreamWorker {
    store: Arc<SessionStore>,
    chats: ChatRepository,
    delivery: Arc<dyn DeliveryChannel>,
    active: Arc<DashMap<String, ()>>,
    user_id: String,
    first_delta_timeout: Duration,
}

impl StreamWorker {
    /// Drive the stream to completion, then release the session slot.
    async fn run(self, session_id: String, chat_id: i64, vendor: &'static str, stream: DeltaStream) {
        match self.consume(&session_id, vendor, stream).await {
            Ok((answer, token_count)) => {
                self.finalize(&session_id, chat_id, answer, token_count).await;
            }
            Err(e) => {
                // Chunks already forwarded stay delivered; no assistant
                // turn is committed anywhere.
                error!(
                    session_id = %session_id,
                    chat_id,
                    vendor = e.vendor(),
                    error = %e,
                    "provider stream failed"
                );
                self.delivery
                    .publish(
                        &session_id,
                        StreamSignal::Error {
                            message: "the model provider failed to answer".to_string(),
                        },
                    )
                    .await;
            }
        }
        self.active.remove(&session_id);
    }

    /// Forward deltas in arrival order while accumulating the answer.
    async fn consume(
        &self,
        session_id: &str,
        vendor: &'static str,
        mut stream: DeltaStream,
    ) -> Result<(String, Option<u32>), ProviderError> {
        let mut answer = String::new();
        let mut awaiting_first = true;

        loop {
            let item = if awaiting_first {
                match tokio::time::timeout(self.first_delta_timeout, stream.next()).await {
                    Ok(item) => item,
                    Err(_) => {
                        return Err(ProviderError::Timeout {
                            vendor,
                            timeout: self.first_delta_timeout,
                        });
                    }
                }
            } else {
                stream.next().await
            };

            match item {
                Some(Ok(DeltaChunk::Text(text))) => {
                    awaiting_first = false;
                    answer.push_str(&text);
                    self.delivery
                        .publish(session_id, StreamSignal::Chunk { text })
                        .await;
                }
                Some(Ok(DeltaChunk::End { token_count })) => return Ok((answer, token_count)),
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(ProviderError::upstream(
                        vendor,
                        "stream closed without end marker",
                    ));
                }
            }
        }
    }

    /// Record the completed answer and signal end of stream.
    async fn finalize(
        &self,
        session_id: &str,
        chat_id: i64,
        answer: String,
        token_count: Option<u32>,
    ) {
        if answer.is_empty() {
            info!(session_id = %session_id, chat_id, "stream produced no output; nothing recorded");
        } else {
            if let Err(e) = self.store.append_assistant_turn(session_id, &answer) {
                warn!(
                    session_id = %session_id,
                    error = %e,
                    "context gone before the answer could be appended"
                );
            }
            if let Err(e) = self
                .chats
                .append_message(NewMessage {
                    chat_id,
                    user_id: self.user_id.clone(),
                    content: answer,
                    kind: MessageKind::Answer,
                })
                .await
            {
                // Delivered output stands; only the stored transcript
                // is now behind what the client saw.
                error!(
                    session_id = %session_id,
                    chat_id,
                    error = %e,
                    "failed to persist answer"
                );
            }
        }

        debug!(
            session_id = %session_id,
            context_chars = self.store.estimate_size(session_id),
            "turn finished"
        );
        self.delivery
            .publish(session_id, StreamSignal::End { token_count })
            .await;
    }
}
