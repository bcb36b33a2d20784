//! OpenAI chat-completions adapter.
//!
//! Sends the full ordered turn list (system turn inline) to
//! `POST {base_url}/chat/completions` with `stream: true` and
//! translates the SSE response into normalized deltas. The `[DONE]`
//! frame becomes the terminal [`DeltaChunk::End`]; the usage frame
//! requested via `stream_options` supplies the token count.

use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::{CompletionProvider, DeltaChunk, DeltaStream, GenerationParams, ProviderError};
use crate::session::Turn;

pub const VENDOR: &str = "openai";

/// Size of the channel buffering parsed deltas.
const DELTA_BUFFER_SIZE: usize = 64;

/// Adapter for the OpenAI chat-completions API.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    models: Vec<String>,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: String, models: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            models,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    stream_options: StreamOptions,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    completion_tokens: Option<u32>,
}

/// Translate one SSE data frame.
///
/// Returns `None` for frames that carry no answer text (role prelude,
/// usage-only frames); the usage frame's token count is remembered in
/// `token_count` so the `[DONE]` sentinel can report it.
fn parse_frame(
    data: &str,
    token_count: &mut Option<u32>,
) -> Result<Option<DeltaChunk>, ProviderError> {
    if data.trim() == "[DONE]" {
        return Ok(Some(DeltaChunk::End {
            token_count: token_count.take(),
        }));
    }

    let frame: StreamFrame = serde_json::from_str(data)
        .map_err(|e| ProviderError::upstream(VENDOR, format!("malformed stream frame: {e}")))?;

    if let Some(usage) = frame.usage {
        if usage.completion_tokens.is_some() {
            *token_count = usage.completion_tokens;
        }
    }

    let text = frame
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content);

    match text {
        Some(text) if !text.is_empty() => Ok(Some(DeltaChunk::Text(text))),
        _ => Ok(None),
    }
}

/// Consume the SSE connection, forwarding normalized deltas.
async fn forward(mut source: EventSource, tx: mpsc::Sender<Result<DeltaChunk, ProviderError>>) {
    let mut token_count = None;

    while let Some(event) = source.next().await {
        match event {
            Ok(Event::Open) => {
                debug!("openai stream opened");
            }
            Ok(Event::Message(message)) => match parse_frame(&message.data, &mut token_count) {
                Ok(None) => {}
                Ok(Some(chunk)) => {
                    let done = matches!(chunk, DeltaChunk::End { .. });
                    if tx.send(Ok(chunk)).await.is_err() || done {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            },
            Err(reqwest_eventsource::Error::StreamEnded) => {
                let _ = tx
                    .send(Err(ProviderError::upstream(
                        VENDOR,
                        "stream ended before completion marker",
                    )))
                    .await;
                break;
            }
            Err(e) => {
                let _ = tx
                    .send(Err(ProviderError::upstream(VENDOR, e.to_string())))
                    .await;
                break;
            }
        }
    }

    source.close();
}

#[async_trait::async_trait]
impl CompletionProvider for OpenAiProvider {
    fn vendor(&self) -> &'static str {
        VENDOR
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    async fn stream_completion(
        &self,
        model: &str,
        turns: &[Turn],
        params: &GenerationParams,
    ) -> Result<DeltaStream, ProviderError> {
        let body = ChatRequest {
            model,
            messages: turns
                .iter()
                .map(|turn| WireMessage {
                    role: match turn.role {
                        crate::session::Role::System => "system",
                        crate::session::Role::User => "user",
                        crate::session::Role::Assistant => "assistant",
                    },
                    content: &turn.content,
                })
                .collect(),
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body);

        let source = EventSource::new(request)
            .map_err(|e| ProviderError::upstream(VENDOR, e.to_string()))?;

        let (tx, rx) = mpsc::channel(DELTA_BUFFER_SIZE);
        tokio::spawn(forward(source, tx));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
