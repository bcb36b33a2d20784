//! Anthropic messages adapter.
//!
//! The Anthropic API takes system content out-of-band: the leading
//! system turn is split into the `system` field and the remaining
//! turns become `messages`. SSE `content_block_delta` events carry the
//! answer text, `message_delta` the output token usage, and
//! `message_stop` closes the stream.

use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::{CompletionProvider, DeltaChunk, DeltaStream, GenerationParams, ProviderError};
use crate::session::{Role, Turn};

pub const VENDOR: &str = "anthropic";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Size of the channel buffering parsed deltas.
const DELTA_BUFFER_SIZE: usize = 64;

/// Adapter for the Anthropic messages API.
pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    models: Vec<String>,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: String, models: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            models,
        }
    }
}

/// Split a leading system turn out of the ordered turn list.
fn split_system(turns: &[Turn]) -> (Option<&str>, &[Turn]) {
    match turns.first() {
        Some(turn) if turn.role == Role::System => (Some(turn.content.as_str()), &turns[1..]),
        _ => (None, turns),
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<EventDelta>,
    #[serde(default)]
    usage: Option<EventUsage>,
    #[serde(default)]
    error: Option<EventError>,
}

#[derive(Debug, Deserialize)]
struct EventDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventUsage {
    #[serde(default)]
    output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct EventError {
    #[serde(default)]
    message: String,
}

/// Translate one SSE data payload.
///
/// Returns `None` for events that carry no answer text (pings, block
/// boundaries, tool-input deltas); `message_delta` usage is remembered
/// in `token_count` so `message_stop` can report it.
fn parse_event(
    data: &str,
    token_count: &mut Option<u32>,
) -> Result<Option<DeltaChunk>, ProviderError> {
    let event: StreamEvent = serde_json::from_str(data)
        .map_err(|e| ProviderError::upstream(VENDOR, format!("malformed stream event: {e}")))?;

    match event.kind.as_str() {
        "content_block_delta" => {
            let text = event.delta.and_then(|delta| delta.text);
            match text {
                Some(text) if !text.is_empty() => Ok(Some(DeltaChunk::Text(text))),
                _ => Ok(None),
            }
        }
        "message_delta" => {
            if let Some(usage) = event.usage {
                if usage.output_tokens.is_some() {
                    *token_count = usage.output_tokens;
                }
            }
            Ok(None)
        }
        "message_stop" => Ok(Some(DeltaChunk::End {
            token_count: token_count.take(),
        })),
        "error" => {
            let message = event
                .error
                .map(|error| error.message)
                .unwrap_or_else(|| "unknown vendor error".to_string());
            Err(ProviderError::upstream(VENDOR, message))
        }
        _ => Ok(None),
    }
}

/// Consume the SSE connection, forwarding normalized deltas.
async fn forward(mut source: EventSource, tx: mpsc::Sender<Result<DeltaChunk, ProviderError>>) {
    let mut token_count = None;

    while let Some(event) = source.next().await {
        match event {
            Ok(Event::Open) => {
                debug!("anthropic stream opened");
            }
            Ok(Event::Message(message)) => match parse_event(&message.data, &mut token_count) {
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
                        "stream ended before message_stop",
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
impl CompletionProvider for AnthropicProvider {
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
        let (system, rest) = split_system(turns);

        let body = MessagesRequest {
            model,
            system,
            messages: rest
                .iter()
                .map(|turn| WireMessage {
                    role: match turn.role {
                        Role::Assistant => "assistant",
                        _ => "user",
                    },
                    content: &turn.content,
                })
                .collect(),
            stream: true,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);

        let source = EventSource::new(request)
            .map_err(|e| ProviderError::upstream(VENDOR, e.to_string()))?;

        let (tx, rx) = mpsc::channel(DELTA_BUFFER_SIZE);
        tokio::spawn(forward(source, tx));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_leading_system_turn() {
        let turns = vec![Turn::system("be brief"), Turn::user("hi")];
        let (system, rest) = split_system(&turns);
        assert_eq!(system, Some("be brief"));
        assert_eq!(rest, &turns[1..]);
    }

    #[test]
    fn test_split_without_system_turn() {
        let turns = vec![Turn::user("hi")];
        let (system, rest) = split_system(&turns);
        assert_eq!(system, None);
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn test_parse_text_delta() {
        let mut tokens = None;
        let chunk = parse_event(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
            &mut tokens,
        )
        .unwrap();
        assert_eq!(chunk, Some(DeltaChunk::Text("Hel".to_string())));
    }

    #[test]
    fn test_parse_tool_input_delta_yields_nothing() {
        let mut tokens = None;
        let chunk = parse_event(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"a\""}}"#,
            &mut tokens,
        )
        .unwrap();
        assert_eq!(chunk, None);
    }

    #[test]
    fn test_message_delta_then_stop_reports_tokens() {
        let mut tokens = None;
        let chunk = parse_event(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":21}}"#,
            &mut tokens,
        )
        .unwrap();
        assert_eq!(chunk, None);
        assert_eq!(tokens, Some(21));

        let end = parse_event(r#"{"type":"message_stop"}"#, &mut tokens).unwrap();
        assert_eq!(
            end,
            Some(DeltaChunk::End {
                token_count: Some(21)
            })
        );
    }

    #[test]
    fn test_ping_yields_nothing() {
        let mut tokens = None;
        assert_eq!(parse_event(r#"{"type":"ping"}"#, &mut tokens).unwrap(), None);
    }

    #[test]
    fn test_error_event_fails_the_stream() {
        let mut tokens = None;
        let err = parse_event(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
            &mut tokens,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "anthropic: Overloaded");
    }
}
