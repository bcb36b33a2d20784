//! LLM provider integration.
//!
//! Each vendor adapter translates an ordered turn list plus generation
//! parameters into a vendor API call and yields a normalized stream of
//! [`DeltaChunk`]s: zero or more text deltas followed by exactly one
//! terminal [`DeltaChunk::End`]. Model routing goes through the
//! [`ProviderRegistry`], built once at startup from each adapter's
//! declared model set.

mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::session::Turn;

/// One fragment of a streamed answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaChunk {
    /// An incremental piece of answer text.
    Text(String),
    /// Terminal marker: the provider closed the stream.
    End { token_count: Option<u32> },
}

/// Generation parameters forwarded to the vendor API.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            max_tokens: 2000,
        }
    }
}

/// Failure of a provider call or of its delta stream.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("{vendor}: {cause}")]
    Upstream { vendor: &'static str, cause: String },

    #[error("{vendor}: no output within {}s", .timeout.as_secs())]
    Timeout {
        vendor: &'static str,
        timeout: Duration,
    },
}

impl ProviderError {
    pub fn upstream(vendor: &'static str, cause: impl Into<String>) -> Self {
        Self::Upstream {
            vendor,
            cause: cause.into(),
        }
    }

    pub fn vendor(&self) -> &'static str {
        match self {
            Self::Upstream { vendor, .. } | Self::Timeout { vendor, .. } => vendor,
        }
    }
}

/// A finite, single-pass stream of normalized deltas.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<DeltaChunk, ProviderError>> + Send>>;

/// Integration boundary to one vendor's completion API.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Short vendor tag used in logs and errors.
    fn vendor(&self) -> &'static str;

    /// Model identifiers this adapter serves.
    fn models(&self) -> &[String];

    /// Start a streamed completion over the full turn list.
    ///
    /// The returned stream yields text deltas in arrival order and a
    /// terminal [`DeltaChunk::End`] exactly once; it is not
    /// restartable.
    async fn stream_completion(
        &self,
        model: &str,
        turns: &[Turn],
        params: &GenerationParams,
    ) -> Result<DeltaStream, ProviderError>;
}

/// Model-to-adapter routing table, resolved once at startup.
pub struct ProviderRegistry {
    by_model: HashMap<String, Arc<dyn CompletionProvider>>,
}

impl ProviderRegistry {
    /// Build the routing table from the configured adapters.
    ///
    /// Adapters are not expected to claim overlapping models; if two
    /// do, the first registration wins and the clash is logged.
    pub fn new(providers: Vec<Arc<dyn CompletionProvider>>) -> Self {
        let mut by_model: HashMap<String, Arc<dyn CompletionProvider>> = HashMap::new();
        for provider in providers {
            for model in provider.models() {
                if let Some(existing) = by_model.get(model) {
                    warn!(
                        model,
                        kept = existing.vendor(),
                        ignored = provider.vendor(),
                        "model claimed by two providers"
                    );
                    continue;
                }
                by_model.insert(model.clone(), Arc::clone(&provider));
            }
        }
        Self { by_model }
    }

    /// The adapter serving `model`, if any.
    pub fn resolve(&self, model: &str) -> Option<Arc<dyn CompletionProvider>> {
        self.by_model.get(model).cloned()
    }

    /// All known model identifiers, sorted.
    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.by_model.keys().cloned().collect();
        models.sort();
        models
    }

    pub fn is_empty(&self) -> bool {
        self.by_model.is_empty()
    }
}
