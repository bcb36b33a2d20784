//! Runtime configuration.
//!
//! Settings come from an optional TOML file plus `PARLEY__`-prefixed
//! environment overrides. Provider API keys fall back to the
//! conventional `OPENAI_API_KEY` / `ANTHROPIC_API_KEY` variables; a
//! provider with no key is simply not registered.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::llm::GenerationParams;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Top-level runtime settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub delivery: DeliverySettings,
    pub generation: GenerationSettings,
    pub providers: ProviderSettings,
}

/// Server socket, storage location and placeholder identity.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub data_dir: Option<PathBuf>,
    /// Single-user placeholder stamped on chats and messages.
    pub user_id: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            data_dir: None,
            user_id: "b79cb3ba-745e-5d9a-8903-4a02327a7e09".to_string(),
        }
    }
}

/// Which delivery realization the relay publishes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Websocket events pushed as chunks arrive.
    #[default]
    Push,
    /// Per-session queues drained by a polling client.
    Pull,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    pub mode: DeliveryMode,
}

/// Generation parameters and stream patience.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Fail the turn if the provider produces no delta within this
    /// many seconds.
    pub first_delta_timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            max_tokens: 2000,
            first_delta_timeout_secs: 60,
        }
    }
}

/// Per-vendor adapter configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub openai: VendorSettings,
    pub anthropic: VendorSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VendorSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub models: Vec<String>,
}

impl VendorSettings {
    /// A vendor without an API key is not registered.
    pub fn enabled(&self) -> bool {
        self.api_key.is_some()
    }

    fn fill_defaults(&mut self, base_url: &str, models: &[&str]) {
        if self.base_url.is_empty() {
            self.base_url = base_url.to_string();
        }
        if self.models.is_empty() {
            self.models = models.iter().map(|m| m.to_string()).collect();
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        builder = match path {
            Some(path) => builder.add_source(File::from(path.to_path_buf())),
            None => builder.add_source(File::with_name("parley").required(false)),
        };
        builder = builder.add_source(Environment::with_prefix("PARLEY").separator("__"));

        let mut settings: Settings = builder
            .build()
            .context("loading configuration")?
            .try_deserialize()
            .context("parsing configuration")?;

        if settings.providers.openai.api_key.is_none() {
            settings.providers.openai.api_key = std::env::var("OPENAI_API_KEY").ok();
        }
        if settings.providers.anthropic.api_key.is_none() {
            settings.providers.anthropic.api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        }
        settings.fill_vendor_defaults();

        Ok(settings)
    }

    /// Apply per-vendor base URL and model-list defaults.
    pub fn fill_vendor_defaults(&mut self) {
        self.providers.openai.fill_defaults(
            DEFAULT_OPENAI_BASE_URL,
            &["gpt-4o", "gpt-4o-mini"],
        );
        self.providers.anthropic.fill_defaults(
            DEFAULT_ANTHROPIC_BASE_URL,
            &["claude-sonnet-4-20250514", "claude-3-5-haiku-20241022"],
        );
    }

    /// Directory holding the database file.
    pub fn data_dir(&self) -> PathBuf {
        match &self.server.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("parley"),
        }
    }

    /// Path of the SQLite database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("parley.db")
    }

    /// The socket address to bind.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .with_context(|| format!("invalid bind address: {}", self.server.bind))
    }

    /// Generation parameters forwarded to providers.
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.generation.temperature,
            max_tokens: self.generation.max_tokens,
        }
    }

    /// Patience before a silent provider call times out.
    pub fn first_delta_timeout(&self) -> Duration {
        Duration::from_secs(self.generation.first_delta_timeout_secs)
    }
}
