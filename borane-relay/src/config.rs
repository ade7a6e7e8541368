use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::RelayError;

/// Model name markers indicating vision support.
const VISION_MODEL_MARKERS: &[&str] = &["gpt-4o", "claude-3", "gemini", "pixtral", "llava", "vision"];

/// Bearer token sent to endpoints that require none (local servers).
const KEYLESS_API_KEY: &str = "sk-no-key-required";

fn default_max_message_nodes() -> usize {
    100
}

fn default_edit_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl ProviderConfig {
    /// Resolves the API key for a provider.
    ///
    /// The `{PROVIDER}_API_KEY` environment variable wins over the
    /// configured key; with neither set, a placeholder token is used so
    /// keyless local endpoints still get a well-formed header.
    pub fn resolve_api_key(&self, provider: &str) -> String {
        let env_name = format!("{}_API_KEY", provider.to_uppercase().replace('-', "_"));
        if let Ok(key) = std::env::var(&env_name) {
            if !key.is_empty() {
                return key;
            }
        }
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return key.clone();
            }
        }
        KEYLESS_API_KEY.to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Target model as `provider/model`.
    pub model: String,
    pub providers: HashMap<String, ProviderConfig>,

    /// Empty means no channel filter.
    #[serde(default)]
    pub allowed_channel_ids: Vec<u64>,
    /// Empty means no role filter.
    #[serde(default)]
    pub allowed_role_ids: Vec<u64>,

    pub max_text: usize,
    pub max_images: usize,
    pub max_messages: usize,

    #[serde(default)]
    pub use_plain_responses: bool,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub extra_api_parameters: Map<String, Value>,

    #[serde(default = "default_max_message_nodes")]
    pub max_message_nodes: usize,
    #[serde(default = "default_edit_interval_ms")]
    pub edit_interval_ms: u64,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Splits the configured model into its provider and model name.
    pub fn provider_and_model(&self) -> (&str, &str) {
        self.model
            .split_once('/')
            .unwrap_or(("", self.model.as_str()))
    }

    pub fn model_name(&self) -> &str {
        self.provider_and_model().1
    }

    pub fn accepts_images(&self) -> bool {
        VISION_MODEL_MARKERS
            .iter()
            .any(|marker| self.model.contains(marker))
    }

    /// Whether the target model accepts per-message author identity.
    pub fn accepts_names(&self) -> bool {
        self.model.contains("openai/")
    }

    /// The image budget actually applied: zero for models without vision.
    pub fn effective_max_images(&self) -> usize {
        if self.accepts_images() {
            self.max_images
        } else {
            0
        }
    }
}
