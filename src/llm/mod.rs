//! LLM client module
//!
//! Provides the provider-agnostic chat interface the conversation bridge talks
//! to, the per-session conversation handle, and the Gemini implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

mod error;
mod gemini;

pub use error::ProviderError;
pub use gemini::GeminiClient;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TEMPERATURE: f32 = 0.8;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Most turns a conversation keeps; always an even number of prompt/reply pairs
pub const HISTORY_LIMIT: usize = 40;

/// Who produced a turn of the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One message of the conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Per-session chat handle
///
/// Keeps the history the provider needs to answer follow-up requests in
/// context. Only complete prompt/reply pairs are ever recorded.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<ChatTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// Records a prompt and the reply it produced
    pub fn record(&mut self, prompt: impl Into<String>, reply: impl Into<String>) {
        self.turns.push(ChatTurn::user(prompt));
        self.turns.push(ChatTurn::model(reply));
        if self.turns.len() > HISTORY_LIMIT {
            let excess = self.turns.len() - HISTORY_LIMIT;
            self.turns.drain(..excess);
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// A chat-completion provider
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Sends `prompt` after `history` and returns the provider's reply text
    async fn chat_complete(
        &self,
        history: &[ChatTurn],
        prompt: &str,
        temperature: f32,
    ) -> Result<String, ProviderError>;
}

/// Provider configuration
#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LlmConfig {
    /// Returns the API key if one was supplied and is not blank
    pub fn api_key(&self) -> Result<&str, ProviderError> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(ProviderError::Configuration(
                "GEMINI_API_KEY is not set".to_string(),
            )),
        }
    }
}

/// Create the provider client described by `config`
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, ProviderError> {
    debug!(model = %config.model, base_url = %config.base_url, "create_client: called");
    Ok(Arc::new(GeminiClient::from_config(config)?))
}
