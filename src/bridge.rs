//! Conversation bridge
//!
//! Turns the current list and the user's request into a prompt and hands it
//! to the configured LLM client.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::llm::{self, ChatTurn, LlmClient, LlmConfig, ProviderError};
use crate::models::TaskNode;

/// Builds the prompt for a request against the current forest
///
/// An empty forest gets the bootstrap template, which asks the model to
/// originate a list. Anything else gets the update template, which embeds the
/// whole list so the model can return a full replacement.
pub fn build_prompt(forest: &[TaskNode], user_text: &str) -> String {
    if forest.is_empty() {
        return format!(
            r#"You are a meticulous personal assistant. Transform the following plans into a structured to-do list in JSON format.
- Output a JSON array of task objects with a "description" field.
- Break down broad goals into actionable tasks.
- Use "subtasks" for related subtasks, nesting as deep as needed.
- Include "priority" as "High", "Medium", or "Low".
- Include "completed": false for every task and subtask.
- Output JSON only.

User Input: "{}""#,
            user_text
        );
    }

    // Serializing plain data cannot fail
    let current = serde_json::to_string_pretty(forest).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"The current to-do list is:
```json
{}
```

User request: "{}"

CRITICAL RULES:
1. If the request implies a list change: output only the ENTIRE updated list as JSON and nothing else.
2. If the request is a question: output a plain text answer only."#,
        current, user_text
    )
}

/// Adapter between the session core and the LLM client
pub struct ConversationBridge {
    client: Arc<dyn LlmClient>,
    temperature: f32,
    timeout: Duration,
}

impl ConversationBridge {
    pub fn new(client: Arc<dyn LlmClient>, temperature: f32, timeout: Duration) -> Self {
        Self {
            client,
            temperature,
            timeout,
        }
    }

    /// Creates the provider client described by `config` and wraps it
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        let client = llm::create_client(config)?;
        Ok(Self::new(client, config.temperature, config.timeout))
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends one prompt after `history`; exactly one provider call, no retries
    pub async fn send(&self, history: &[ChatTurn], prompt: &str) -> Result<String, ProviderError> {
        debug!(
            history = history.len(),
            prompt_chars = prompt.len(),
            "send: calling provider"
        );

        let call = self.client.chat_complete(history, prompt, self.temperature);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.timeout, "send: provider call timed out");
                Err(ProviderError::Timeout(self.timeout))
            }
        }
    }
}
