//! Provider error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the LLM provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider is not configured: {0}")]
    Configuration(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    /// Short, user-facing summary of the failure
    pub fn summary(&self) -> String {
        match self {
            ProviderError::Configuration(_) => "the AI provider is not configured".to_string(),
            ProviderError::Api { status: 401 | 403, .. } => {
                "the AI provider rejected the credentials".to_string()
            }
            ProviderError::Api { status: 429, .. } => {
                "the AI provider quota is exhausted, try again later".to_string()
            }
            ProviderError::Api { status, .. } => format!("the AI provider answered with HTTP {}", status),
            ProviderError::Network(_) => "the AI provider could not be reached".to_string(),
            ProviderError::Timeout(after) => {
                format!("the AI provider did not answer within {}s", after.as_secs())
            }
            ProviderError::InvalidResponse(_) | ProviderError::Json(_) => {
                "the AI provider sent an unusable reply".to_string()
            }
        }
    }
}
