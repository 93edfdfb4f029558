//! API client module
//!
//! This module provides HTTP client functionality to interact with the taskchat API server.

use std::sync::Arc;

use reqwest::{Client as ReqwestClient, Error as ReqwestError, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::api::server::{CompleteRequest, SubmitRequest, SubmitResponse, SubtaskRequest};
use crate::models::{format_index, Index};
use crate::session::{SessionId, SessionSummary, SessionView};

/// API client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Generic API response structure
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] ReqwestError),

    #[error("API error: {0}")]
    Api(String),

    #[error("Missing data in response")]
    MissingData,
}

/// API client for the taskchat service
#[derive(Debug, Clone)]
pub struct Client {
    http_client: Arc<ReqwestClient>,
    config: ClientConfig,
}

impl Client {
    /// Create a new client with default configuration
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Create a new client with custom configuration
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            http_client: Arc::new(ReqwestClient::new()),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn session_url(&self, id: SessionId, suffix: &str) -> String {
        self.url(&format!("/api/sessions/{}{}", id, suffix))
    }

    /// Unwraps the `{success, data, error}` envelope, whatever the status code
    async fn read<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let status = response.status();
        let api_response: ApiResponse<T> = match response.json().await {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(ClientError::Api(format!("HTTP error: {}", status)))
            }
            Err(e) => return Err(ClientError::Http(e)),
        };

        if api_response.success {
            api_response.data.ok_or(ClientError::MissingData)
        } else {
            Err(ClientError::Api(
                api_response
                    .error
                    .unwrap_or_else(|| "Unknown API error".to_string()),
            ))
        }
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let response = self.http_client.post(url).json(body).send().await?;
        Self::read(response).await
    }

    /// List all sessions
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ClientError> {
        let response = self.http_client.get(self.url("/api/sessions")).send().await?;
        Self::read(response).await
    }

    /// Create a new, empty session
    pub async fn create_session(&self) -> Result<SessionView, ClientError> {
        let response = self.http_client.post(self.url("/api/sessions")).send().await?;
        Self::read(response).await
    }

    /// Get a snapshot of a session
    pub async fn get_session(&self, id: SessionId) -> Result<SessionView, ClientError> {
        let response = self.http_client.get(self.session_url(id, "")).send().await?;
        Self::read(response).await
    }

    /// Delete a session
    pub async fn delete_session(&self, id: SessionId) -> Result<SessionId, ClientError> {
        let response = self
            .http_client
            .delete(self.session_url(id, ""))
            .send()
            .await?;
        Self::read(response).await
    }

    /// Send free text to the assistant
    pub async fn submit(&self, id: SessionId, text: String) -> Result<SubmitResponse, ClientError> {
        self.post_json(&self.session_url(id, "/submit"), &SubmitRequest { text })
            .await
    }

    /// Clear the list and the conversation
    pub async fn reset(&self, id: SessionId) -> Result<SessionView, ClientError> {
        let response = self
            .http_client
            .post(self.session_url(id, "/reset"))
            .send()
            .await?;
        Self::read(response).await
    }

    /// Mark the task at `path` as completed or not
    pub async fn set_completed(
        &self,
        id: SessionId,
        path: Index,
        completed: bool,
    ) -> Result<SessionView, ClientError> {
        self.post_json(
            &self.session_url(id, "/tasks/complete"),
            &CompleteRequest { path, completed },
        )
        .await
    }

    /// Append a subtask under the task at `path`
    pub async fn add_subtask(
        &self,
        id: SessionId,
        path: Index,
        text: String,
    ) -> Result<SessionView, ClientError> {
        self.post_json(
            &self.session_url(id, "/tasks/subtask"),
            &SubtaskRequest { path, text },
        )
        .await
    }

    /// Remove the task at `path` and its subtree
    pub async fn delete_task(&self, id: SessionId, path: &[usize]) -> Result<SessionView, ClientError> {
        let url = self.session_url(id, &format!("/tasks/{}", format_index(path)));
        let response = self.http_client.delete(url).send().await?;
        Self::read(response).await
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}
