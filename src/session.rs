//! Session core
//!
//! Every handler receives a [`Core`], the shared registry of isolated chat
//! sessions. A session owns its forest, its conversation with the provider,
//! and the bits of state the presentation loop surfaces to the user.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::bridge::{build_prompt, ConversationBridge};
use crate::interpret::{interpret, Interpretation};
use crate::llm::{ChatTurn, Conversation, ProviderError};
use crate::models::{self, aggregate, format_index, Forest, Index, Progress, TaskNode, TreeError};

/// Number of activity entries kept per session
pub const ACTIVITY_LIMIT: usize = 20;

/// Default number of sessions kept before idle ones are evicted
pub const SESSION_LIMIT: usize = 256;

pub const LIST_UPDATED: &str = "Your to-do list has been updated!";
pub const EMPTY_REQUEST: &str = "Please enter something.";

/// Opaque identifier of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u32);

impl SessionId {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Success,
    Warning,
    Error,
}

/// The last outcome worth telling the user about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusNote {
    pub level: StatusLevel,
    pub text: String,
}

impl StatusNote {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Success,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Warning,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Error,
            text: text.into(),
        }
    }
}

/// One line of a session's recent activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub details: String,
}

/// State of a single session
#[derive(Debug, Clone)]
pub struct Session {
    forest: Forest,
    conversation: Conversation,
    last_message: Option<String>,
    status: Option<StatusNote>,
    busy: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    activity: VecDeque<ActivityEntry>,
}

impl Session {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            forest: Vec::new(),
            conversation: Conversation::new(),
            last_message: None,
            status: None,
            busy: false,
            created_at: now,
            updated_at: now,
            activity: VecDeque::with_capacity(ACTIVITY_LIMIT),
        }
    }

    fn log(&mut self, action: &str, details: impl Into<String>) {
        if self.activity.len() == ACTIVITY_LIMIT {
            self.activity.pop_front();
        }
        self.activity.push_back(ActivityEntry {
            timestamp: Utc::now(),
            action: action.to_string(),
            details: details.into(),
        });
    }

    fn view(&self, id: SessionId) -> SessionView {
        SessionView {
            id,
            forest: self.forest.clone(),
            message: self.last_message.clone(),
            status: self.status.clone(),
            progress: aggregate(&self.forest),
            busy: self.busy,
            turns: self.conversation.len(),
            history: self.activity.iter().cloned().collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn summary(&self, id: SessionId) -> SessionSummary {
        SessionSummary {
            id,
            title: self.forest.first().map(|t| t.description().to_string()),
            progress: aggregate(&self.forest),
            busy: self.busy,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Snapshot of a session handed to renderers and API clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub id: SessionId,
    pub forest: Vec<TaskNode>,
    pub message: Option<String>,
    pub status: Option<StatusNote>,
    pub progress: Progress,
    pub busy: bool,
    /// Number of recorded conversation turns
    pub turns: usize,
    /// Recent activity, oldest first
    pub history: Vec<ActivityEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    /// Description of the first top-level task, if any
    pub title: Option<String>,
    pub progress: Progress,
    pub busy: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a successful submission did to the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Replaced { progress: Progress },
    Answered { message: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session '{0}' not found")]
    SessionNotFound(SessionId),

    #[error("{0}")]
    Validation(String),

    #[error("No task at index {}", format_index(.0))]
    NotFound(Index),

    #[error("Session '{0}' is still waiting for the assistant")]
    Busy(SessionId),

    #[error("AI provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl From<TreeError> for SessionError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::NotFound(index) => SessionError::NotFound(index),
            TreeError::EmptyText => SessionError::Validation(err.to_string()),
        }
    }
}

struct Registry {
    sessions: HashMap<SessionId, Session>,
    rng: StdRng,
}

impl Registry {
    /// Removes the idle session that changed least recently
    fn evict_idle(&mut self) -> Option<SessionId> {
        let oldest = self
            .sessions
            .iter()
            .filter(|(_, session)| !session.busy)
            .min_by_key(|(_, session)| session.updated_at)
            .map(|(id, _)| *id)?;
        self.sessions.remove(&oldest);
        Some(oldest)
    }
}

/// Shared handle to every session and the provider bridge
#[derive(Clone)]
pub struct Core {
    inner: Arc<Mutex<Registry>>,
    bridge: Arc<ConversationBridge>,
    update_tx: Arc<broadcast::Sender<SessionId>>,
    session_limit: usize,
}

impl Core {
    pub fn new(bridge: ConversationBridge) -> Self {
        let (tx, _rx) = broadcast::channel(100);

        Self {
            inner: Arc::new(Mutex::new(Registry {
                sessions: HashMap::new(),
                rng: StdRng::from_entropy(),
            })),
            bridge: Arc::new(bridge),
            update_tx: Arc::new(tx),
            session_limit: SESSION_LIMIT,
        }
    }

    /// Caps how many sessions are kept. Busy sessions are never evicted.
    pub fn with_session_limit(mut self, limit: usize) -> Self {
        self.session_limit = limit.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self, id: SessionId) {
        // No subscribers is fine
        let _ = self.update_tx.send(id);
    }

    /// Runs `f` against a session, then stamps it and tells observers it changed
    fn with_session<F, R>(&self, id: SessionId, f: F) -> Result<R, SessionError>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let result = {
            let mut registry = self.lock();
            let session = registry
                .sessions
                .get_mut(&id)
                .ok_or(SessionError::SessionNotFound(id))?;
            let result = f(session);
            session.updated_at = Utc::now();
            result
        };

        self.notify(id);
        Ok(result)
    }

    /// Subscribe to the ids of sessions that changed
    pub fn subscribe(&self) -> broadcast::Receiver<SessionId> {
        self.update_tx.subscribe()
    }

    pub fn create_session(&self) -> SessionId {
        let mut evicted = Vec::new();
        let id = {
            let mut registry = self.lock();
            while registry.sessions.len() >= self.session_limit {
                match registry.evict_idle() {
                    Some(old) => evicted.push(old),
                    None => break,
                }
            }
            let id = loop {
                let candidate = SessionId(registry.rng.gen::<u32>());
                if !registry.sessions.contains_key(&candidate) {
                    break candidate;
                }
            };
            let mut session = Session::new();
            session.log("create", "Started a new list");
            registry.sessions.insert(id, session);
            id
        };

        for old in evicted {
            info!(session = %old, "create_session: evicted idle session");
            self.notify(old);
        }
        info!(session = %id, "create_session: created");
        self.notify(id);
        id
    }

    /// Lists every session, oldest first
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let registry = self.lock();
        let mut summaries: Vec<SessionSummary> = registry
            .sessions
            .iter()
            .map(|(id, session)| session.summary(*id))
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        summaries
    }

    pub fn delete_session(&self, id: SessionId) -> Result<SessionId, SessionError> {
        let removed = self.lock().sessions.remove(&id);
        match removed {
            Some(_) => {
                info!(session = %id, "delete_session: deleted");
                self.notify(id);
                Ok(id)
            }
            None => Err(SessionError::SessionNotFound(id)),
        }
    }

    pub fn view(&self, id: SessionId) -> Result<SessionView, SessionError> {
        let registry = self.lock();
        registry
            .sessions
            .get(&id)
            .map(|session| session.view(id))
            .ok_or(SessionError::SessionNotFound(id))
    }

    /// Applies a direct edit to the forest
    ///
    /// A failed edit leaves the forest as it was and records a warning.
    fn edit<F>(&self, id: SessionId, action: &str, f: F) -> Result<SessionView, SessionError>
    where
        F: FnOnce(&mut Forest) -> Result<String, TreeError>,
    {
        self.with_session(id, |session| match f(&mut session.forest) {
            Ok(details) => {
                debug!(session = %id, action, %details, "edit: applied");
                session.status = None;
                session.log(action, details);
                Ok(session.view(id))
            }
            Err(err) => {
                warn!(session = %id, action, error = %err, "edit: rejected");
                session.status = Some(StatusNote::warning(err.to_string()));
                Err(SessionError::from(err))
            }
        })?
    }

    pub fn set_completed(
        &self,
        id: SessionId,
        index: &[usize],
        completed: bool,
    ) -> Result<SessionView, SessionError> {
        let action = if completed { "check" } else { "uncheck" };
        self.edit(id, action, |forest| {
            models::set_completed(forest, index, completed)?;
            Ok(describe_task(forest, index))
        })
    }

    pub fn add_subtask(
        &self,
        id: SessionId,
        index: &[usize],
        text: &str,
    ) -> Result<SessionView, SessionError> {
        self.edit(id, "add", |forest| {
            let new_index = models::add_subtask(forest, index, text)?;
            Ok(describe_task(forest, &new_index))
        })
    }

    pub fn delete_node(&self, id: SessionId, index: &[usize]) -> Result<SessionView, SessionError> {
        self.edit(id, "delete", |forest| {
            let removed = models::delete_node(forest, index)?;
            Ok(format!("{} ({})", removed.description(), format_index(index)))
        })
    }

    /// Replaces the whole forest, as if the assistant had produced it
    pub fn replace_forest(&self, id: SessionId, forest: Forest) -> Result<SessionView, SessionError> {
        self.with_session(id, |session| {
            let progress = aggregate(&forest);
            session.forest = forest;
            session.log("replace", format!("{} tasks loaded", progress.total));
            session.view(id)
        })
    }

    /// Clears the forest, message, status and conversation history
    pub fn reset(&self, id: SessionId) -> Result<SessionView, SessionError> {
        self.with_session(id, |session| {
            if session.busy {
                return Err(SessionError::Busy(id));
            }
            session.forest.clear();
            session.conversation.clear();
            session.last_message = None;
            session.status = None;
            session.log("reset", "Cleared the list and conversation");
            Ok(session.view(id))
        })?
    }

    /// Sends a natural-language request to the assistant and applies its reply
    pub async fn submit(&self, id: SessionId, text: &str) -> Result<SubmitOutcome, SessionError> {
        if text.trim().is_empty() {
            self.with_session(id, |session| {
                session.status = Some(StatusNote::warning(EMPTY_REQUEST));
            })?;
            return Err(SessionError::Validation(EMPTY_REQUEST.to_string()));
        }

        let (forest, history): (Forest, Vec<ChatTurn>) = self.with_session(id, |session| {
            if session.busy {
                return Err(SessionError::Busy(id));
            }
            session.busy = true;
            session.log("submit", text);
            Ok((session.forest.clone(), session.conversation.turns().to_vec()))
        })??;

        let _guard = BusyGuard { core: self, id };

        let prompt = build_prompt(&forest, text);
        info!(session = %id, bootstrap = forest.is_empty(), "submit: asking the assistant");
        let reply = self.bridge.send(&history, &prompt).await;

        self.with_session(id, |session| match reply {
            Ok(raw) => {
                session.conversation.record(prompt, raw.clone());
                match interpret(&raw) {
                    Interpretation::Replace(new_forest) => {
                        let progress = aggregate(&new_forest);
                        session.forest = new_forest;
                        session.last_message = None;
                        session.status = Some(StatusNote::success(LIST_UPDATED));
                        session.log("update", format!("{} tasks", progress.total));
                        info!(session = %id, total = progress.total, "submit: list replaced");
                        Ok(SubmitOutcome::Replaced { progress })
                    }
                    Interpretation::Message(message) => {
                        session.last_message = Some(message.clone());
                        session.status = None;
                        session.log("answer", "The assistant replied");
                        info!(session = %id, "submit: conversational answer");
                        Ok(SubmitOutcome::Answered { message })
                    }
                }
            }
            Err(err) => {
                warn!(session = %id, error = %err, "submit: provider call failed");
                session.status = Some(StatusNote::error(format!(
                    "An error occurred with the AI model: {}",
                    err.summary()
                )));
                session.log("error", err.summary());
                Err(SessionError::Provider(err))
            }
        })?
    }
}

/// Clears a session's busy flag when the request finishes or is dropped
struct BusyGuard<'a> {
    core: &'a Core,
    id: SessionId,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        // The session may have been deleted while the request was in flight
        let _ = self.core.with_session(self.id, |session| session.busy = false);
    }
}

fn describe_task(forest: &[TaskNode], index: &[usize]) -> String {
    let description = models::get_node(forest, index)
        .map(|task| task.description())
        .unwrap_or_default();
    format!("{} ({})", description, format_index(index))
}
