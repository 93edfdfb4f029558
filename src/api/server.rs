//! API Server module
//!
//! This module provides the HTTP server for taskchat: a JSON API used by the
//! CLI, and a server-rendered HTML checklist that re-renders on every change.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{delete, get, post},
    Form, Json, Router,
};
use html_escape::{encode_quoted_attribute as attr, encode_text as text};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::models::{format_index, parse_index, task_key, walk, Index};
use crate::session::{SessionError, SessionId, SessionSummary, SessionView, StatusLevel, SubmitOutcome};
use crate::Core;

/// Request to send free text to the assistant
#[derive(Serialize, Deserialize)]
pub struct SubmitRequest {
    pub text: String,
}

/// Request to set a task's completion flag
#[derive(Serialize, Deserialize)]
pub struct CompleteRequest {
    pub path: Index,
    pub completed: bool,
}

/// Request to append a subtask
#[derive(Serialize, Deserialize)]
pub struct SubtaskRequest {
    pub path: Index,
    pub text: String,
}

/// Result of a submission together with the session it produced
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub outcome: SubmitOutcome,
    pub session: SessionView,
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 3000).into(),
        }
    }
}

/// API responses
#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

fn error_status(err: &SessionError) -> StatusCode {
    match err {
        SessionError::SessionNotFound(_) | SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::Validation(_) => StatusCode::BAD_REQUEST,
        SessionError::Busy(_) => StatusCode::CONFLICT,
        SessionError::Provider(_) => StatusCode::BAD_GATEWAY,
    }
}

fn error_message(err: &SessionError) -> String {
    match err {
        SessionError::Provider(e) => format!("AI provider error: {}", e.summary()),
        other => other.to_string(),
    }
}

/// Maps Core results to Axum responses
fn respond<T: Serialize>(result: Result<T, SessionError>) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))).into_response(),
        Err(err) => (
            error_status(&err),
            Json(ApiResponse::<T>::error(error_message(&err))),
        )
            .into_response(),
    }
}

fn bad_index(index_str: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error(format!(
            "Invalid index format: '{}'",
            index_str
        ))),
    )
        .into_response()
}

/// Builds the application router
pub fn router(core: Core) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { Redirect::temporary("/ui") }))
        // --- Sessions --- //
        .route(
            "/api/sessions",
            get(list_sessions_handler).post(create_session_handler),
        )
        .route(
            "/api/sessions/:id",
            get(get_session_handler).delete(delete_session_handler),
        )
        .route("/api/sessions/:id/submit", post(submit_handler))
        .route("/api/sessions/:id/reset", post(reset_handler))
        // --- Direct edits --- //
        .route("/api/sessions/:id/tasks/complete", post(complete_handler))
        .route("/api/sessions/:id/tasks/subtask", post(subtask_handler))
        .route("/api/sessions/:id/tasks/:index", delete(remove_task_handler))
        // --- UI --- //
        .route("/ui", get(list_sessions_ui_handler).post(create_session_ui_handler))
        .route("/ui/:id", get(ui_handler))
        .route("/ui/:id/submit", post(submit_ui_handler))
        .route("/ui/:id/toggle", post(toggle_ui_handler))
        .route("/ui/:id/subtask", post(subtask_ui_handler))
        .route("/ui/:id/delete", post(delete_ui_handler))
        .route("/ui/:id/reset", post(reset_ui_handler))
        .route("/ui/events/:id", get(events_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(core)
}

/// Starts the HTTP server
pub async fn serve(core: Core, config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Already initialized when embedded
    let _ = tracing_subscriber::fmt::try_init();

    let app = router(core);

    tracing::info!("Starting server on {}", config.address);
    let listener = TcpListener::bind(config.address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- JSON handlers --- //

async fn list_sessions_handler(State(core): State<Core>) -> impl IntoResponse {
    respond(Ok::<_, SessionError>(core.list_sessions()))
}

async fn create_session_handler(State(core): State<Core>) -> impl IntoResponse {
    let id = core.create_session();
    respond(core.view(id))
}

async fn get_session_handler(
    State(core): State<Core>,
    Path(id): Path<SessionId>,
) -> impl IntoResponse {
    respond(core.view(id))
}

async fn delete_session_handler(
    State(core): State<Core>,
    Path(id): Path<SessionId>,
) -> impl IntoResponse {
    respond(core.delete_session(id))
}

async fn submit_handler(
    State(core): State<Core>,
    Path(id): Path<SessionId>,
    Json(payload): Json<SubmitRequest>,
) -> impl IntoResponse {
    let result = match core.submit(id, &payload.text).await {
        Ok(outcome) => core
            .view(id)
            .map(|session| SubmitResponse { outcome, session }),
        Err(e) => Err(e),
    };
    respond(result)
}

async fn reset_handler(State(core): State<Core>, Path(id): Path<SessionId>) -> impl IntoResponse {
    respond(core.reset(id))
}

async fn complete_handler(
    State(core): State<Core>,
    Path(id): Path<SessionId>,
    Json(payload): Json<CompleteRequest>,
) -> impl IntoResponse {
    respond(core.set_completed(id, &payload.path, payload.completed))
}

async fn subtask_handler(
    State(core): State<Core>,
    Path(id): Path<SessionId>,
    Json(payload): Json<SubtaskRequest>,
) -> impl IntoResponse {
    respond(core.add_subtask(id, &payload.path, &payload.text))
}

async fn remove_task_handler(
    State(core): State<Core>,
    Path((id, index_str)): Path<(SessionId, String)>,
) -> impl IntoResponse {
    match parse_index(&index_str) {
        Ok(index) => respond(core.delete_node(id, &index)),
        Err(_) => bad_index(&index_str),
    }
}

// --- UI handlers --- //

#[derive(Deserialize)]
struct SubmitForm {
    text: String,
}

#[derive(Deserialize)]
struct ToggleForm {
    path: String,
    completed: bool,
}

#[derive(Deserialize)]
struct SubtaskForm {
    path: String,
    text: String,
}

#[derive(Deserialize)]
struct PathForm {
    path: String,
}

/// Post/Redirect/Get target, anchored at the node the user touched
fn back_to(id: SessionId, anchor: Option<&[usize]>) -> Redirect {
    match anchor {
        Some(index) if !index.is_empty() => {
            Redirect::to(&format!("/ui/{}#{}", id, task_key(index)))
        }
        _ => Redirect::to(&format!("/ui/{}", id)),
    }
}

fn after_edit<T>(id: SessionId, result: Result<T, SessionError>, anchor: Option<&[usize]>) -> Redirect {
    match result {
        Err(SessionError::SessionNotFound(_)) => Redirect::to("/ui"),
        Err(e) => {
            tracing::debug!(session = %id, error = %e, "UI edit rejected");
            back_to(id, anchor)
        }
        Ok(_) => back_to(id, anchor),
    }
}

async fn create_session_ui_handler(State(core): State<Core>) -> Redirect {
    let id = core.create_session();
    back_to(id, None)
}

async fn submit_ui_handler(
    State(core): State<Core>,
    Path(id): Path<SessionId>,
    Form(form): Form<SubmitForm>,
) -> Redirect {
    let result = core.submit(id, &form.text).await;
    after_edit(id, result, None)
}

async fn toggle_ui_handler(
    State(core): State<Core>,
    Path(id): Path<SessionId>,
    Form(form): Form<ToggleForm>,
) -> Redirect {
    let Ok(index) = parse_index(&form.path) else {
        return back_to(id, None);
    };
    let result = core.set_completed(id, &index, form.completed);
    after_edit(id, result, Some(index.as_slice()))
}

async fn subtask_ui_handler(
    State(core): State<Core>,
    Path(id): Path<SessionId>,
    Form(form): Form<SubtaskForm>,
) -> Redirect {
    let Ok(index) = parse_index(&form.path) else {
        return back_to(id, None);
    };
    let result = core.add_subtask(id, &index, &form.text);
    after_edit(id, result, Some(index.as_slice()))
}

async fn delete_ui_handler(
    State(core): State<Core>,
    Path(id): Path<SessionId>,
    Form(form): Form<PathForm>,
) -> Redirect {
    let Ok(index) = parse_index(&form.path) else {
        return back_to(id, None);
    };
    let result = core.delete_node(id, &index);
    // The node is gone, so land on its parent
    let parent = index.split_last().map(|(_, parent)| parent);
    after_edit(id, result, parent)
}

async fn reset_ui_handler(State(core): State<Core>, Path(id): Path<SessionId>) -> Redirect {
    let result = core.reset(id);
    after_edit(id, result, None)
}

async fn list_sessions_ui_handler(State(core): State<Core>) -> Html<String> {
    Html(render_session_list(&core.list_sessions()))
}

async fn ui_handler(State(core): State<Core>, Path(id): Path<SessionId>) -> Response {
    match core.view(id) {
        Ok(view) => Html(render_session_page(&view, &core.list_sessions())).into_response(),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Html(format!(
                "{}<h1>{}</h1><p><a href='/ui'>Back to all lists</a></p></body></html>",
                page_head("Not found"),
                text(&e.to_string())
            )),
        )
            .into_response(),
    }
}

const UPDATE_EVENT: &str = "event: update\ndata: change\n\n";

async fn events_handler(State(core): State<Core>, Path(id): Path<SessionId>) -> impl IntoResponse {
    let receiver = core.subscribe();

    let stream = futures::stream::unfold(receiver, move |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(changed) if changed == id => {
                    return Some((Ok::<_, Infallible>(UPDATE_EVENT.to_string()), receiver))
                }
                Ok(_) => continue,
                // Missed some notifications; one refresh covers them all
                Err(RecvError::Lagged(_)) => {
                    return Some((Ok(UPDATE_EVENT.to_string()), receiver))
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
    ];

    (headers, Body::from_stream(stream))
}

// --- Template rendering --- //

fn page_head(title: &str) -> String {
    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"UTF-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\
         <title>{}</title><style>{}</style></head><body>",
        text(title),
        STYLES
    )
}

fn session_label(summary: &SessionSummary) -> String {
    match &summary.title {
        Some(title) => format!("{} (list {})", title, summary.id),
        None => format!("List {}", summary.id),
    }
}

fn render_session_list(sessions: &[SessionSummary]) -> String {
    let mut html = page_head("taskchat lists");
    html.push_str("<h1>📝 AI-Powered Conversational To-Do Lists</h1>");
    html.push_str(
        "<form method='post' action='/ui'><button type='submit'>Start a new list</button></form>",
    );

    if sessions.is_empty() {
        html.push_str("<p class='info'>No lists yet.</p>");
    } else {
        html.push_str("<ul class='session-list'>");
        for summary in sessions {
            html.push_str(&format!(
                "<li><a href='/ui/{}'>{}</a> <span class='muted'>{}</span></li>",
                summary.id,
                text(&session_label(summary)),
                summary.progress
            ));
        }
        html.push_str("</ul>");
    }

    html.push_str("</body></html>");
    html
}

fn render_session_page(view: &SessionView, sessions: &[SessionSummary]) -> String {
    let id = view.id;
    let mut html = page_head("taskchat");

    // --- Session tabs ---
    html.push_str("<nav class='session-tabs'><a href='/ui'>All lists</a>");
    for summary in sessions {
        let class = if summary.id == id { "active" } else { "" };
        html.push_str(&format!(
            "<a href='/ui/{}' class='{}'>{}</a>",
            summary.id,
            class,
            text(&session_label(summary))
        ));
    }
    html.push_str("</nav>");

    html.push_str("<h1>📝 AI-Powered Conversational To-Do List</h1>");

    // --- Natural language input ---
    html.push_str("<section class='card'><h2>What would you like to do?</h2>");
    html.push_str(&format!(
        "<form method='post' action='/ui/{}/submit' class='request-form'>\
         <textarea name='text' id='request-text' rows='6' \
         placeholder='e.g., I need to prepare for the project launch. This includes creating a presentation and finishing the report. The presentation is the highest priority.'>\
         </textarea><button type='submit'{}>✨ Submit</button></form>",
        id,
        if view.busy { " disabled" } else { "" }
    ));
    if view.busy {
        html.push_str("<p class='busy'>AI is thinking...</p>");
    }
    if let Some(status) = &view.status {
        let class = match status.level {
            StatusLevel::Success => "status-success",
            StatusLevel::Warning => "status-warning",
            StatusLevel::Error => "status-error",
        };
        html.push_str(&format!(
            "<p class='status {}'>{}</p>",
            class,
            text(&status.text)
        ));
    }
    html.push_str("</section>");

    // --- Checklist ---
    html.push_str("<section class='card'><h2>Your Interactive To-Do List</h2>");
    if view.forest.is_empty() {
        html.push_str(
            "<p class='info'>Your generated to-do list will appear here once you describe your tasks above.</p>",
        );
    } else {
        render_tasks_html(&mut html, view);

        html.push_str("<h2>Your Progress</h2>");
        if view.progress.total > 0 {
            html.push_str(&format!(
                "<progress value='{}' max='{}'></progress><p>{}</p>",
                view.progress.completed, view.progress.total, view.progress
            ));
        } else {
            html.push_str("<p>Your list is ready for tasks.</p>");
        }
    }
    html.push_str("</section>");

    // --- Conversational response ---
    if let Some(message) = &view.message {
        html.push_str(&format!(
            "<section class='card'><h3>AI Assistant:</h3><div class='assistant'>{}</div></section>",
            text(message)
        ));
    }

    // --- Activity ---
    html.push_str("<section class='card'><h2>Recent Activity</h2><ul class='history-list'>");
    if view.history.is_empty() {
        html.push_str("<li>No activity yet.</li>");
    } else {
        for entry in view.history.iter().rev() {
            html.push_str(&format!(
                "<li><span class='muted'>{}</span> <strong>{}</strong> {}</li>",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                text(&entry.action),
                text(&entry.details)
            ));
        }
    }
    html.push_str("</ul>");
    html.push_str(&format!(
        "<form method='post' action='/ui/{}/reset'><button type='submit' class='secondary'>Start over</button></form>",
        id
    ));
    html.push_str("</section>");

    html.push_str(&format!(
        "<p class='muted' id='connection'>Waiting to connect...</p>\
         <script>const SESSION_ID = {};</script><script>{}</script></body></html>",
        id.value(),
        PAGE_SCRIPT
    ));
    html
}

/// Renders the forest as nested `<details>` blocks
///
/// Nodes arrive in pre-order, so a node closes every open block that is not
/// one of its ancestors before opening its own.
fn render_tasks_html(html: &mut String, view: &SessionView) {
    let id = view.id;
    let mut open = 0usize;

    html.push_str("<div class='task-tree'>");
    for (index, task) in walk(&view.forest) {
        let depth = index.len();
        while open >= depth {
            html.push_str("</div></details>");
            open -= 1;
        }

        let key = task_key(&index);
        let path = format_index(&index);
        let class = if task.is_completed() { "task completed" } else { "task" };

        html.push_str(&format!(
            "<details open id='{key}' class='{class}' data-depth='{depth}'>\
             <summary><span class='task-desc'>{desc}</span> \
             <span class='priority priority-{prio_class}'>(Priority: {prio})</span></summary>\
             <div class='task-body'>",
            key = key,
            class = class,
            depth = depth,
            desc = text(task.description()),
            prio_class = task.priority().as_str().to_ascii_lowercase(),
            prio = task.priority(),
        ));

        html.push_str(&format!(
            "<div class='task-controls'>\
             <form method='post' action='/ui/{id}/toggle'>\
             <input type='hidden' name='path' value='{path}'>\
             <input type='hidden' name='completed' value='{next}'>\
             <button type='submit'>{toggle_label}</button></form>\
             <form method='post' action='/ui/{id}/subtask' class='subtask-form'>\
             <input type='hidden' name='path' value='{path}'>\
             <input type='text' name='text' id='input-sub-{key}' placeholder='Add subtask under &quot;{desc_attr}&quot;'>\
             <button type='submit'>Add Subtask</button></form>\
             <form method='post' action='/ui/{id}/delete'>\
             <input type='hidden' name='path' value='{path}'>\
             <button type='submit' class='danger'>Delete</button></form>\
             </div>",
            id = id,
            path = path,
            key = key,
            next = !task.is_completed(),
            toggle_label = if task.is_completed() { "☑ Completed" } else { "☐ Completed" },
            desc_attr = attr(task.description()),
        ));

        open += 1;
    }
    while open > 0 {
        html.push_str("</div></details>");
        open -= 1;
    }
    html.push_str("</div>");
}

const STYLES: &str = r#"
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.5; color: #333; max-width: 960px; margin: 0 auto; padding: 20px; background: #f7f9fc; }
h1 { color: #2c3e50; border-bottom: 2px solid #3498db; padding-bottom: 10px; }
h2 { color: #3498db; }
.card { background: white; padding: 20px; border-radius: 8px; box-shadow: 0 2px 10px rgba(0,0,0,0.1); margin-bottom: 20px; }
.session-tabs a { margin-right: 12px; color: #3498db; }
.session-tabs a.active { font-weight: bold; color: #2c3e50; }
textarea { width: 100%; box-sizing: border-box; font: inherit; }
.info { background: #e8f4fc; padding: 10px; border-radius: 5px; }
.muted { color: #7f8c8d; font-size: 0.9em; }
.status-success { color: #27ae60; }
.status-warning { color: #d68910; }
.status-error { color: #c0392b; }
.busy { color: #f39c12; }
.task-tree details { border-left: 3px solid #dfe6ee; margin: 6px 0 6px 0; padding-left: 10px; }
.task-tree details details { margin-left: 18px; }
.task.completed > summary .task-desc { color: #7f8c8d; text-decoration: line-through; }
.priority-high { color: #c0392b; }
.priority-low { color: #7f8c8d; }
.task-controls { display: flex; flex-wrap: wrap; gap: 8px; margin: 6px 0; }
.task-controls form { display: inline-flex; gap: 4px; }
.danger { color: #c0392b; }
.assistant { white-space: pre-wrap; background: #e8f4fc; padding: 10px; border-radius: 5px; }
.history-list { list-style: none; padding-left: 0; max-height: 300px; overflow-y: auto; }
progress { width: 100%; height: 18px; }
"#;

// Keeps typed text and collapsed nodes across the reloads triggered by updates
const PAGE_SCRIPT: &str = r#"
const stateKey = (suffix) => 'taskchat-' + SESSION_ID + '-' + suffix;

function restoreState() {
    document.querySelectorAll('input[type=text], textarea').forEach((el) => {
        if (!el.id) return;
        const saved = sessionStorage.getItem(stateKey('input-' + el.id));
        if (saved !== null) el.value = saved;
        el.addEventListener('input', () => sessionStorage.setItem(stateKey('input-' + el.id), el.value));
    });
    document.querySelectorAll('details.task').forEach((el) => {
        if (sessionStorage.getItem(stateKey('closed-' + el.id)) === '1') el.open = false;
        el.addEventListener('toggle', () => {
            if (el.open) sessionStorage.removeItem(stateKey('closed-' + el.id));
            else sessionStorage.setItem(stateKey('closed-' + el.id), '1');
        });
    });
    document.querySelectorAll('form').forEach((form) => {
        form.addEventListener('submit', () => {
            form.querySelectorAll('input[type=text], textarea').forEach((el) => {
                if (el.id) sessionStorage.removeItem(stateKey('input-' + el.id));
            });
        });
    });
}

let eventSource;
function connectEvents() {
    const status = document.getElementById('connection');
    eventSource = new EventSource('/ui/events/' + SESSION_ID);
    eventSource.onopen = () => { status.textContent = 'Connected: listening for changes'; };
    eventSource.addEventListener('update', () => {
        status.textContent = 'Updating...';
        window.location.reload();
    });
    eventSource.onerror = () => {
        status.textContent = 'Connection lost. Reconnecting...';
        eventSource.close();
        setTimeout(connectEvents, 3000);
    };
}

window.addEventListener('load', () => { restoreState(); connectEvents(); });
window.addEventListener('beforeunload', () => { if (eventSource) eventSource.close(); });
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ConversationBridge;
    use crate::llm::testing::ScriptedClient;
    use crate::llm::ProviderError;
    use crate::models::TaskNode;
    use axum::http::Request;
    use http_body_util::BodyExt; // for `collect`
    use serde::de::DeserializeOwned;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt; // for `oneshot`

    fn setup_test_app(client: ScriptedClient) -> (Core, Router) {
        let bridge = ConversationBridge::new(Arc::new(client), 0.8, Duration::from_secs(5));
        let core = Core::new(bridge);
        (core.clone(), router(core))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        app.clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    async fn request_json<T: DeserializeOwned + Serialize>(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, ApiResponse<T>) {
        let response = send(app, method, uri, body).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let parsed = serde_json::from_slice::<ApiResponse<T>>(&bytes)
            .unwrap_or_else(|e| panic!("bad body ({}): {}", e, String::from_utf8_lossy(&bytes)));
        (status, parsed)
    }

    async fn post_form(app: &Router, uri: &str, form: &str) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("Content-Type", "application/x-www-form-urlencoded")
                    .body(Body::from(form.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8_lossy(&bytes).to_string()
    }

    fn location(response: &Response) -> String {
        response.headers()[header::LOCATION]
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (_core, app) = setup_test_app(ScriptedClient::default());

        let (status, created) = request_json::<SessionView>(&app, "POST", "/api/sessions", None).await;
        assert_eq!(status, StatusCode::OK);
        let id = created.data.unwrap().id;

        let (_, listed) = request_json::<Vec<SessionSummary>>(&app, "GET", "/api/sessions", None).await;
        assert_eq!(listed.data.unwrap()[0].id, id);

        let uri = format!("/api/sessions/{}", id);
        let (status, deleted) = request_json::<SessionId>(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted.data, Some(id));

        let (status, missing) = request_json::<SessionView>(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_submit_and_edit_through_api() {
        let (core, app) = setup_test_app(ScriptedClient::replying(&[
            "```json\n[{\"task\":\"Launch\",\"priority\":\"High\",\"sub_tasks\":[\"Slides\",\"Report\"]}]\n```",
        ]));
        let id = core.create_session();
        let base = format!("/api/sessions/{}", id);

        let (status, submitted) = request_json::<SubmitResponse>(
            &app,
            "POST",
            &format!("{}/submit", base),
            Some(json!({"text": "prepare the launch"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let submitted = submitted.data.unwrap();
        assert!(matches!(submitted.outcome, SubmitOutcome::Replaced { .. }));
        assert_eq!(submitted.session.progress.total, 3);

        let (status, view) = request_json::<SessionView>(
            &app,
            "POST",
            &format!("{}/tasks/complete", base),
            Some(json!({"path": [0, 1], "completed": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view.data.unwrap().progress.completed, 1);

        let (status, view) = request_json::<SessionView>(
            &app,
            "POST",
            &format!("{}/tasks/subtask", base),
            Some(json!({"path": [0], "text": "Rehearse"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let view = view.data.unwrap();
        assert_eq!(view.forest[0].subtasks()[2].description(), "Rehearse");

        let (status, view) =
            request_json::<SessionView>(&app, "DELETE", &format!("{}/tasks/0,0", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view.data.unwrap().progress.total, 3);
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let (core, app) = setup_test_app(ScriptedClient::new(vec![Err(ProviderError::Api {
            status: 401,
            message: "bad key".to_string(),
        })]));
        let id = core.create_session();
        core.replace_forest(id, vec![TaskNode::new("Only")]).unwrap();
        let base = format!("/api/sessions/{}", id);

        let (status, _) = request_json::<SessionView>(
            &app,
            "POST",
            &format!("{}/tasks/complete", base),
            Some(json!({"path": [4], "completed": true})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = request_json::<SessionView>(
            &app,
            "POST",
            &format!("{}/tasks/subtask", base),
            Some(json!({"path": [0], "text": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            request_json::<SessionView>(&app, "DELETE", &format!("{}/tasks/zero", base), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = request_json::<SubmitResponse>(
            &app,
            "POST",
            &format!("{}/submit", base),
            Some(json!({"text": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, failed) = request_json::<SubmitResponse>(
            &app,
            "POST",
            &format!("{}/submit", base),
            Some(json!({"text": "add more"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let error = failed.error.unwrap();
        assert!(error.contains("credentials"));
        assert!(!error.contains("bad key"));
        assert_eq!(core.view(id).unwrap().forest, vec![TaskNode::new("Only")]);
    }

    #[tokio::test]
    async fn test_busy_session_conflicts() {
        let (core, app) = setup_test_app(
            ScriptedClient::replying(&["[]"]).with_delay(Duration::from_millis(300)),
        );
        let id = core.create_session();

        let pending = tokio::spawn({
            let core = core.clone();
            async move { core.submit(id, "slow").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (status, _) = request_json::<SubmitResponse>(
            &app,
            "POST",
            &format!("/api/sessions/{}/submit", id),
            Some(json!({"text": "again"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        pending.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_root_redirects_to_ui() {
        let (_core, app) = setup_test_app(ScriptedClient::default());
        let response = send(&app, "GET", "/", None).await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(location(&response), "/ui");
    }

    #[tokio::test]
    async fn test_ui_renders_escaped_tree() {
        let (core, app) = setup_test_app(ScriptedClient::default());
        let id = core.create_session();
        core.replace_forest(
            id,
            vec![TaskNode::new("<script>alert(1)</script>")
                .with_subtasks(vec![TaskNode::new("Child").with_completed(true)])],
        )
        .unwrap();

        let response = send(&app, "GET", &format!("/ui/{}", id), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;

        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("id='task-0'"));
        assert!(html.contains("id='task-0-0'"));
        assert!(html.contains("1 out of 2 tasks completed (50%)"));
        assert!(html.contains(&format!("const SESSION_ID = {};", id)));
        assert_eq!(html.matches("<details").count(), html.matches("</details>").count());
    }

    #[tokio::test]
    async fn test_ui_escapes_quotes_in_attributes() {
        let (core, app) = setup_test_app(ScriptedClient::default());
        let id = core.create_session();
        core.replace_forest(id, vec![TaskNode::new("Mom's x' autofocus onfocus='alert(1)")])
            .unwrap();

        let html = body_text(send(&app, "GET", &format!("/ui/{}", id), None).await).await;

        assert!(html.contains(
            "placeholder='Add subtask under &quot;Mom&#x27;s x&#x27; autofocus onfocus=&#x27;alert(1)&quot;'>"
        ));
        assert!(!html.contains("under &quot;Mom's"));
        assert!(!html.contains(" autofocus onfocus='alert(1)&quot;'"));
    }

    #[tokio::test]
    async fn test_ui_empty_and_missing_sessions() {
        let (core, app) = setup_test_app(ScriptedClient::default());
        let id = core.create_session();

        let html = body_text(send(&app, "GET", &format!("/ui/{}", id), None).await).await;
        assert!(html.contains("Your generated to-do list will appear here"));

        let response = send(&app, "GET", "/ui/4242", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let html = body_text(send(&app, "GET", "/ui", None).await).await;
        assert!(html.contains(&format!("href='/ui/{}'", id)));
    }

    #[tokio::test]
    async fn test_ui_forms_redirect_to_touched_node() {
        let (core, app) = setup_test_app(ScriptedClient::replying(&["Nothing to change."]));

        let response = post_form(&app, "/ui", "").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let page = location(&response);
        let id = core.list_sessions()[0].id;
        assert_eq!(page, format!("/ui/{}", id));

        core.replace_forest(
            id,
            vec![TaskNode::new("Parent").with_subtasks(vec![TaskNode::new("Child")])],
        )
        .unwrap();

        let response = post_form(&app, &format!("/ui/{}/toggle", id), "path=0%2C0&completed=true").await;
        assert_eq!(location(&response), format!("/ui/{}#task-0-0", id));
        assert!(core.view(id).unwrap().forest[0].subtasks()[0].is_completed());

        let response = post_form(&app, &format!("/ui/{}/subtask", id), "path=0&text=Sibling").await;
        assert_eq!(location(&response), format!("/ui/{}#task-0", id));
        assert_eq!(core.view(id).unwrap().progress.total, 3);

        let response = post_form(&app, &format!("/ui/{}/delete", id), "path=0%2C1").await;
        assert_eq!(location(&response), format!("/ui/{}#task-0", id));
        assert_eq!(core.view(id).unwrap().progress.total, 2);

        let response = post_form(&app, &format!("/ui/{}/submit", id), "text=anything+left%3F").await;
        assert_eq!(location(&response), format!("/ui/{}", id));
        let html = body_text(send(&app, "GET", &format!("/ui/{}", id), None).await).await;
        assert!(html.contains("Nothing to change."));

        let response = post_form(&app, &format!("/ui/{}/reset", id), "").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(core.view(id).unwrap().forest.is_empty());

        let response = post_form(&app, "/ui/4242/reset", "").await;
        assert_eq!(location(&response), "/ui");
    }

    #[tokio::test]
    async fn test_events_stream_announces_changes() {
        let (core, app) = setup_test_app(ScriptedClient::default());
        let id = core.create_session();
        let other = core.create_session();

        let response = send(&app, "GET", &format!("/ui/events/{}", id), None).await;
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        let mut body = response.into_body();

        core.replace_forest(other, vec![TaskNode::new("elsewhere")]).unwrap();
        core.replace_forest(id, vec![TaskNode::new("here")]).unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(1), body.frame())
            .await
            .expect("no event within a second")
            .unwrap()
            .unwrap();
        let data = frame.into_data().unwrap();
        assert_eq!(String::from_utf8_lossy(&data), UPDATE_EVENT);
    }
}
