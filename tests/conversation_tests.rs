use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use taskchat::bridge::ConversationBridge;
use taskchat::interpret::{interpret, Interpretation};
use taskchat::llm::{ChatTurn, LlmClient, ProviderError};
use taskchat::models::{self, aggregate, normalize, Priority, TaskNode, TreeError};
use taskchat::session::{SessionError, SubmitOutcome};
use taskchat::Core;

/// Provider stand-in that replays canned answers
struct CannedProvider {
    replies: Mutex<VecDeque<String>>,
}

impl CannedProvider {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        })
    }
}

#[async_trait]
impl LlmClient for CannedProvider {
    async fn chat_complete(
        &self,
        _history: &[ChatTurn],
        _prompt: &str,
        _temperature: f32,
    ) -> Result<String, ProviderError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::InvalidResponse("out of replies".to_string()))
    }
}

fn core_with(replies: &[&str]) -> Core {
    Core::new(ConversationBridge::new(
        CannedProvider::new(replies),
        0.8,
        Duration::from_secs(5),
    ))
}

#[test]
fn test_normalize_is_idempotent() {
    let raw = json!([
        "Plain entry",
        {"task": "Legacy", "priority": "LOW", "sub_tasks": [{"task": "  "}, 7]},
        {"description": "Modern", "completed": "yes", "subtasks": "not a list"}
    ]);

    for entry in raw.as_array().unwrap() {
        let once = normalize(entry);
        let twice = normalize(&serde_json::to_value(&once).unwrap());
        assert_eq!(once, twice);
    }

    let legacy = normalize(&raw[1]);
    assert_eq!(legacy.priority(), Priority::Low);
    assert_eq!(legacy.subtasks()[0].description(), models::MISSING_DESCRIPTION);
    assert_eq!(legacy.subtasks()[1].description(), "7");

    let modern = normalize(&raw[2]);
    assert!(!modern.is_completed());
    assert!(modern.subtasks().is_empty());
}

#[test]
fn test_toggle_round_trip_touches_only_target() {
    let Interpretation::Replace(mut forest) = interpret(
        r#"[{"description":"A","subtasks":[{"description":"B"},{"description":"C"}]},{"description":"D"}]"#,
    ) else {
        panic!("expected a list");
    };
    let before = forest.clone();

    models::set_completed(&mut forest, &[0, 1], true).unwrap();
    assert_eq!(aggregate(&forest).completed, 1);
    assert!(!forest[0].is_completed());

    models::set_completed(&mut forest, &[0, 1], false).unwrap();
    assert_eq!(forest, before);

    assert_eq!(
        models::set_completed(&mut forest, &[], true),
        Err(TreeError::NotFound(vec![]))
    );
}

#[test]
fn test_delete_removes_whole_subtree() {
    let mut forest = vec![
        TaskNode::new("A").with_subtasks(vec![
            TaskNode::new("B").with_subtasks(vec![TaskNode::new("C")]),
            TaskNode::new("D"),
        ]),
        TaskNode::new("E"),
    ];
    let total = aggregate(&forest).total;

    let removed = models::delete_node(&mut forest, &[0]).unwrap();
    let descendants = aggregate(removed.subtasks()).total;
    assert_eq!(aggregate(&forest).total, total - 1 - descendants);
    assert_eq!(forest, vec![TaskNode::new("E")]);
}

#[tokio::test]
async fn test_conversation_flow() {
    let core = core_with(&[
        "```json\n[{\"task\":\"Buy milk\"}]\n```",
        "You have 1 task remaining.",
        "[{\"description\":\"Buy milk\",\"completed\":true},{\"description\":\"Buy eggs\",\"priority\":\"High\"}]",
    ]);
    let id = core.create_session();

    let outcome = core.submit(id, "I need groceries").await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Replaced { .. }));

    let outcome = core.submit(id, "how many tasks are left?").await.unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Answered {
            message: "You have 1 task remaining.".to_string()
        }
    );
    assert_eq!(core.view(id).unwrap().forest, vec![TaskNode::new("Buy milk")]);

    core.add_subtask(id, &[0], "Check the date").unwrap();
    assert_eq!(core.view(id).unwrap().progress.total, 2);

    core.submit(id, "milk is done, add eggs").await.unwrap();
    let view = core.view(id).unwrap();
    assert_eq!(view.progress.to_string(), "1 out of 2 tasks completed (50%)");
    assert_eq!(view.forest[1].priority(), Priority::High);
    assert_eq!(view.message, None);
    assert_eq!(view.turns, 6);

    let result = core.submit(id, "anything else?").await;
    assert!(matches!(result, Err(SessionError::Provider(_))));
    assert_eq!(core.view(id).unwrap().forest, view.forest);
}
