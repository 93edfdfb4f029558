//! Response interpretation
//!
//! Decides whether a raw LLM reply replaces the whole list or is a
//! conversational answer meant for the user.

use serde_json::Value;

use crate::models::{normalize, TaskNode};

/// What a raw LLM reply means for the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpretation {
    /// The reply was a JSON array; it becomes the new forest
    Replace(Vec<TaskNode>),
    /// Anything else, kept exactly as received
    Message(String),
}

/// Interprets a raw reply, tolerating markdown code fences around the JSON
///
/// Unparseable or non-array replies are answers, not failures.
pub fn interpret(raw: &str) -> Interpretation {
    let unfenced = raw.trim().replace("```json", "").replace("```", "");

    match serde_json::from_str::<Value>(unfenced.trim()) {
        Ok(Value::Array(items)) => Interpretation::Replace(items.iter().map(normalize).collect()),
        _ => Interpretation::Message(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fenced_json_replaces_list() {
        let raw = "```json\n[{\"task\":\"Buy milk\"}]\n```";

        assert_eq!(
            interpret(raw),
            Interpretation::Replace(vec![TaskNode::new("Buy milk")])
        );
    }

    #[test]
    fn test_plain_text_is_message() {
        let raw = "You have 3 tasks remaining.";
        assert_eq!(interpret(raw), Interpretation::Message(raw.to_string()));
    }

    #[test]
    fn test_empty_reply_is_empty_message() {
        assert_eq!(interpret(""), Interpretation::Message(String::new()));
    }

    #[test]
    fn test_scalar_array_becomes_leaves() {
        assert_eq!(
            interpret("[1,2,3]"),
            Interpretation::Replace(vec![
                TaskNode::new("1"),
                TaskNode::new("2"),
                TaskNode::new("3"),
            ])
        );
    }

    #[test]
    fn test_non_array_json_keeps_raw_text() {
        let raw = "  {\"description\": \"not a list\"}\n";
        assert_eq!(interpret(raw), Interpretation::Message(raw.to_string()));

        let raw = "```\n42\n```";
        assert_eq!(interpret(raw), Interpretation::Message(raw.to_string()));
    }

    #[test]
    fn test_fence_without_language_tag() {
        let raw = "Here you go:\n```\n[]\n```";
        // Leading prose makes this unparseable, so it stays a message
        assert_eq!(interpret(raw), Interpretation::Message(raw.to_string()));

        assert_eq!(interpret("```\n[]\n```"), Interpretation::Replace(vec![]));
    }

    #[test]
    fn test_nested_reply_is_normalized() {
        let raw = r#"[
            {"description": "Launch", "priority": "High", "completed": false,
             "subtasks": [{"description": "Slides", "completed": true}, "Report"]}
        ]"#;

        let Interpretation::Replace(forest) = interpret(raw) else {
            panic!("expected a replacement list");
        };
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].priority(), Priority::High);
        assert!(forest[0].subtasks()[0].is_completed());
        assert_eq!(forest[0].subtasks()[1].description(), "Report");
    }

    #[test]
    fn test_pathological_depth_does_not_panic() {
        let raw = format!("{}{}", "[".repeat(5_000), "]".repeat(5_000));
        assert!(matches!(interpret(&raw), Interpretation::Message(_)));
    }
}
