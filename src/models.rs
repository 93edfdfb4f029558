//! Core models for the taskchat library
//!
//! This module contains the task tree data model, the normalization rules that
//! turn loosely-shaped LLM output into well-formed nodes, and the path-addressed
//! operations that mutate and aggregate a forest of tasks.

use std::fmt;
use std::num::ParseIntError;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Description given to entries that arrive without a usable one
pub const MISSING_DESCRIPTION: &str = "No task description";

/// Task priority as understood by the list and the LLM prompts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Parses a priority label case-insensitively, falling back to Medium
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents one entry of the to-do list and its nested subtasks
///
/// Deserialization always goes through [`normalize`], so a `TaskNode` can never
/// hold an unnormalized shape regardless of where the JSON came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct TaskNode {
    description: String,
    priority: Priority,
    completed: bool,
    subtasks: Vec<TaskNode>,
}

impl TaskNode {
    /// Creates a new, not completed, Medium priority leaf task
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: clean_description(description.into()),
            priority: Priority::Medium,
            completed: false,
            subtasks: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    pub fn with_subtasks(mut self, subtasks: Vec<TaskNode>) -> Self {
        self.subtasks = subtasks;
        self
    }

    /// Gets the description of this task
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Gets the priority of this task
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Checks if this task is completed
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Gets the subtasks of this task
    pub fn subtasks(&self) -> &[TaskNode] {
        &self.subtasks
    }
}

impl From<Value> for TaskNode {
    fn from(raw: Value) -> Self {
        normalize(&raw)
    }
}

fn clean_description(raw: String) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        MISSING_DESCRIPTION.to_string()
    } else if trimmed.len() == raw.len() {
        raw
    } else {
        trimmed.to_string()
    }
}

/// Renders a scalar as description text: strings verbatim, everything else as JSON
fn describe(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Turns any JSON entry into a well-formed [`TaskNode`]
///
/// Objects keep whatever fields they carry (`task` and `sub_tasks` are accepted
/// as aliases of `description` and `subtasks`), missing or unusable fields take
/// their defaults, and any other value becomes a leaf whose description is the
/// value's text. Never fails.
pub fn normalize(raw: &Value) -> TaskNode {
    let Value::Object(fields) = raw else {
        return TaskNode::new(describe(raw));
    };

    let description = ["description", "task"]
        .iter()
        .filter_map(|key| fields.get(*key))
        .map(describe)
        .find(|text| !text.trim().is_empty())
        .unwrap_or_default();

    let priority = fields
        .get("priority")
        .and_then(Value::as_str)
        .map(Priority::parse)
        .unwrap_or_default();

    let completed = fields
        .get("completed")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let subtasks = match fields.get("subtasks").or_else(|| fields.get("sub_tasks")) {
        Some(Value::Array(items)) => items.iter().map(normalize).collect(),
        _ => Vec::new(),
    };

    TaskNode {
        description: clean_description(description),
        priority,
        completed,
        subtasks,
    }
}

/// The ordered top-level sequence of tasks
pub type Forest = Vec<TaskNode>;

// shorthand for the path of a task in the forest
pub type Index = Vec<usize>;

/// Errors raised by path-addressed tree operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("No task at index {}", format_index(.0))]
    NotFound(Index),

    #[error("Task text must not be empty")]
    EmptyText,
}

/// Parses a string representation of an index (e.g., "0,1,2") into an Index
pub fn parse_index(index_str: &str) -> Result<Index, ParseIntError> {
    index_str
        .split(',')
        .map(|s| s.trim().parse::<usize>())
        .collect()
}

/// Formats an index the way [`parse_index`] reads it
pub fn format_index(index: &[usize]) -> String {
    index
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Stable identity key for the node at `index`, usable as a DOM id
pub fn task_key(index: &[usize]) -> String {
    let mut key = String::from("task");
    for i in index {
        key.push('-');
        key.push_str(&i.to_string());
    }
    key
}

/// Gets the task at the given index
pub fn get_node<'a>(forest: &'a [TaskNode], index: &[usize]) -> Option<&'a TaskNode> {
    let (&first, rest) = index.split_first()?;
    let mut current = forest.get(first)?;
    for &idx in rest {
        current = current.subtasks.get(idx)?;
    }
    Some(current)
}

fn get_node_mut<'a>(forest: &'a mut [TaskNode], index: &[usize]) -> Option<&'a mut TaskNode> {
    let (&first, rest) = index.split_first()?;
    let mut current = forest.get_mut(first)?;
    for &idx in rest {
        current = current.subtasks.get_mut(idx)?;
    }
    Some(current)
}

/// Sets the completion flag of the task at `index`, leaving every other node alone
pub fn set_completed(forest: &mut [TaskNode], index: &[usize], value: bool) -> Result<(), TreeError> {
    let task = get_node_mut(forest, index).ok_or_else(|| TreeError::NotFound(index.to_vec()))?;
    task.completed = value;
    Ok(())
}

/// Appends a new leaf built from `text` under the task at `index`
///
/// Returns the index of the new subtask.
pub fn add_subtask(forest: &mut [TaskNode], index: &[usize], text: &str) -> Result<Index, TreeError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(TreeError::EmptyText);
    }

    let parent = get_node_mut(forest, index).ok_or_else(|| TreeError::NotFound(index.to_vec()))?;
    parent.subtasks.push(TaskNode::new(text));

    let mut new_index = index.to_vec();
    new_index.push(parent.subtasks.len() - 1);
    Ok(new_index)
}

/// Removes the task at `index` together with its whole subtree
pub fn delete_node(forest: &mut Forest, index: &[usize]) -> Result<TaskNode, TreeError> {
    let not_found = || TreeError::NotFound(index.to_vec());
    let (&child_idx, parent_index) = index.split_last().ok_or_else(not_found)?;

    let siblings = if parent_index.is_empty() {
        forest
    } else {
        &mut get_node_mut(forest, parent_index)
            .ok_or_else(not_found)?
            .subtasks
    };

    if child_idx >= siblings.len() {
        return Err(not_found());
    }
    Ok(siblings.remove(child_idx))
}

/// Completion counts over a whole forest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
}

impl Progress {
    /// Completed share in `0.0..=1.0`; zero for an empty forest
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    /// Whole percent, halves rounded to even
    pub fn percent(&self) -> u32 {
        (self.fraction() * 100.0).round_ties_even() as u32
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} out of {} tasks completed ({}%)",
            self.completed,
            self.total,
            self.percent()
        )
    }
}

/// Counts every node and every node flagged completed, at any depth
pub fn aggregate(forest: &[TaskNode]) -> Progress {
    let mut progress = Progress::default();
    let mut stack: Vec<&TaskNode> = forest.iter().rev().collect();

    while let Some(task) = stack.pop() {
        progress.total += 1;
        if task.completed {
            progress.completed += 1;
        }
        stack.extend(task.subtasks.iter().rev());
    }

    progress
}

/// Depth-first, pre-order enumeration of every node with its index
pub fn walk(forest: &[TaskNode]) -> Vec<(Index, &TaskNode)> {
    let mut visited = Vec::new();
    let mut stack: Vec<(Index, &TaskNode)> = forest
        .iter()
        .enumerate()
        .rev()
        .map(|(i, task)| (vec![i], task))
        .collect();

    while let Some((index, task)) = stack.pop() {
        for (i, subtask) in task.subtasks.iter().enumerate().rev() {
            let mut subtask_index = index.clone();
            subtask_index.push(i);
            stack.push((subtask_index, subtask));
        }
        visited.push((index, task));
    }

    visited
}
