//! Database models for tasks and processed items

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Token every filtering prompt must carry; replaced with the rendered item.
pub const CONTENT_PLACEHOLDER: &str = "{{CONTENT}}";

pub type TaskId = i64;

// ============================================================================
// Tasks
// ============================================================================

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Paused,
    Deleted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
            TaskStatus::Deleted => "deleted",
        }
    }

    /// Apply an owner action, returning the resulting status.
    ///
    /// `None` means the action is not allowed from this status. Deleted is
    /// terminal. Re-applying the current state is allowed and is a no-op.
    pub fn apply(self, action: TaskAction) -> Option<TaskStatus> {
        match self {
            TaskStatus::Deleted => None,
            TaskStatus::Active | TaskStatus::Paused => Some(action.target()),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(TaskStatus::Active),
            "paused" => Ok(TaskStatus::Paused),
            "deleted" => Ok(TaskStatus::Deleted),
            other => Err(PipelineError::ConfigError(format!(
                "unknown task status: {}",
                other
            ))),
        }
    }
}

/// Owner-initiated status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    Pause,
    Resume,
    Delete,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::Pause => "pause",
            TaskAction::Resume => "resume",
            TaskAction::Delete => "delete",
        }
    }

    /// Status the task ends up in once the action is applied
    pub fn target(&self) -> TaskStatus {
        match self {
            TaskAction::Pause => TaskStatus::Paused,
            TaskAction::Resume => TaskStatus::Active,
            TaskAction::Delete => TaskStatus::Deleted,
        }
    }

    /// Past-tense label used in confirmations
    pub fn past_tense(&self) -> &'static str {
        match self {
            TaskAction::Pause => "Paused",
            TaskAction::Resume => "Resumed",
            TaskAction::Delete => "Deleted",
        }
    }
}

/// Where a task pulls content from. The params are opaque to the pipeline
/// and only interpreted by the fetcher registered for `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: String,
    pub params: serde_json::Value,
}

impl SourceDescriptor {
    pub fn new(kind: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            params,
        }
    }
}

/// Task - a persistent monitoring unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub owner: String,
    pub description: String,
    pub source: SourceDescriptor,
    pub current_prompt: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::Active
    }
}

/// TaskRow - Matches tasks table
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: i64,
    pub owner: String,
    pub description: String,
    pub source_kind: String,
    pub source_params: serde_json::Value,
    pub current_prompt: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = PipelineError;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            id: row.id,
            owner: row.owner,
            description: row.description,
            source: SourceDescriptor::new(row.source_kind, row.source_params),
            current_prompt: row.current_prompt,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// NewTask - For inserting new tasks
#[derive(Debug, Clone, Serialize)]
pub struct NewTask {
    pub owner: String,
    pub description: String,
    pub source: SourceDescriptor,
    pub current_prompt: String,
}

impl NewTask {
    pub fn validate(&self) -> Result<()> {
        validate_prompt(&self.current_prompt)
    }
}

/// A prompt is usable when it still carries the content placeholder.
pub fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(PipelineError::InvalidPrompt("prompt is empty".to_string()));
    }
    if !prompt.contains(CONTENT_PLACEHOLDER) {
        return Err(PipelineError::InvalidPrompt(format!(
            "prompt is missing the {} placeholder",
            CONTENT_PLACEHOLDER
        )));
    }
    Ok(())
}

// ============================================================================
// Processed items
// ============================================================================

/// ProcessedItem - Matches processed_items table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProcessedItem {
    pub task_id: i64,
    pub item_id: String,
    pub processed_at: DateTime<Utc>,
}

/// Result of recording a processed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// First time this (task, item) pair was seen; publish it
    Inserted,
    /// The pair already exists, possibly inserted by a concurrent poller
    Duplicate,
}

/// Result of an owner-gated status change
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(Task),
    /// Unknown task, foreign owner, or already deleted. Deliberately a
    /// single variant so callers cannot tell these apart.
    NotFound,
}

// ============================================================================
// Queue messages
// ============================================================================

/// QueueMessage - Matches queue_messages table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: i64,
    pub queue: String,
    pub payload: serde_json::Value,
    pub deliveries: i32,
    pub visible_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_and_resume_are_reversible() {
        let paused = TaskStatus::Active.apply(TaskAction::Pause);
        assert_eq!(paused, Some(TaskStatus::Paused));
        assert_eq!(
            TaskStatus::Paused.apply(TaskAction::Resume),
            Some(TaskStatus::Active)
        );
        assert_eq!(
            TaskStatus::Paused.apply(TaskAction::Pause),
            Some(TaskStatus::Paused)
        );
    }

    #[test]
    fn deleted_is_terminal() {
        for action in [TaskAction::Pause, TaskAction::Resume, TaskAction::Delete] {
            assert_eq!(TaskStatus::Deleted.apply(action), None);
        }
        assert_eq!(
            TaskStatus::Paused.apply(TaskAction::Delete),
            Some(TaskStatus::Deleted)
        );
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [TaskStatus::Active, TaskStatus::Paused, TaskStatus::Deleted] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("archived".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn prompt_must_keep_placeholder() {
        assert!(validate_prompt("Is this relevant? {{CONTENT}}").is_ok());
        assert!(validate_prompt("Is this relevant?").is_err());
        assert!(validate_prompt("   ").is_err());
    }
}
