//! Task types: Task, TaskDraft, TaskSummary

use super::ids::{ColumnId, TaskId};
use super::position::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task priority. Carried through moves, never consulted for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// A task/card as held by the authoritative store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub column_id: ColumnId,
    pub position: Position,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Build a task from a draft at the given placement
    pub fn from_draft(draft: TaskDraft, column_id: ColumnId, position: Position) -> Self {
        Self {
            id: TaskId::new(),
            column_id,
            position,
            title: draft.title,
            description: draft.description,
            priority: draft.priority,
            created_at: Utc::now(),
        }
    }

    /// The ordering-relevant part of this task
    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id.clone(),
            column_id: self.column_id.clone(),
            position: self.position,
        }
    }
}

/// Payload for creating a task. Placement is always decided by the allocator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl TaskDraft {
    /// Create a draft with just a title
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// What the ordering engine caches per task: identity and placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub column_id: ColumnId,
    pub position: Position,
}

impl TaskSummary {
    /// Create a summary
    pub fn new(id: impl Into<TaskId>, column_id: impl Into<ColumnId>, position: Position) -> Self {
        Self {
            id: id.into(),
            column_id: column_id.into(),
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_from_draft_carries_payload() {
        let draft = TaskDraft::new("Write docs")
            .with_description("API reference")
            .with_priority(Priority::High);
        let task = Task::from_draft(draft, ColumnId::from("todo"), Position::new(3.0));

        assert_eq!(task.title, "Write docs");
        assert_eq!(task.description, "API reference");
        assert_eq!(task.priority, Some(Priority::High));
        assert_eq!(task.column_id.as_str(), "todo");
    }

    #[test]
    fn test_summary() {
        let task = Task::from_draft(
            TaskDraft::new("T"),
            ColumnId::from("doing"),
            Position::new(2.0),
        );
        let summary = task.summary();
        assert_eq!(summary.id, task.id);
        assert_eq!(summary.column_id.as_str(), "doing");
        assert_eq!(summary.position, Position::new(2.0));
    }

    #[test]
    fn test_task_serialization() {
        let task = Task::from_draft(TaskDraft::new("T"), ColumnId::from("todo"), Position::ORIGIN);
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["column_id"], "todo");
        assert_eq!(json["position"], 0.0);
        assert!(json.get("priority").is_none());
    }
}
