//! The authoritative store the engine reconciles against
//!
//! [`MoveBackend`] is the seam to whatever durable store owns the real task
//! order. The engine only needs atomic single-task moves, atomic column
//! renumbers, ordered column reads and the columns' WIP limits; creation and
//! deletion go through it too so that every position is assigned by the same
//! allocator.

mod memory;

pub use memory::InMemoryBackend;

use crate::types::{ColumnId, ColumnQuery, Position, Task, TaskDraft, TaskId, TaskSummary};
use async_trait::async_trait;
use thiserror::Error;

/// Result type for backend calls
pub type PersistResult<T> = std::result::Result<T, PersistError>;

/// Failures reported by the authoritative store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistError {
    /// The store rejected the request (deleted task, stale position, limit)
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// The request never got a definitive answer
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The exact same change was already applied
    #[error("already applied")]
    AlreadyApplied,
}

impl PersistError {
    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Transport failures may succeed when retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Operations consumed from the authoritative store
#[async_trait]
pub trait MoveBackend: Send + Sync {
    /// Atomically reassign a task's column and position
    async fn persist_move(
        &self,
        task: &TaskId,
        dest: &ColumnId,
        position: Position,
    ) -> PersistResult<()>;

    /// Atomically rewrite several positions of one column
    async fn persist_renumber(
        &self,
        column: &ColumnId,
        entries: &[(TaskId, Position)],
    ) -> PersistResult<()>;

    /// Read a column's tasks in the order the query asks for
    async fn fetch_column_tasks(
        &self,
        column: &ColumnId,
        query: &ColumnQuery,
    ) -> PersistResult<Vec<TaskSummary>>;

    /// The column's WIP limit; `None` means unlimited
    async fn get_wip_limit(&self, column: &ColumnId) -> PersistResult<Option<usize>>;

    /// Create a task at the end of a column
    async fn create_task(&self, column: &ColumnId, draft: TaskDraft) -> PersistResult<Task>;

    /// Delete a task; its neighbors keep their positions
    async fn delete_task(&self, task: &TaskId) -> PersistResult<()>;
}
