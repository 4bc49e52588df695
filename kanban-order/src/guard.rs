//! Concurrency guard: at most one in-flight move per task

use crate::types::TaskId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

/// Tracks which tasks currently have a move in flight
#[derive(Debug, Clone, Default)]
pub struct MoveGuard {
    in_flight: Arc<Mutex<HashSet<TaskId>>>,
}

/// Returned by [`MoveGuard::begin_move`] when the task is already moving
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Busy {
    pub task_id: TaskId,
}

impl MoveGuard {
    /// Create an empty guard
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the task for a move. The claim lasts until the token is released or dropped.
    pub fn begin_move(&self, task_id: &TaskId) -> Result<MoveToken, Busy> {
        if !self.lock().insert(task_id.clone()) {
            trace!(task = %task_id, "Move already in flight");
            return Err(Busy {
                task_id: task_id.clone(),
            });
        }
        Ok(MoveToken {
            guard: self.clone(),
            task_id: task_id.clone(),
        })
    }

    /// Release a token. Same as dropping it.
    pub fn end_move(&self, token: MoveToken) {
        drop(token);
    }

    /// Check if a task has a move in flight
    pub fn is_moving(&self, task_id: &TaskId) -> bool {
        self.lock().contains(task_id)
    }

    /// Number of moves in flight
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    // The set is only ever inserted into or removed from, so a poisoned lock
    // still holds a consistent set.
    fn lock(&self) -> MutexGuard<'_, HashSet<TaskId>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Proof that a task's move slot is held
#[derive(Debug)]
pub struct MoveToken {
    guard: MoveGuard,
    task_id: TaskId,
}

impl MoveToken {
    /// The task this token belongs to
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }
}

impl Drop for MoveToken {
    fn drop(&mut self) {
        self.guard.lock().remove(&self.task_id);
        trace!(task = %self.task_id, "Released move token");
    }
}
