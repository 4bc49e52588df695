//! Error types for the ordering engine

use crate::config::ConfigError;
use crate::persist::PersistError;
use thiserror::Error;

/// Result type for ordering operations
pub type Result<T> = std::result::Result<T, OrderError>;

/// Errors that can occur in ordering operations.
///
/// Expected move results (capacity, busy, rollback) are reported through
/// [`MoveOutcome`](crate::MoveOutcome) instead. An `OrderError` means the
/// request itself was invalid or an auxiliary call failed.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Task not found in the local store
    #[error("task not found: {id}")]
    TaskNotFound { id: String },

    /// Column not found in the local store
    #[error("column not found: {id}")]
    ColumnNotFound { id: String },

    /// Target index is past the end of the destination column
    #[error("index {index} out of range for column '{column}' with {len} tasks")]
    IndexOutOfRange {
        column: String,
        index: usize,
        len: usize,
    },

    /// A move of this task is in flight
    #[error("task {id} has a move in flight")]
    TaskBusy { id: String },

    /// Destination column is filtered, paginated, or not sorted by position
    #[error("column '{column}' is not reorderable in its current view")]
    NotReorderable { column: String },

    /// Renumber plan does not match the column it targets
    #[error("invalid renumber plan for column '{column}': {message}")]
    InvalidRenumber { column: String, message: String },

    /// Cached column order no longer satisfies the ordering invariant
    #[error("ordering invariant violated in column '{column}': {message}")]
    InvariantViolation { column: String, message: String },

    /// Duplicate ID
    #[error("duplicate {item_type} ID: {id}")]
    DuplicateId { item_type: String, id: String },

    /// Authoritative store call failed outside of a move
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl OrderError {
    /// Create a task not found error
    pub fn task_not_found(id: impl ToString) -> Self {
        Self::TaskNotFound { id: id.to_string() }
    }

    /// Create a column not found error
    pub fn column_not_found(id: impl ToString) -> Self {
        Self::ColumnNotFound { id: id.to_string() }
    }

    /// Create a duplicate ID error
    pub fn duplicate_id(item_type: impl Into<String>, id: impl ToString) -> Self {
        Self::DuplicateId {
            item_type: item_type.into(),
            id: id.to_string(),
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persist(err) if err.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrderError::task_not_found("abc123");
        assert_eq!(err.to_string(), "task not found: abc123");
    }

    #[test]
    fn test_index_out_of_range_display() {
        let err = OrderError::IndexOutOfRange {
            column: "todo".into(),
            index: 5,
            len: 2,
        };
        assert_eq!(
            err.to_string(),
            "index 5 out of range for column 'todo' with 2 tasks"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(OrderError::Persist(PersistError::transport("timeout")).is_retryable());
        assert!(!OrderError::Persist(PersistError::conflict("stale")).is_retryable());
        assert!(!OrderError::task_not_found("x").is_retryable());
    }
}
