//! Core types for the ordering engine

mod board;
mod ids;
mod position;
mod task;
mod view;

// Re-export all types
pub use board::{Board, Column};
pub use ids::{BoardId, ColumnId, TaskId};
pub use position::Position;
pub use task::{Priority, Task, TaskDraft, TaskSummary};
pub use view::{ColumnQuery, ColumnViewState, Page, SortKey};
