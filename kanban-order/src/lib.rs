//! Task ordering and move reconciliation for kanban boards
//!
//! This crate keeps the order of tasks inside the columns of a board and moves
//! tasks between (or within) columns optimistically: the move shows up locally
//! at once and is then reconciled with an authoritative store, which either
//! confirms it or causes a rollback.
//!
//! ## Overview
//!
//! - **Sparse positions** - Every task carries an `f64` position; a move only
//!   rewrites the moving task unless its neighbors are too close to split
//! - **Local store** - [`OrderedColumnStore`] holds each column strictly
//!   ascending by position, with snapshot/restore for rollback
//! - **Guards** - WIP limits and one in-flight move per task are checked before
//!   anything changes locally
//! - **Pluggable backend** - [`MoveBackend`] is the seam to the durable store;
//!   [`InMemoryBackend`] is a complete in-process implementation
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use kanban_order::{Board, ColumnId, InMemoryBackend, MoveOutcome, MoveReconciler, TaskDraft};
//! use std::sync::Arc;
//!
//! # async fn example() -> kanban_order::Result<()> {
//! let board = Board::with_default_columns("My Project");
//! let reconciler = MoveReconciler::with_defaults(Arc::new(InMemoryBackend::new(board.clone())));
//! reconciler.load_board(&board).await?;
//!
//! let task = reconciler
//!     .create_task(&ColumnId::from("todo"), TaskDraft::new("Write docs"))
//!     .await?;
//!
//! match reconciler.request_move(&task.id, &ColumnId::from("doing"), 0).await? {
//!     MoveOutcome::Applied { position, .. } => println!("moved to {position}"),
//!     other => println!("not moved: {other:?}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod config;
mod error;
pub mod guard;
pub mod persist;
mod reconciler;
pub mod store;
pub mod types;
pub mod wip;

pub use allocator::{Allocation, PositionAllocator, RenumberPlan};
pub use config::{ConfigError, OrderingConfig};
pub use error::{OrderError, Result};
pub use guard::{Busy, MoveGuard, MoveToken};
pub use persist::{InMemoryBackend, MoveBackend, PersistError, PersistResult};
pub use reconciler::{MoveOutcome, MovePhase, MoveReconciler, RollbackReason, StoreChange};
pub use store::{AppliedMove, MoveSnapshot, OrderedColumnStore, OrderedTasks};
pub use types::{
    Board, BoardId, Column, ColumnId, ColumnQuery, ColumnViewState, Page, Position, Priority,
    SortKey, Task, TaskDraft, TaskId, TaskSummary,
};
pub use wip::{WipDecision, WipPolicy};

// Re-exported so backend implementors use the same attribute version
pub use async_trait::async_trait;
