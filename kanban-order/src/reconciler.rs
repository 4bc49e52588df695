//! MoveReconciler - optimistic moves against an authoritative store
//!
//! A move runs through `Idle -> OptimisticallyApplied -> Confirmed` or
//! `OptimisticallyApplied -> RolledBack`:
//!
//! 1. claim the task in the [`MoveGuard`] (a second move of the same task is
//!    `RejectedBusy`)
//! 2. check the destination view is reorderable and the [`WipPolicy`] admits
//!    the task (`RejectedCapacity` mutates nothing)
//! 3. snapshot source and destination, apply the move locally and notify
//!    subscribers
//! 4. persist the renumber plan (if any) and the move
//! 5. on success keep the local state; on failure, cancellation or timeout
//!    undo the local move and report `RolledBack`
//!
//! Steps 1-3 and the rollback happen under one lock with no await, so a
//! subscriber never observes a half-applied move. The only suspension point
//! is the persist call. A rollback reverts only what this move changed;
//! moves that landed in the same columns meanwhile are kept. If the request
//! future is dropped while persisting, the move is rolled back on drop.

use crate::allocator::PositionAllocator;
use crate::config::OrderingConfig;
use crate::error::{OrderError, Result};
use crate::guard::{MoveGuard, MoveToken};
use crate::persist::{MoveBackend, PersistError};
use crate::store::{AppliedMove, MoveSnapshot, OrderedColumnStore};
use crate::types::{
    Board, ColumnId, ColumnQuery, ColumnViewState, Position, Task, TaskDraft, TaskId, TaskSummary,
};
use crate::wip::{WipDecision, WipPolicy};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Where a move is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MovePhase {
    Idle,
    OptimisticallyApplied,
    Confirmed,
    RolledBack,
}

/// Why an optimistic move was reverted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RollbackReason {
    /// The store rejected the move
    Conflict { message: String },
    /// The store could not be reached or did not answer in time
    Transport { message: String },
    /// The caller cancelled the move while it was persisting
    Cancelled,
}

impl RollbackReason {
    /// Re-issuing the same move may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<PersistError> for RollbackReason {
    fn from(error: PersistError) -> Self {
        match error {
            PersistError::Conflict { message } => Self::Conflict { message },
            PersistError::Transport { message } => Self::Transport { message },
            // Callers treat this as success; kept total for completeness.
            PersistError::AlreadyApplied => Self::Conflict {
                message: "already applied".into(),
            },
        }
    }
}

impl std::fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conflict { message } => write!(f, "conflict: {message}"),
            Self::Transport { message } => write!(f, "transport error: {message}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Result of [`MoveReconciler::request_move`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MoveOutcome {
    /// Persisted; the task sits at `position` in `column`
    Applied { column: ColumnId, position: Position },
    /// The task was dropped onto its own slot; nothing happened
    Unchanged,
    /// The destination is at its WIP limit; nothing happened
    RejectedCapacity { reason: String },
    /// A move of this task is already in flight; nothing happened
    RejectedBusy,
    /// Persisting failed and the local state was restored
    RolledBack { reason: RollbackReason },
}

impl MoveOutcome {
    /// Check if the move took effect
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Change notification for subscribers that render the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum StoreChange {
    /// A column was (re)loaded from the authoritative store
    ColumnLoaded { column: ColumnId },
    /// A move changed phase; `columns` are the columns whose order changed
    Move {
        task: TaskId,
        phase: MovePhase,
        columns: Vec<ColumnId>,
    },
    /// A task was created
    TaskInserted { task: TaskId, column: ColumnId },
    /// A task was deleted
    TaskRemoved { task: TaskId, column: ColumnId },
}

#[derive(Debug, Default)]
struct LocalState {
    store: OrderedColumnStore,
    wip: WipPolicy,
    views: HashMap<ColumnId, ColumnViewState>,
}

impl LocalState {
    fn is_reorderable(&self, column: &ColumnId) -> bool {
        self.views
            .get(column)
            .is_none_or(ColumnViewState::is_reorderable)
    }
}

/// Local move, prepared and applied under the lock
struct Prepared {
    snapshot: MoveSnapshot,
    applied: AppliedMove,
}

enum Admission {
    Proceed(Prepared),
    Done(MoveOutcome),
}

/// A locally applied move waiting for the store's answer.
///
/// Owns the snapshot and the guard token. Dropping it before
/// [`confirm`](Self::confirm) (the caller's future was cancelled, timed out
/// or aborted) undoes the local move and reports `RolledBack`.
struct PendingMove {
    reconciler: MoveReconciler,
    task_id: TaskId,
    dest: ColumnId,
    columns: Vec<ColumnId>,
    snapshot: Option<MoveSnapshot>,
    renumber_persisted: AtomicBool,
    token: Option<MoveToken>,
}

impl PendingMove {
    /// Keep the local move and release the task
    fn confirm(mut self) {
        self.snapshot = None;
    }

    /// Undo the local move; returns the columns that need a reload
    fn roll_back(mut self) -> Vec<ColumnId> {
        self.undo()
    }

    fn undo(&mut self) -> Vec<ColumnId> {
        let Some(snapshot) = self.snapshot.take() else {
            return Vec::new();
        };
        let mut stale = self.reconciler.lock().store.restore(snapshot);
        self.reconciler.notify(StoreChange::Move {
            task: self.task_id.clone(),
            phase: MovePhase::RolledBack,
            columns: self.columns.clone(),
        });
        self.token.take();

        if self.renumber_persisted.load(Ordering::SeqCst) && !stale.contains(&self.dest) {
            // The store kept the new spacing.
            stale.push(self.dest.clone());
        }
        stale
    }
}

impl Drop for PendingMove {
    fn drop(&mut self) {
        if self.snapshot.is_none() {
            return;
        }
        warn!(
            task = %self.task_id,
            phase = ?MovePhase::RolledBack,
            "Move dropped while persisting"
        );
        let mut stale = self.undo();
        if self.reconciler.guard.in_flight() == 0 {
            // The request may still reach the store.
            for column in &self.columns {
                if !stale.contains(column) {
                    stale.push(column.clone());
                }
            }
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let reconciler = self.reconciler.clone();
                runtime.spawn(async move { reconciler.refresh_columns(&stale).await });
            }
            Err(_) => debug!("No runtime to refresh columns after drop"),
        }
    }
}

/// Orchestrates optimistic moves over an [`OrderedColumnStore`]
#[derive(Clone)]
pub struct MoveReconciler {
    state: Arc<Mutex<LocalState>>,
    backend: Arc<dyn MoveBackend>,
    guard: MoveGuard,
    allocator: PositionAllocator,
    config: OrderingConfig,
    changes: broadcast::Sender<StoreChange>,
}

impl std::fmt::Debug for MoveReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoveReconciler")
            .field("guard", &self.guard)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MoveReconciler {
    /// Create a reconciler over a backend
    pub fn new(backend: Arc<dyn MoveBackend>, config: OrderingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(backend, config))
    }

    /// Create a reconciler with default configuration
    pub fn with_defaults(backend: Arc<dyn MoveBackend>) -> Self {
        Self::build(backend, OrderingConfig::default())
    }

    fn build(backend: Arc<dyn MoveBackend>, config: OrderingConfig) -> Self {
        let (changes, _) = broadcast::channel(config.notify_capacity);
        Self {
            state: Arc::new(Mutex::new(LocalState::default())),
            backend,
            guard: MoveGuard::new(),
            allocator: PositionAllocator::from_config(&config),
            config,
            changes,
        }
    }

    /// Receive a notification every time the local store changes
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// The concurrency guard
    pub fn guard(&self) -> &MoveGuard {
        &self.guard
    }

    /// Read the local store
    pub fn read<R>(&self, f: impl FnOnce(&OrderedColumnStore) -> R) -> R {
        f(&self.lock().store)
    }

    /// A column's tasks as currently cached, ascending by position
    pub fn ordered_tasks(&self, column: &ColumnId) -> Result<Vec<TaskSummary>> {
        self.lock().store.column_tasks(column)
    }

    /// Verify the local store's ordering invariant
    pub fn check_invariants(&self) -> Result<()> {
        self.lock().store.check_invariants()
    }

    // =========================================================================
    // Loading and views
    // =========================================================================

    /// Load every column of a board
    pub async fn load_board(&self, board: &Board) -> Result<()> {
        for column in &board.columns {
            self.load_column(&column.id).await?;
        }
        Ok(())
    }

    /// Fetch a column's full order and WIP limit into the local store
    #[instrument(skip_all, fields(column = %column))]
    pub async fn load_column(&self, column: &ColumnId) -> Result<()> {
        let tasks = self
            .backend
            .fetch_column_tasks(column, &ColumnQuery::full())
            .await?;
        let limit = self.backend.get_wip_limit(column).await?;
        {
            let mut state = self.lock();
            state.store.load_column(column, tasks)?;
            state.wip.set_limit(column, limit);
        }
        self.notify(StoreChange::ColumnLoaded {
            column: column.clone(),
        });
        Ok(())
    }

    /// Fetch the part of a column a caller wants to display and remember
    /// that view for [`is_reorderable`](Self::is_reorderable).
    ///
    /// The local store keeps the full order; the returned tasks are the view.
    pub async fn load_view(
        &self,
        column: &ColumnId,
        query: ColumnQuery,
    ) -> Result<Vec<TaskSummary>> {
        let visible = self.backend.fetch_column_tasks(column, &query).await?;
        self.set_view_state(column, ColumnViewState::new(query));
        Ok(visible)
    }

    /// Record how a column is being displayed
    pub fn set_view_state(&self, column: &ColumnId, view: ColumnViewState) {
        let reorderable = view.is_reorderable();
        self.lock().views.insert(column.clone(), view);
        debug!(%column, reorderable, "View state changed");
    }

    /// The recorded view of a column (default: full, position-sorted)
    pub fn view_state(&self, column: &ColumnId) -> ColumnViewState {
        self.lock().views.get(column).cloned().unwrap_or_default()
    }

    /// Whether moves into `column` are accepted in its current view
    pub fn is_reorderable(&self, column: &ColumnId) -> bool {
        self.lock().is_reorderable(column)
    }

    // =========================================================================
    // Moves
    // =========================================================================

    /// Move a task to `dest_index` of `dest`.
    ///
    /// `dest_index` counts the destination's tasks other than the moving one;
    /// use `0` for an empty column.
    pub async fn request_move(
        &self,
        task_id: &TaskId,
        dest: &ColumnId,
        dest_index: usize,
    ) -> Result<MoveOutcome> {
        self.request_move_with_cancel(task_id, dest, dest_index, CancellationToken::new())
            .await
    }

    /// [`request_move`](Self::request_move), rolled back if `cancel` fires
    /// before the store answers
    #[instrument(skip_all, fields(task = %task_id, dest = %dest, dest_index = dest_index))]
    pub async fn request_move_with_cancel(
        &self,
        task_id: &TaskId,
        dest: &ColumnId,
        dest_index: usize,
        cancel: CancellationToken,
    ) -> Result<MoveOutcome> {
        let token = match self.guard.begin_move(task_id) {
            Ok(token) => token,
            Err(_) => {
                debug!("Move rejected, task busy");
                return Ok(MoveOutcome::RejectedBusy);
            }
        };

        let Prepared { snapshot, applied } = match self.admit(task_id, dest, dest_index)? {
            Admission::Proceed(prepared) => prepared,
            Admission::Done(outcome) => return Ok(outcome),
        };
        let touched = touched_columns(&applied);
        let pending = PendingMove {
            reconciler: self.clone(),
            task_id: task_id.clone(),
            dest: applied.to.column_id.clone(),
            columns: touched.clone(),
            snapshot: Some(snapshot),
            renumber_persisted: AtomicBool::new(false),
            token: Some(token),
        };
        debug!(
            phase = ?MovePhase::OptimisticallyApplied,
            position = %applied.to.position,
            renumber = applied.renumber.is_some(),
            "Move applied locally"
        );
        self.notify(StoreChange::Move {
            task: task_id.clone(),
            phase: MovePhase::OptimisticallyApplied,
            columns: touched.clone(),
        });

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RollbackReason::Cancelled),
            result = self.persist_with_timeout(&applied, &pending.renumber_persisted) => result,
        };

        match result {
            Ok(()) => {
                let clobbered = self.lock().store.task(task_id) != Some(&applied.to);
                info!(
                    phase = ?MovePhase::Confirmed,
                    from = %applied.from.column_id,
                    position = %applied.to.position,
                    "Move confirmed"
                );
                self.notify(StoreChange::Move {
                    task: task_id.clone(),
                    phase: MovePhase::Confirmed,
                    columns: touched.clone(),
                });
                pending.confirm();

                if clobbered {
                    // A reload replaced this move's placement.
                    warn!("Confirmed placement no longer cached, refreshing");
                    self.refresh_columns(&touched).await;
                } else if self.config.refresh_on_confirm && self.guard.in_flight() == 0 {
                    self.refresh_columns(&touched).await;
                }

                Ok(MoveOutcome::Applied {
                    column: applied.to.column_id,
                    position: applied.to.position,
                })
            }
            Err(reason) => {
                warn!(phase = ?MovePhase::RolledBack, %reason, "Move rolled back");
                let stale = pending.roll_back();
                self.refresh_columns(&stale).await;

                Ok(MoveOutcome::RolledBack { reason })
            }
        }
    }

    /// Validate, run the local guards and apply the move, all under one lock
    fn admit(&self, task_id: &TaskId, dest: &ColumnId, dest_index: usize) -> Result<Admission> {
        let mut state = self.lock();

        if !state.store.has_column(dest) {
            return Err(OrderError::column_not_found(dest));
        }
        if !state.is_reorderable(dest) {
            return Err(OrderError::NotReorderable {
                column: dest.to_string(),
            });
        }
        let (source, index) = state
            .store
            .locate(task_id)
            .map(|(column, index)| (column.clone(), index))
            .ok_or_else(|| OrderError::task_not_found(task_id))?;

        if &source == dest && index == dest_index {
            debug!("Dropped onto own slot, nothing to do");
            return Ok(Admission::Done(MoveOutcome::Unchanged));
        }

        let decision = state.wip.can_accept(&state.store, dest, task_id)?;
        if let WipDecision::Rejected { reason } = decision {
            debug!(%reason, "Move rejected by WIP policy");
            return Ok(Admission::Done(MoveOutcome::RejectedCapacity { reason }));
        }

        let mut snapshot = state.store.snapshot(&[&source, dest], task_id);
        let applied = state
            .store
            .apply_move(task_id, dest, dest_index, &self.allocator)?;
        snapshot.record(&applied);
        debug_assert!(state.store.check_invariants().is_ok());

        Ok(Admission::Proceed(Prepared { snapshot, applied }))
    }

    async fn persist_with_timeout(
        &self,
        applied: &AppliedMove,
        renumber_persisted: &AtomicBool,
    ) -> std::result::Result<(), RollbackReason> {
        let persist = self.persist(applied, renumber_persisted);
        match self.config.persist_timeout() {
            Some(limit) => tokio::time::timeout(limit, persist)
                .await
                .map_err(|_| RollbackReason::Transport {
                    message: format!("timed out after {}ms", limit.as_millis()),
                })?,
            None => persist.await,
        }
    }

    /// Send the renumber plan (if any) and then the move itself
    async fn persist(
        &self,
        applied: &AppliedMove,
        renumber_persisted: &AtomicBool,
    ) -> std::result::Result<(), RollbackReason> {
        if let Some(plan) = &applied.renumber {
            let mut entries = plan.entries.clone();
            if !applied.changed_column() {
                // The store still holds the mover in this column; renumber it too
                // so no unlisted position can collide.
                let at = entries.partition_point(|(_, p)| *p < applied.to.position);
                entries.insert(at, (applied.task_id.clone(), applied.to.position));
            }
            self.backend
                .persist_renumber(&plan.column_id, &entries)
                .await?;
            renumber_persisted.store(true, Ordering::SeqCst);
        }

        match self
            .backend
            .persist_move(&applied.task_id, &applied.to.column_id, applied.to.position)
            .await
        {
            Ok(()) | Err(PersistError::AlreadyApplied) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Best-effort reload of columns after the store may have diverged
    async fn refresh_columns(&self, columns: &[ColumnId]) {
        for column in columns {
            if let Err(err) = self.load_column(column).await {
                warn!(%column, %err, "Failed to refresh column");
            }
        }
    }

    // =========================================================================
    // Creation and deletion
    // =========================================================================

    /// Create a task at the end of `column`
    #[instrument(skip_all, fields(column = %column))]
    pub async fn create_task(&self, column: &ColumnId, draft: TaskDraft) -> Result<Task> {
        if !self.lock().store.has_column(column) {
            return Err(OrderError::column_not_found(column));
        }
        let task = self.backend.create_task(column, draft).await?;

        let stale = match self.lock().store.insert_task(task.summary()) {
            Ok(()) => false,
            Err(err) => {
                debug!(%err, "Local insert failed, reloading column");
                true
            }
        };
        if stale {
            // The store renumbered or the cache is behind; take its order.
            self.load_column(column).await?;
        }
        self.notify(StoreChange::TaskInserted {
            task: task.id.clone(),
            column: column.clone(),
        });
        Ok(task)
    }

    /// Delete a task, leaving its neighbors' positions untouched
    #[instrument(skip_all, fields(task = %task_id))]
    pub async fn remove_task(&self, task_id: &TaskId) -> Result<()> {
        let token = self
            .guard
            .begin_move(task_id)
            .map_err(|busy| OrderError::TaskBusy {
                id: busy.task_id.to_string(),
            })?;
        if self.lock().store.task(task_id).is_none() {
            return Err(OrderError::task_not_found(task_id));
        }

        self.backend.delete_task(task_id).await?;
        let removed = self.lock().store.remove_task(task_id)?;
        self.guard.end_move(token);

        self.notify(StoreChange::TaskRemoved {
            task: task_id.clone(),
            column: removed.column_id,
        });
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    // Every store mutation is all-or-nothing, so a poisoned lock still holds
    // a consistent store.
    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

fn touched_columns(applied: &AppliedMove) -> Vec<ColumnId> {
    let mut columns = vec![applied.from.column_id.clone()];
    if applied.changed_column() {
        columns.push(applied.to.column_id.clone());
    }
    columns
}
