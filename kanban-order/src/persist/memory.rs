//! InMemoryBackend - an authoritative store kept in process memory
//!
//! Validates every write the way a real store would (unknown tasks or
//! columns, stale positions and WIP limits are conflicts) and treats a
//! replayed move as already applied. Faults and stalls can be injected so
//! callers can exercise rollback and in-flight behavior.

use super::{MoveBackend, PersistError, PersistResult};
use crate::allocator::PositionAllocator;
use crate::types::{
    Board, ColumnId, ColumnQuery, Position, SortKey, Task, TaskDraft, TaskId, TaskSummary,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, trace};

#[derive(Debug)]
struct BackendState {
    board: Board,
    tasks: HashMap<TaskId, Task>,
}

impl BackendState {
    fn column_exists(&self, column: &ColumnId) -> bool {
        self.board.find_column(column).is_some()
    }

    /// Column tasks ascending by position
    fn ordered(&self, column: &ColumnId) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| &t.column_id == column)
            .collect();
        tasks.sort_by_key(|t| t.position);
        tasks
    }
}

#[derive(Debug, Default)]
struct Faults {
    next_move: Option<PersistError>,
    next_renumber: Option<PersistError>,
    move_of: HashMap<TaskId, PersistError>,
}

/// Which writes are stalled: all of them, or moves of specific tasks
#[derive(Debug, Default)]
struct Hold {
    all: bool,
    tasks: HashSet<TaskId>,
}

impl Hold {
    fn blocks(&self, task: Option<&TaskId>) -> bool {
        self.all || task.is_some_and(|t| self.tasks.contains(t))
    }
}

/// Authoritative task store held in memory
#[derive(Debug)]
pub struct InMemoryBackend {
    state: RwLock<BackendState>,
    allocator: PositionAllocator,
    faults: Mutex<Faults>,
    hold: watch::Sender<Hold>,
    latency: Option<Duration>,
    move_calls: AtomicUsize,
    renumber_calls: AtomicUsize,
    waiting: AtomicUsize,
}

impl InMemoryBackend {
    /// Create a backend for a board with no tasks
    pub fn new(board: Board) -> Self {
        Self::with_tasks(board, Vec::new())
    }

    /// Create a backend for a board with existing tasks
    pub fn with_tasks(board: Board, tasks: Vec<Task>) -> Self {
        let (hold, _) = watch::channel(Hold::default());
        Self {
            state: RwLock::new(BackendState {
                board,
                tasks: tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
            }),
            allocator: PositionAllocator::default(),
            faults: Mutex::new(Faults::default()),
            hold,
            latency: None,
            move_calls: AtomicUsize::new(0),
            renumber_calls: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Use a specific allocator for task creation
    pub fn with_allocator(mut self, allocator: PositionAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    /// Delay every write by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next `persist_move` fail with `error`
    pub fn fail_next_move(&self, error: PersistError) {
        self.faults().next_move = Some(error);
    }

    /// Make the next `persist_renumber` fail with `error`
    pub fn fail_next_renumber(&self, error: PersistError) {
        self.faults().next_renumber = Some(error);
    }

    /// Make the next `persist_move` of `task` fail with `error`
    pub fn fail_move_of(&self, task: &TaskId, error: PersistError) {
        self.faults().move_of.insert(task.clone(), error);
    }

    /// Stall writes until [`release`](Self::release) is called
    pub fn hold(&self) {
        self.hold.send_modify(|hold| hold.all = true);
    }

    /// Let stalled writes proceed
    pub fn release(&self) {
        self.hold.send_modify(|hold| hold.all = false);
    }

    /// Stall moves of one task until [`release_task`](Self::release_task)
    pub fn hold_task(&self, task: &TaskId) {
        self.hold.send_modify(|hold| {
            hold.tasks.insert(task.clone());
        });
    }

    /// Let stalled moves of `task` proceed
    pub fn release_task(&self, task: &TaskId) {
        self.hold.send_modify(|hold| {
            hold.tasks.remove(task);
        });
    }

    /// Number of writes currently stalled by [`hold`](Self::hold)
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Number of `persist_move` calls received
    pub fn move_calls(&self) -> usize {
        self.move_calls.load(Ordering::SeqCst)
    }

    /// Number of `persist_renumber` calls received
    pub fn renumber_calls(&self) -> usize {
        self.renumber_calls.load(Ordering::SeqCst)
    }

    /// The stored task
    pub async fn task(&self, id: &TaskId) -> Option<Task> {
        self.state.read().await.tasks.get(id).cloned()
    }

    /// Task IDs of a column in position order
    pub async fn column_order(&self, column: &ColumnId) -> Vec<TaskId> {
        self.state
            .read()
            .await
            .ordered(column)
            .into_iter()
            .map(|t| t.id.clone())
            .collect()
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Simulated network: latency, then any hold covering `task`
    async fn round_trip(&self, task: Option<&TaskId>) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut held = self.hold.subscribe();
        let blocked = held.borrow_and_update().blocks(task);
        if blocked {
            let _waiting = Waiting::enter(&self.waiting);
            // The sender lives as long as `self`, so this cannot fail while we wait.
            let _ = held.wait_for(|hold| !hold.blocks(task)).await;
        }
    }

    fn injected_move_fault(&self, task: &TaskId) -> Option<PersistError> {
        let mut faults = self.faults();
        faults.next_move.take().or_else(|| faults.move_of.remove(task))
    }
}

/// Counts a stalled write; uncounted again when the write resumes or is dropped
struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MoveBackend for InMemoryBackend {
    async fn persist_move(
        &self,
        task: &TaskId,
        dest: &ColumnId,
        position: Position,
    ) -> PersistResult<()> {
        self.move_calls.fetch_add(1, Ordering::SeqCst);
        self.round_trip(Some(task)).await;
        if let Some(err) = self.injected_move_fault(task) {
            debug!(%task, %err, "Injected move failure");
            return Err(err);
        }

        let mut state = self.state.write().await;
        if !state.column_exists(dest) {
            return Err(PersistError::conflict(format!("column {dest} does not exist")));
        }
        let current = state
            .tasks
            .get(task)
            .ok_or_else(|| PersistError::conflict(format!("task {task} does not exist")))?;
        if &current.column_id == dest && current.position == position {
            return Err(PersistError::AlreadyApplied);
        }

        let entering = &current.column_id != dest;
        let occupants = state.ordered(dest);
        if occupants
            .iter()
            .any(|t| &t.id != task && t.position == position)
        {
            return Err(PersistError::conflict(format!(
                "position {position} in column {dest} is taken"
            )));
        }
        let limit = state.board.find_column(dest).and_then(|c| c.wip_limit);
        if let Some(limit) = limit {
            if entering && occupants.len() >= limit {
                return Err(PersistError::conflict(format!(
                    "column {dest} is at its WIP limit"
                )));
            }
        }

        if let Some(stored) = state.tasks.get_mut(task) {
            stored.column_id = dest.clone();
            stored.position = position;
        }
        trace!(%task, %dest, %position, "Persisted move");
        Ok(())
    }

    async fn persist_renumber(
        &self,
        column: &ColumnId,
        entries: &[(TaskId, Position)],
    ) -> PersistResult<()> {
        self.renumber_calls.fetch_add(1, Ordering::SeqCst);
        self.round_trip(None).await;
        if let Some(err) = self.faults().next_renumber.take() {
            debug!(%column, %err, "Injected renumber failure");
            return Err(err);
        }

        let mut state = self.state.write().await;
        if !state.column_exists(column) {
            return Err(PersistError::conflict(format!(
                "column {column} does not exist"
            )));
        }
        if entries.windows(2).any(|w| w[0].1 >= w[1].1) {
            return Err(PersistError::conflict("renumber positions must increase"));
        }
        let listed: HashSet<&TaskId> = entries.iter().map(|(id, _)| id).collect();
        let occupants = state.ordered(column);
        for (id, _) in entries {
            if !occupants.iter().any(|t| &t.id == id) {
                return Err(PersistError::conflict(format!(
                    "task {id} is not in column {column}"
                )));
            }
        }
        let taken: HashSet<Position> = entries.iter().map(|(_, p)| *p).collect();
        if let Some(clash) = occupants
            .iter()
            .find(|t| !listed.contains(&t.id) && taken.contains(&t.position))
        {
            return Err(PersistError::conflict(format!(
                "position {} is held by unlisted task {}",
                clash.position, clash.id
            )));
        }

        for (id, position) in entries {
            if let Some(task) = state.tasks.get_mut(id) {
                task.position = *position;
            }
        }
        debug!(%column, tasks = entries.len(), "Persisted renumber");
        Ok(())
    }

    async fn fetch_column_tasks(
        &self,
        column: &ColumnId,
        query: &ColumnQuery,
    ) -> PersistResult<Vec<TaskSummary>> {
        let state = self.state.read().await;
        if !state.column_exists(column) {
            return Err(PersistError::conflict(format!(
                "column {column} does not exist"
            )));
        }

        let needle = query
            .filter
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_lowercase);
        let mut tasks: Vec<&Task> = state
            .ordered(column)
            .into_iter()
            .filter(|t| {
                needle.as_ref().is_none_or(|n| {
                    t.title.to_lowercase().contains(n) || t.description.to_lowercase().contains(n)
                })
            })
            .collect();

        match query.sort {
            SortKey::Position => {}
            SortKey::Title => tasks.sort_by(|a, b| a.title.cmp(&b.title)),
            SortKey::Priority => tasks.sort_by(|a, b| b.priority.cmp(&a.priority)),
            SortKey::CreatedAt => tasks.sort_by_key(|t| t.created_at),
        }

        let summaries = tasks.into_iter().map(Task::summary);
        Ok(match query.page {
            Some(page) => summaries
                .skip(page.index.saturating_mul(page.size))
                .take(page.size)
                .collect(),
            None => summaries.collect(),
        })
    }

    async fn get_wip_limit(&self, column: &ColumnId) -> PersistResult<Option<usize>> {
        let state = self.state.read().await;
        state
            .board
            .find_column(column)
            .map(|c| c.wip_limit)
            .ok_or_else(|| PersistError::conflict(format!("column {column} does not exist")))
    }

    async fn create_task(&self, column: &ColumnId, draft: TaskDraft) -> PersistResult<Task> {
        self.round_trip(None).await;
        let mut state = self.state.write().await;
        if !state.column_exists(column) {
            return Err(PersistError::conflict(format!(
                "column {column} does not exist"
            )));
        }

        let existing: Vec<TaskSummary> = state
            .ordered(column)
            .into_iter()
            .map(Task::summary)
            .collect();
        let allocation = self
            .allocator
            .append(column, &existing)
            .map_err(|e| PersistError::conflict(e.to_string()))?;
        if let Some(plan) = &allocation.renumber {
            for (id, position) in &plan.entries {
                if let Some(task) = state.tasks.get_mut(id) {
                    task.position = *position;
                }
            }
        }

        let task = Task::from_draft(draft, column.clone(), allocation.position);
        state.tasks.insert(task.id.clone(), task.clone());
        debug!(task = %task.id, %column, position = %task.position, "Created task");
        Ok(task)
    }

    async fn delete_task(&self, task: &TaskId) -> PersistResult<()> {
        self.round_trip(None).await;
        let mut state = self.state.write().await;
        state
            .tasks
            .remove(task)
            .map(|_| ())
            .ok_or_else(|| PersistError::conflict(format!("task {task} does not exist")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, Priority};

    fn board() -> Board {
        let board = Board::with_default_columns("Test");
        let review = Column::new("review", board.id.clone(), "Review").with_wip_limit(1);
        board.with_column(review)
    }

    async fn backend_with(titles: &[&str]) -> (InMemoryBackend, Vec<Task>) {
        let backend = InMemoryBackend::new(board());
        let mut tasks = Vec::new();
        for title in titles {
            tasks.push(
                backend
                    .create_task(&ColumnId::from("todo"), TaskDraft::new(*title))
                    .await
                    .unwrap(),
            );
        }
        (backend, tasks)
    }

    #[tokio::test]
    async fn test_create_appends_with_max_plus_one() {
        let (_backend, tasks) = backend_with(&["a", "b", "c"]).await;
        let positions: Vec<f64> = tasks.iter().map(|t| t.position.value()).collect();
        assert_eq!(positions, vec![0.0, 1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_persist_move_and_replay() {
        let (backend, tasks) = backend_with(&["a"]).await;
        let done = ColumnId::from("done");

        backend
            .persist_move(&tasks[0].id, &done, Position::ORIGIN)
            .await
            .unwrap();
        assert_eq!(backend.task(&tasks[0].id).await.unwrap().column_id, done);

        let replay = backend
            .persist_move(&tasks[0].id, &done, Position::ORIGIN)
            .await;
        assert_eq!(replay, Err(PersistError::AlreadyApplied));
    }

    #[tokio::test]
    async fn test_persist_move_conflicts() {
        let (backend, tasks) = backend_with(&["a", "b"]).await;
        let todo = ColumnId::from("todo");

        let taken = backend
            .persist_move(&tasks[0].id, &todo, tasks[1].position)
            .await;
        assert!(matches!(taken, Err(PersistError::Conflict { .. })));

        let missing = backend
            .persist_move(&TaskId::from("ghost"), &todo, Position::new(9.0))
            .await;
        assert!(matches!(missing, Err(PersistError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_persist_move_respects_wip_limit() {
        let (backend, tasks) = backend_with(&["a", "b"]).await;
        let review = ColumnId::from("review");

        backend
            .persist_move(&tasks[0].id, &review, Position::ORIGIN)
            .await
            .unwrap();
        let second = backend
            .persist_move(&tasks[1].id, &review, Position::new(1.0))
            .await;
        assert!(matches!(second, Err(PersistError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let (backend, tasks) = backend_with(&["a"]).await;
        let done = ColumnId::from("done");
        backend.fail_next_move(PersistError::transport("connection reset"));

        let first = backend.persist_move(&tasks[0].id, &done, Position::ORIGIN).await;
        assert!(matches!(first, Err(PersistError::Transport { .. })));
        backend
            .persist_move(&tasks[0].id, &done, Position::ORIGIN)
            .await
            .unwrap();
        assert_eq!(backend.move_calls(), 2);
    }

    #[tokio::test]
    async fn test_hold_and_fault_for_one_task() {
        let (backend, tasks) = backend_with(&["a", "b"]).await;
        let backend = std::sync::Arc::new(backend);
        let done = ColumnId::from("done");
        backend.hold_task(&tasks[0].id);
        backend.fail_move_of(&tasks[0].id, PersistError::conflict("stale"));

        let held = tokio::spawn({
            let backend = backend.clone();
            let (id, done) = (tasks[0].id.clone(), done.clone());
            async move { backend.persist_move(&id, &done, Position::ORIGIN).await }
        });
        while backend.waiting() == 0 {
            tokio::task::yield_now().await;
        }

        backend
            .persist_move(&tasks[1].id, &done, Position::new(5.0))
            .await
            .unwrap();
        backend.release_task(&tasks[0].id);

        let first = held.await.unwrap();
        assert!(matches!(first, Err(PersistError::Conflict { .. })));
        assert_eq!(backend.waiting(), 0);
        assert_eq!(backend.column_order(&done).await, vec![tasks[1].id.clone()]);
    }

    #[tokio::test]
    async fn test_persist_renumber() {
        let (backend, tasks) = backend_with(&["a", "b"]).await;
        let todo = ColumnId::from("todo");
        let entries = vec![
            (tasks[0].id.clone(), Position::new(0.0)),
            (tasks[1].id.clone(), Position::new(1000.0)),
        ];

        backend.persist_renumber(&todo, &entries).await.unwrap();
        assert_eq!(
            backend.task(&tasks[1].id).await.unwrap().position,
            Position::new(1000.0)
        );

        let clash = backend
            .persist_renumber(&todo, &[(tasks[0].id.clone(), Position::new(1000.0))])
            .await;
        assert!(matches!(clash, Err(PersistError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_fetch_with_filter_sort_and_page() {
        let backend = InMemoryBackend::new(board());
        let todo = ColumnId::from("todo");
        for (title, priority) in [
            ("Fix bug", Priority::Low),
            ("Write docs", Priority::High),
            ("Bug triage", Priority::Medium),
        ] {
            backend
                .create_task(&todo, TaskDraft::new(title).with_priority(priority))
                .await
                .unwrap();
        }

        let all = backend
            .fetch_column_tasks(&todo, &ColumnQuery::full())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].position < w[1].position));

        let bugs = backend
            .fetch_column_tasks(&todo, &ColumnQuery::full().with_filter("BUG"))
            .await
            .unwrap();
        assert_eq!(bugs.len(), 2);

        let by_priority = backend
            .fetch_column_tasks(&todo, &ColumnQuery::full().with_sort(SortKey::Priority))
            .await
            .unwrap();
        assert_eq!(by_priority[0].id, all[1].id);

        let page = backend
            .fetch_column_tasks(&todo, &ColumnQuery::full().with_page(1, 2))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, all[2].id);
    }

    #[tokio::test]
    async fn test_wip_limit_lookup() {
        let backend = InMemoryBackend::new(board());
        assert_eq!(
            backend.get_wip_limit(&ColumnId::from("review")).await.unwrap(),
            Some(1)
        );
        assert_eq!(
            backend.get_wip_limit(&ColumnId::from("todo")).await.unwrap(),
            None
        );
        assert!(backend.get_wip_limit(&ColumnId::from("nope")).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_leaves_gaps() {
        let (backend, tasks) = backend_with(&["a", "b", "c"]).await;
        backend.delete_task(&tasks[1].id).await.unwrap();

        let todo = ColumnId::from("todo");
        assert_eq!(
            backend.column_order(&todo).await,
            vec![tasks[0].id.clone(), tasks[2].id.clone()]
        );
        assert_eq!(
            backend.task(&tasks[2].id).await.unwrap().position,
            Position::new(2.0)
        );
    }
}
