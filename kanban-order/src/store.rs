//! OrderedColumnStore - the local, optimistic view of task order
//!
//! Holds one ordered task-id sequence per column plus each task's cached
//! `{column_id, position}`. It is pure local state: nothing here talks to the
//! authoritative store. Every mutation either fully applies or leaves the
//! store untouched, and afterwards each column sequence is strictly ascending
//! by position and lists exactly the tasks whose cached column is that column.

use crate::allocator::{PositionAllocator, RenumberPlan};
use crate::error::{OrderError, Result};
use crate::types::{ColumnId, Position, TaskId, TaskSummary};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// State captured before an optimistic mutation, consumed to roll it back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveSnapshot {
    columns: Vec<(ColumnId, Vec<TaskSummary>)>,
    task: Option<TaskSummary>,
    effects: Option<HashMap<TaskId, TaskSummary>>,
}

impl MoveSnapshot {
    /// The captured columns
    pub fn column_ids(&self) -> impl Iterator<Item = &ColumnId> {
        self.columns.iter().map(|(id, _)| id)
    }

    /// The moving task's placement before the move, if it was captured
    pub fn task(&self) -> Option<&TaskSummary> {
        self.task.as_ref()
    }

    /// Remember the placements a move produced.
    ///
    /// A recorded snapshot only reverts tasks that still sit where this move
    /// put them, so changes made by other moves in the meantime survive the
    /// rollback.
    pub fn record(&mut self, applied: &AppliedMove) {
        let mut effects = HashMap::new();
        if let Some(plan) = &applied.renumber {
            for (id, position) in &plan.entries {
                effects.insert(
                    id.clone(),
                    TaskSummary {
                        id: id.clone(),
                        column_id: plan.column_id.clone(),
                        position: *position,
                    },
                );
            }
        }
        effects.insert(applied.task_id.clone(), applied.to.clone());
        self.effects = Some(effects);
    }

    /// Whether `current` is a placement this snapshot's move produced
    fn produced(&self, prior: &TaskSummary, current: &TaskSummary) -> bool {
        match &self.effects {
            Some(effects) => effects.get(&prior.id) == Some(current),
            // Unrecorded: the mover, and anything renumbered in place.
            None => {
                self.task.as_ref().is_some_and(|t| t.id == prior.id)
                    || current.column_id == prior.column_id
            }
        }
    }
}

/// What `apply_move` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    pub task_id: TaskId,
    pub from: TaskSummary,
    pub to: TaskSummary,
    pub renumber: Option<RenumberPlan>,
}

impl AppliedMove {
    /// True when the move crossed columns
    pub fn changed_column(&self) -> bool {
        self.from.column_id != self.to.column_id
    }
}

/// Iterator over a column's tasks in ascending position order.
///
/// Finite and lazy. Call [`OrderedColumnStore::ordered_tasks`] again to start over.
#[derive(Debug, Clone)]
pub struct OrderedTasks<'a> {
    ids: std::slice::Iter<'a, TaskId>,
    tasks: &'a HashMap<TaskId, TaskSummary>,
}

impl<'a> Iterator for OrderedTasks<'a> {
    type Item = &'a TaskSummary;

    fn next(&mut self) -> Option<Self::Item> {
        let tasks = self.tasks;
        self.ids.find_map(|id| tasks.get(id))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.ids.len()))
    }
}

/// Per-column ordered task sequences with cached placements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedColumnStore {
    columns: HashMap<ColumnId, Vec<TaskId>>,
    tasks: HashMap<TaskId, TaskSummary>,
}

impl OrderedColumnStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Check if a column is known
    pub fn has_column(&self, column: &ColumnId) -> bool {
        self.columns.contains_key(column)
    }

    /// Known column IDs, in no particular order
    pub fn column_ids(&self) -> impl Iterator<Item = &ColumnId> {
        self.columns.keys()
    }

    /// Tasks of a column, ascending by position
    pub fn ordered_tasks(&self, column: &ColumnId) -> Result<OrderedTasks<'_>> {
        let ids = self
            .columns
            .get(column)
            .ok_or_else(|| OrderError::column_not_found(column))?;
        Ok(OrderedTasks {
            ids: ids.iter(),
            tasks: &self.tasks,
        })
    }

    /// Owned copy of a column's tasks, ascending by position
    pub fn column_tasks(&self, column: &ColumnId) -> Result<Vec<TaskSummary>> {
        Ok(self.ordered_tasks(column)?.cloned().collect())
    }

    /// Task IDs of a column in order
    pub fn task_order(&self, column: &ColumnId) -> Result<&[TaskId]> {
        self.columns
            .get(column)
            .map(Vec::as_slice)
            .ok_or_else(|| OrderError::column_not_found(column))
    }

    /// Number of tasks in a column
    pub fn len(&self, column: &ColumnId) -> Result<usize> {
        Ok(self.task_order(column)?.len())
    }

    /// Cached placement of a task
    pub fn task(&self, id: &TaskId) -> Option<&TaskSummary> {
        self.tasks.get(id)
    }

    /// Column and index of a task
    pub fn locate(&self, id: &TaskId) -> Option<(&ColumnId, usize)> {
        let summary = self.tasks.get(id)?;
        let index = self
            .columns
            .get(&summary.column_id)?
            .iter()
            .position(|t| t == id)?;
        Some((&summary.column_id, index))
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Replace a column with an authoritative sequence.
    ///
    /// Tasks previously cached in this column but absent from `tasks` are
    /// dropped; tasks previously cached in another column are moved here.
    pub fn load_column(&mut self, column: &ColumnId, mut tasks: Vec<TaskSummary>) -> Result<()> {
        let mut seen = HashSet::with_capacity(tasks.len());
        for task in &mut tasks {
            if !seen.insert(task.id.clone()) {
                return Err(OrderError::duplicate_id("task", &task.id));
            }
            task.column_id = column.clone();
        }
        tasks.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
        if let Some(pair) = tasks.windows(2).find(|w| w[0].position == w[1].position) {
            return Err(OrderError::InvariantViolation {
                column: column.to_string(),
                message: format!(
                    "tasks {} and {} share position {}",
                    pair[0].id, pair[1].id, pair[0].position
                ),
            });
        }

        if let Some(old) = self.columns.remove(column) {
            for id in old {
                if self.tasks.get(&id).is_some_and(|t| &t.column_id == column) {
                    self.tasks.remove(&id);
                }
            }
        }
        for task in &tasks {
            self.detach(&task.id);
        }

        let ids = tasks.iter().map(|t| t.id.clone()).collect();
        for task in tasks {
            self.tasks.insert(task.id.clone(), task);
        }
        self.columns.insert(column.clone(), ids);

        debug!(%column, tasks = self.columns[column].len(), "Loaded column");
        Ok(())
    }

    /// Register an empty column if it is not known yet
    pub fn ensure_column(&mut self, column: &ColumnId) {
        self.columns.entry(column.clone()).or_default();
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert a task at its cached position (e.g. after creation)
    pub fn insert_task(&mut self, task: TaskSummary) -> Result<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(OrderError::duplicate_id("task", &task.id));
        }
        let index = self.insertion_index(&task.column_id, task.position)?;
        if let Some(ids) = self.columns.get_mut(&task.column_id) {
            ids.insert(index, task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Remove a task, leaving its neighbors' positions untouched
    pub fn remove_task(&mut self, id: &TaskId) -> Result<TaskSummary> {
        let summary = self
            .tasks
            .remove(id)
            .ok_or_else(|| OrderError::task_not_found(id))?;
        if let Some(ids) = self.columns.get_mut(&summary.column_id) {
            ids.retain(|t| t != id);
        }
        Ok(summary)
    }

    /// Move a task to `dest_index` of `dest`, allocating its new position.
    ///
    /// `dest_index` counts tasks in `dest` other than the moving one. A
    /// renumber plan from the allocator is applied as part of the same move.
    pub fn apply_move(
        &mut self,
        task_id: &TaskId,
        dest: &ColumnId,
        dest_index: usize,
        allocator: &PositionAllocator,
    ) -> Result<AppliedMove> {
        let from = self
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| OrderError::task_not_found(task_id))?;
        let others: Vec<TaskSummary> = self
            .ordered_tasks(dest)?
            .filter(|t| &t.id != task_id)
            .cloned()
            .collect();

        let allocation = allocator.allocate(dest, &others, dest_index)?;

        // Nothing below can fail: the plan covers exactly `others`.
        self.detach(task_id);
        if let Some(plan) = &allocation.renumber {
            self.renumber_unchecked(plan);
        }
        let to = TaskSummary {
            id: task_id.clone(),
            column_id: dest.clone(),
            position: allocation.position,
        };
        if let Some(ids) = self.columns.get_mut(dest) {
            ids.insert(dest_index, task_id.clone());
        }
        self.tasks.insert(task_id.clone(), to.clone());

        trace!(
            task = %task_id,
            from = %from.column_id,
            to = %dest,
            dest_index,
            position = %to.position,
            "Applied move"
        );
        Ok(AppliedMove {
            task_id: task_id.clone(),
            from,
            to,
            renumber: allocation.renumber,
        })
    }

    /// Rewrite every position in a column to the given plan.
    ///
    /// The plan must list exactly the column's tasks with strictly increasing
    /// positions. The column takes the plan's order.
    pub fn apply_renumber(&mut self, plan: &RenumberPlan) -> Result<()> {
        let column = &plan.column_id;
        let current = self.task_order(column)?;

        let invalid = |message: String| OrderError::InvalidRenumber {
            column: column.to_string(),
            message,
        };
        if current.len() != plan.entries.len() {
            return Err(invalid(format!(
                "plan has {} entries, column has {} tasks",
                plan.entries.len(),
                current.len()
            )));
        }
        let members: HashSet<&TaskId> = current.iter().collect();
        if let Some((id, _)) = plan.entries.iter().find(|(id, _)| !members.contains(id)) {
            return Err(invalid(format!("task {id} is not in the column")));
        }
        if plan.entries.windows(2).any(|w| w[0].1 >= w[1].1) {
            return Err(invalid("positions are not strictly increasing".into()));
        }

        self.renumber_unchecked(plan);
        Ok(())
    }

    // =========================================================================
    // Snapshot / restore
    // =========================================================================

    /// Capture the given columns and the task's placement
    pub fn snapshot(&self, columns: &[&ColumnId], task: &TaskId) -> MoveSnapshot {
        let mut captured: Vec<(ColumnId, Vec<TaskSummary>)> = Vec::with_capacity(columns.len());
        for column in columns {
            if captured.iter().any(|(id, _)| id == *column) {
                continue;
            }
            if let Ok(tasks) = self.column_tasks(column) {
                captured.push(((*column).clone(), tasks));
            }
        }
        trace!(task = %task, columns = captured.len(), "Captured snapshot");
        MoveSnapshot {
            columns: captured,
            task: self.tasks.get(task).cloned(),
            effects: None,
        }
    }

    /// Undo the snapshot's move.
    ///
    /// Only tasks still placed where the move put them are reverted. Tasks
    /// that arrived in or left a captured column since, or were deleted, are
    /// left alone. When a reverted task's old position has been taken in the
    /// meantime it is placed just above it, and its column is returned so the
    /// caller can reload it from the authoritative store.
    pub fn restore(&mut self, snapshot: MoveSnapshot) -> Vec<ColumnId> {
        let mut priors: Vec<&TaskSummary> = snapshot
            .columns
            .iter()
            .flat_map(|(_, tasks)| tasks.iter())
            .collect();
        if let Some(task) = &snapshot.task {
            if !priors.iter().any(|p| p.id == task.id) {
                priors.push(task);
            }
        }

        let mut reverted = Vec::new();
        for prior in priors {
            let Some(current) = self.tasks.get(&prior.id) else {
                continue;
            };
            if current == prior {
                continue;
            }
            if !snapshot.produced(prior, current) {
                trace!(task = %prior.id, "Placement changed by another move, keeping it");
                continue;
            }
            self.detach(&prior.id);
            self.tasks.remove(&prior.id);
            reverted.push(prior.clone());
        }

        let mut stale: Vec<ColumnId> = Vec::new();
        for mut prior in reverted {
            let column = prior.column_id.clone();
            self.ensure_column(&column);
            let free = self.free_position(&column, prior.position);
            if free != prior.position {
                debug!(
                    task = %prior.id,
                    %column,
                    taken = %prior.position,
                    "Old position taken, restoring above it"
                );
                prior.position = free;
                if !stale.contains(&column) {
                    stale.push(column.clone());
                }
            }
            if let Ok(index) = self.insertion_index(&column, prior.position) {
                if let Some(ids) = self.columns.get_mut(&column) {
                    ids.insert(index, prior.id.clone());
                }
                self.tasks.insert(prior.id.clone(), prior);
            }
        }
        trace!(stale = stale.len(), "Restored snapshot");
        stale
    }

    // =========================================================================
    // Invariants
    // =========================================================================

    /// Verify every column is strictly ascending and agrees with cached placements
    pub fn check_invariants(&self) -> Result<()> {
        let mut listed = 0usize;
        for (column, ids) in &self.columns {
            let violation = |message: String| OrderError::InvariantViolation {
                column: column.to_string(),
                message,
            };
            let mut previous: Option<Position> = None;
            for id in ids {
                let summary = self
                    .tasks
                    .get(id)
                    .ok_or_else(|| violation(format!("task {id} has no cached placement")))?;
                if &summary.column_id != column {
                    return Err(violation(format!(
                        "task {id} is listed here but cached in '{}'",
                        summary.column_id
                    )));
                }
                if previous.is_some_and(|p| p >= summary.position) {
                    return Err(violation(format!(
                        "task {id} at {} is not above its predecessor",
                        summary.position
                    )));
                }
                previous = Some(summary.position);
            }
            listed += ids.len();
        }
        if listed != self.tasks.len() {
            return Err(OrderError::InvariantViolation {
                column: String::new(),
                message: format!(
                    "{} tasks cached but {} listed in columns",
                    self.tasks.len(),
                    listed
                ),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Remove a task from whichever sequence holds it, keeping its summary
    fn detach(&mut self, id: &TaskId) {
        if let Some(summary) = self.tasks.get(id) {
            if let Some(ids) = self.columns.get_mut(&summary.column_id) {
                ids.retain(|t| t != id);
            }
        }
    }

    /// Where a task at `position` belongs in `column`
    fn insertion_index(&self, column: &ColumnId, position: Position) -> Result<usize> {
        let ids = self.task_order(column)?;
        let search = ids.binary_search_by(|id| {
            self.tasks
                .get(id)
                .map_or(std::cmp::Ordering::Less, |t| t.position.cmp(&position))
        });
        match search {
            Ok(_) => Err(OrderError::InvariantViolation {
                column: column.to_string(),
                message: format!("position {position} is already taken"),
            }),
            Err(index) => Ok(index),
        }
    }

    /// `position`, or the first free value above it in `column`
    fn free_position(&self, column: &ColumnId, position: Position) -> Position {
        let taken: HashSet<Position> = self
            .ordered_tasks(column)
            .map(|tasks| tasks.map(|t| t.position).collect())
            .unwrap_or_default();
        let mut position = position;
        while taken.contains(&position) {
            position = Position::new(position.value().next_up());
        }
        position
    }

    fn renumber_unchecked(&mut self, plan: &RenumberPlan) {
        for (id, position) in &plan.entries {
            if let Some(summary) = self.tasks.get_mut(id) {
                summary.position = *position;
            }
        }
        let ids = plan.entries.iter().map(|(id, _)| id.clone()).collect();
        self.columns.insert(plan.column_id.clone(), ids);
        debug!(column = %plan.column_id, tasks = plan.entries.len(), "Renumbered column");
    }
}
