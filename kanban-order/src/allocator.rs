//! Position allocation for inserted and moved tasks.
//!
//! Given the tasks already in a destination column (ascending by position,
//! excluding the task being moved) and a target index, the allocator picks a
//! position strictly between the neighbors at that index:
//!
//! - index `0`: one `append_step` below the first task (`0` in an empty column)
//! - index `len`: one `append_step` above the last task
//! - otherwise: the midpoint of the two neighbors
//!
//! When the neighbors are too close to split (or the arithmetic no longer
//! lands strictly between them) the allocator returns a [`RenumberPlan`]
//! spacing the whole column evenly, and computes the target position against
//! the renumbered sequence. Appending a newly created task is the `len` case.

use crate::config::OrderingConfig;
use crate::error::{OrderError, Result};
use crate::types::{ColumnId, Position, TaskId, TaskSummary};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Instruction to rewrite every position in a column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenumberPlan {
    pub column_id: ColumnId,
    /// New positions in the column's existing order
    pub entries: Vec<(TaskId, Position)>,
}

impl RenumberPlan {
    /// Positions only, in order
    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        self.entries.iter().map(|(_, p)| *p)
    }
}

/// Result of an allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub position: Position,
    /// Present when the column must be renumbered before `position` is valid
    pub renumber: Option<RenumberPlan>,
}

/// Computes positions for tasks landing in a column
#[derive(Debug, Clone)]
pub struct PositionAllocator {
    append_step: f64,
    min_gap: f64,
    renumber_spacing: f64,
}

impl Default for PositionAllocator {
    fn default() -> Self {
        Self::from_config(&OrderingConfig::default())
    }
}

impl PositionAllocator {
    /// Create an allocator from configuration
    pub fn from_config(config: &OrderingConfig) -> Self {
        Self {
            append_step: config.append_step,
            min_gap: config.min_gap,
            renumber_spacing: config.renumber_spacing,
        }
    }

    /// Allocate a position for a task landing at `target_index` of `column`.
    ///
    /// `tasks` must be the column's tasks ascending by position, without the
    /// moving task. `target_index` may equal `tasks.len()` (append).
    pub fn allocate(
        &self,
        column: &ColumnId,
        tasks: &[TaskSummary],
        target_index: usize,
    ) -> Result<Allocation> {
        if target_index > tasks.len() {
            return Err(OrderError::IndexOutOfRange {
                column: column.to_string(),
                index: target_index,
                len: tasks.len(),
            });
        }

        let positions: Vec<Position> = tasks.iter().map(|t| t.position).collect();
        if let Some(position) = self.slot(&positions, target_index) {
            debug!(%column, target_index, %position, "Allocated position");
            return Ok(Allocation {
                position,
                renumber: None,
            });
        }

        let plan = self.renumber_plan(column, tasks);
        let renumbered: Vec<Position> = plan.positions().collect();
        // Evenly spaced positions always leave room, so this only fails for a
        // column so large that `index * spacing` loses integer precision.
        let position = self.slot(&renumbered, target_index).unwrap_or_else(|| {
            Position::new(renumbered.last().map_or(0.0, |p| p.value()) + self.renumber_spacing)
        });

        debug!(
            %column,
            target_index,
            %position,
            tasks = tasks.len(),
            "Precision exhausted, renumbering column"
        );

        Ok(Allocation {
            position,
            renumber: Some(plan),
        })
    }

    /// Position for a newly created task: always the end of the column
    pub fn append(&self, column: &ColumnId, tasks: &[TaskSummary]) -> Result<Allocation> {
        self.allocate(column, tasks, tasks.len())
    }

    /// Evenly spaced positions for `tasks`, keeping their order
    pub fn renumber_plan(&self, column: &ColumnId, tasks: &[TaskSummary]) -> RenumberPlan {
        RenumberPlan {
            column_id: column.clone(),
            entries: tasks
                .iter()
                .enumerate()
                .map(|(i, t)| (t.id.clone(), Position::new(i as f64 * self.renumber_spacing)))
                .collect(),
        }
    }

    /// Position for `index` among `positions`, or `None` when precision is exhausted
    fn slot(&self, positions: &[Position], index: usize) -> Option<Position> {
        let before = index.checked_sub(1).and_then(|i| positions.get(i)).copied();
        let after = positions.get(index).copied();

        let candidate = match (before, after) {
            (None, None) => return Some(Position::ORIGIN),
            (None, Some(first)) => Position::new(first.value() - self.append_step),
            (Some(last), None) => Position::new(last.value() + self.append_step),
            (Some(prev), Some(next)) => {
                if prev.gap(next) <= self.min_gap {
                    return None;
                }
                prev.midpoint(next)
            }
        };

        let lower_ok = before.is_none_or(|b| b < candidate);
        let upper_ok = after.is_none_or(|a| candidate < a);
        (candidate.value().is_finite() && lower_ok && upper_ok).then_some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(positions: &[f64]) -> Vec<TaskSummary> {
        positions
            .iter()
            .enumerate()
            .map(|(i, p)| TaskSummary::new(format!("t{i}").as_str(), "todo", Position::new(*p)))
            .collect()
    }

    fn col() -> ColumnId {
        ColumnId::from("todo")
    }

    #[test]
    fn test_empty_column_gets_origin() {
        let alloc = PositionAllocator::default().allocate(&col(), &[], 0).unwrap();
        assert_eq!(alloc.position, Position::ORIGIN);
        assert!(alloc.renumber.is_none());
    }

    #[test]
    fn test_insert_first_goes_below() {
        let tasks = column(&[1.0, 2.0]);
        let alloc = PositionAllocator::default().allocate(&col(), &tasks, 0).unwrap();
        assert_eq!(alloc.position, Position::new(0.0));
    }

    #[test]
    fn test_append_goes_above_last() {
        let tasks = column(&[0.0, 1.0, 7.0]);
        let alloc = PositionAllocator::default().append(&col(), &tasks).unwrap();
        assert_eq!(alloc.position, Position::new(8.0));
        assert!(alloc.renumber.is_none());
    }

    #[test]
    fn test_insert_between_takes_midpoint() {
        let tasks = column(&[1.0, 2.0]);
        let alloc = PositionAllocator::default().allocate(&col(), &tasks, 1).unwrap();
        assert_eq!(alloc.position, Position::new(1.5));
    }

    #[test]
    fn test_index_out_of_range() {
        let tasks = column(&[1.0]);
        let err = PositionAllocator::default()
            .allocate(&col(), &tasks, 2)
            .unwrap_err();
        assert!(matches!(err, OrderError::IndexOutOfRange { index: 2, len: 1, .. }));
    }

    #[test]
    fn test_exhausted_gap_renumbers_and_lands_between() {
        let tasks = column(&[1.0, 1.000_000_000_1, 1.000_000_000_2]);
        let alloc = PositionAllocator::default().allocate(&col(), &tasks, 1).unwrap();

        let plan = alloc.renumber.expect("expected a renumber plan");
        let positions: Vec<f64> = plan.positions().map(Position::value).collect();
        assert_eq!(positions, vec![0.0, 1000.0, 2000.0]);
        assert_eq!(plan.entries[0].0, tasks[0].id);
        assert_eq!(alloc.position, Position::new(500.0));
    }

    #[test]
    fn test_repeated_midpoints_eventually_renumber() {
        let allocator = PositionAllocator::default();
        let mut tasks = column(&[0.0, 1.0]);
        let mut renumbered = false;

        for i in 0..64 {
            let alloc = allocator.allocate(&col(), &tasks, 1).unwrap();
            if let Some(plan) = alloc.renumber {
                for (task, (id, pos)) in tasks.iter_mut().zip(plan.entries) {
                    assert_eq!(task.id, id);
                    task.position = pos;
                }
                renumbered = true;
            }
            assert!(alloc.position > tasks[0].position && alloc.position < tasks[1].position);
            tasks.insert(
                1,
                TaskSummary::new(format!("n{i}").as_str(), "todo", alloc.position),
            );
            tasks.remove(2);
            tasks.sort_by_key(|t| t.position);
        }

        assert!(renumbered);
    }

    #[test]
    fn test_append_at_huge_magnitude_renumbers() {
        let tasks = column(&[1e17]);
        let alloc = PositionAllocator::default().append(&col(), &tasks).unwrap();
        assert!(alloc.renumber.is_some());
        assert_eq!(alloc.position, Position::new(1.0));
    }
}
