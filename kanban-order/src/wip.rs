//! Work-in-progress limits

use crate::error::Result;
use crate::store::OrderedColumnStore;
use crate::types::{ColumnId, TaskId};
use serde::Serialize;
use std::collections::HashMap;

/// Whether a column accepts an incoming task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum WipDecision {
    Allowed,
    Rejected { reason: String },
}

impl WipDecision {
    /// Check if the move may proceed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Per-column task count caps. Columns without a limit are unlimited.
#[derive(Debug, Clone, Default)]
pub struct WipPolicy {
    limits: HashMap<ColumnId, usize>,
}

impl WipPolicy {
    /// Create a policy with no limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear a column's limit
    pub fn set_limit(&mut self, column: &ColumnId, limit: Option<usize>) {
        match limit {
            Some(limit) => {
                self.limits.insert(column.clone(), limit);
            }
            None => {
                self.limits.remove(column);
            }
        }
    }

    /// A column's limit, if any
    pub fn limit(&self, column: &ColumnId) -> Option<usize> {
        self.limits.get(column).copied()
    }

    /// Decide whether `dest` accepts `moving`, based on the cached column.
    ///
    /// The moving task is not counted, and a task already in `dest` is always
    /// allowed, so reordering inside a full (or over-full) column works.
    pub fn can_accept(
        &self,
        store: &OrderedColumnStore,
        dest: &ColumnId,
        moving: &TaskId,
    ) -> Result<WipDecision> {
        let Some(limit) = self.limit(dest) else {
            return Ok(WipDecision::Allowed);
        };
        if store.task(moving).is_some_and(|t| &t.column_id == dest) {
            return Ok(WipDecision::Allowed);
        }
        let count = store.ordered_tasks(dest)?.filter(|t| &t.id != moving).count();

        if count >= limit {
            Ok(WipDecision::Rejected {
                reason: format!("column '{dest}' is at its WIP limit ({count}/{limit})"),
            })
        } else {
            Ok(WipDecision::Allowed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Position, TaskSummary};

    fn store() -> OrderedColumnStore {
        let mut store = OrderedColumnStore::new();
        let review = ColumnId::from("review");
        store
            .load_column(
                &review,
                vec![
                    TaskSummary::new("a", "review", Position::new(0.0)),
                    TaskSummary::new("b", "review", Position::new(1.0)),
                ],
            )
            .unwrap();
        store
    }

    #[test]
    fn test_unlimited_column_accepts() {
        let policy = WipPolicy::new();
        let decision = policy
            .can_accept(&store(), &ColumnId::from("review"), &TaskId::from("c"))
            .unwrap();
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_full_column_rejects_incoming() {
        let mut policy = WipPolicy::new();
        let review = ColumnId::from("review");
        policy.set_limit(&review, Some(2));

        let decision = policy
            .can_accept(&store(), &review, &TaskId::from("c"))
            .unwrap();
        assert!(matches!(decision, WipDecision::Rejected { ref reason } if reason.contains("2/2")));
    }

    #[test]
    fn test_full_column_allows_reorder_of_member() {
        let mut policy = WipPolicy::new();
        let review = ColumnId::from("review");
        policy.set_limit(&review, Some(2));

        let decision = policy
            .can_accept(&store(), &review, &TaskId::from("a"))
            .unwrap();
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_over_full_column_still_reorders() {
        let mut policy = WipPolicy::new();
        let review = ColumnId::from("review");
        policy.set_limit(&review, Some(1));

        let decision = policy
            .can_accept(&store(), &review, &TaskId::from("b"))
            .unwrap();
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_clearing_limit() {
        let mut policy = WipPolicy::new();
        let review = ColumnId::from("review");
        policy.set_limit(&review, Some(1));
        policy.set_limit(&review, None);
        assert_eq!(policy.limit(&review), None);
    }
}
