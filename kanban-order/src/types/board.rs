//! Board-level types: Board, Column

use super::ids::{BoardId, ColumnId};
use serde::{Deserialize, Serialize};

/// The kanban board. Scopes columns; otherwise opaque to the ordering engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    pub name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl Board {
    /// Create a new board with the given name and no columns
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: BoardId::new(),
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Create a board with the default `todo`/`doing`/`done` columns
    pub fn with_default_columns(name: impl Into<String>) -> Self {
        let mut board = Self::new(name);
        board.columns = Self::default_columns(&board.id);
        board
    }

    /// Get the default columns for a new board
    pub fn default_columns(board_id: &BoardId) -> Vec<Column> {
        vec![
            Column::new("todo", board_id.clone(), "To Do"),
            Column::new("doing", board_id.clone(), "Doing"),
            Column::new("done", board_id.clone(), "Done"),
        ]
    }

    /// Add a column
    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Find a column by ID
    pub fn find_column(&self, id: &ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| &c.id == id)
    }
}

/// A column defines a workflow stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Column {
    pub id: ColumnId,
    pub board_id: BoardId,
    pub name: String,
    /// Maximum number of tasks; `None` means unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wip_limit: Option<usize>,
}

impl Column {
    /// Create an unlimited column
    pub fn new(id: impl Into<ColumnId>, board_id: BoardId, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            board_id,
            name: name.into(),
            wip_limit: None,
        }
    }

    /// Set the WIP limit
    pub fn with_wip_limit(mut self, limit: usize) -> Self {
        self.wip_limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_creation() {
        let board = Board::new("Test Board");
        assert_eq!(board.name, "Test Board");
        assert!(board.columns.is_empty());
    }

    #[test]
    fn test_default_columns() {
        let board = Board::with_default_columns("Test");
        assert_eq!(board.columns.len(), 3);
        assert_eq!(board.columns[0].id.as_str(), "todo");
        assert_eq!(board.columns[2].id.as_str(), "done");
        assert!(board.columns.iter().all(|c| c.board_id == board.id));
    }

    #[test]
    fn test_find_column() {
        let board = Board::with_default_columns("Test");
        assert!(board.find_column(&ColumnId::from("doing")).is_some());
        assert!(board.find_column(&ColumnId::from("nope")).is_none());
    }

    #[test]
    fn test_column_wip_limit_serialization() {
        let board = Board::new("Test");
        let col = Column::new("review", board.id.clone(), "Review").with_wip_limit(2);
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json["wip_limit"], 2);

        let unlimited = Column::new("todo", board.id, "To Do");
        let json = serde_json::to_value(&unlimited).unwrap();
        assert!(json.get("wip_limit").is_none());
    }
}
