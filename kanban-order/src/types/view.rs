//! How a column is being displayed, and whether that display can be reordered.

use serde::{Deserialize, Serialize};

/// Field a column view is sorted by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Ascending by position: the board's real order
    #[default]
    Position,
    Title,
    Priority,
    CreatedAt,
}

/// Query options for fetching a column from the authoritative store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnQuery {
    /// Case-insensitive substring matched against title and description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default)]
    pub sort: SortKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<Page>,
}

impl ColumnQuery {
    /// The unfiltered, position-sorted, unpaginated sequence
    pub fn full() -> Self {
        Self::default()
    }

    /// Set a text filter
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Set the sort key
    pub fn with_sort(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }

    /// Set the page
    pub fn with_page(mut self, index: usize, size: usize) -> Self {
        self.page = Some(Page { index, size });
        self
    }
}

/// Zero-based page of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub index: usize,
    pub size: usize,
}

/// The view a caller currently renders for a column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnViewState {
    #[serde(flatten)]
    pub query: ColumnQuery,
}

impl ColumnViewState {
    /// View state for a query
    pub fn new(query: ColumnQuery) -> Self {
        Self { query }
    }

    /// True only when visible indices map onto real positions: no filter,
    /// sorted by position, and showing the first page.
    pub fn is_reorderable(&self) -> bool {
        let unfiltered = self
            .query
            .filter
            .as_deref()
            .is_none_or(|f| f.trim().is_empty());
        let first_page = self.query.page.is_none_or(|p| p.index == 0);
        unfiltered && self.query.sort == SortKey::Position && first_page
    }
}
