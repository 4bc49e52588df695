//! Position type for task ordering within a column.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Ordering key of a task within its column. Lower positions render first.
///
/// Positions are `f64` so a task can be placed between two neighbors by
/// taking their midpoint. Precision is finite: once two neighbors are too
/// close to split, the column is renumbered (see [`crate::allocator`]).
/// Comparison uses `f64::total_cmp`, so `Position` is `Ord` and hashes by bits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(f64);

impl Position {
    /// Position given to the first task of an empty column
    pub const ORIGIN: Position = Position(0.0);

    /// Create a position from a raw value
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    /// Get the raw value
    pub fn value(self) -> f64 {
        self.0
    }

    /// Midpoint between two positions
    pub fn midpoint(self, other: Position) -> Position {
        Position(self.0 + (other.0 - self.0) / 2.0)
    }

    /// Distance to another position (absolute)
    pub fn gap(self, other: Position) -> f64 {
        (other.0 - self.0).abs()
    }

    /// Position strictly between `before` and `after`
    pub fn is_strictly_between(self, before: Position, after: Position) -> bool {
        before < self && self < after
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Position {}

impl std::hash::Hash for Position {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::ORIGIN
    }
}

impl From<f64> for Position {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
