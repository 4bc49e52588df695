//! Property-based tests for the ordering invariant
//!
//! Random move sequences are replayed against the local store and the
//! allocator; after every step each column must stay strictly ascending and
//! agree with the cached placements.

use kanban_order::{
    ColumnId, OrderedColumnStore, Position, PositionAllocator, TaskId, TaskSummary,
};
use proptest::prelude::*;

const COLUMNS: [&str; 3] = ["todo", "doing", "done"];

// Generators for test data

/// A move: which task, which column, and a seed folded into a valid index
fn moves() -> impl Strategy<Value = Vec<(usize, usize, usize)>> {
    prop::collection::vec((0usize..12, 0usize..COLUMNS.len(), any::<usize>()), 1..60)
}

/// Initial distinct positions for up to 12 tasks spread over the columns
fn layout() -> impl Strategy<Value = Vec<(usize, f64)>> {
    prop::collection::vec((0usize..COLUMNS.len(), -1.0e6f64..1.0e6), 1..12)
}

fn build_store(layout: &[(usize, f64)]) -> (OrderedColumnStore, Vec<TaskId>) {
    let mut store = OrderedColumnStore::new();
    for column in COLUMNS {
        store.ensure_column(&ColumnId::from(column));
    }
    let mut ids = Vec::new();
    for (i, (column, position)) in layout.iter().enumerate() {
        let id = TaskId::from(format!("t{i}"));
        // Offset by index so generated positions never collide.
        let position = Position::new(position.floor() * 16.0 + i as f64);
        let inserted = store.insert_task(TaskSummary::new(
            id.clone(),
            ColumnId::from(COLUMNS[*column]),
            position,
        ));
        if inserted.is_ok() {
            ids.push(id);
        }
    }
    (store, ids)
}

/// Valid destination index for a task in a column
fn dest_index(store: &OrderedColumnStore, task: &TaskId, column: &ColumnId, seed: usize) -> usize {
    let others = store
        .ordered_tasks(column)
        .unwrap()
        .filter(|t| &t.id != task)
        .count();
    seed % (others + 1)
}

proptest! {
    /// Property: every column stays strictly ordered through any move sequence
    #[test]
    fn prop_total_order_invariant(layout in layout(), moves in moves()) {
        let (mut store, ids) = build_store(&layout);
        let allocator = PositionAllocator::default();
        prop_assume!(!ids.is_empty());

        for (task, column, seed) in moves {
            let task = &ids[task % ids.len()];
            let column = ColumnId::from(COLUMNS[column]);
            let index = dest_index(&store, task, &column, seed);

            let applied = store.apply_move(task, &column, index, &allocator).unwrap();
            prop_assert!(store.check_invariants().is_ok());

            let order = store.task_order(&column).unwrap();
            prop_assert_eq!(&order[index], task);
            prop_assert_eq!(applied.to.position, store.task(task).unwrap().position);
        }
    }

    /// Property: move then restore yields the exact prior state
    #[test]
    fn prop_move_then_restore_is_exact(
        layout in layout(),
        task in 0usize..12,
        column in 0usize..COLUMNS.len(),
        seed in any::<usize>(),
    ) {
        let (mut store, ids) = build_store(&layout);
        prop_assume!(!ids.is_empty());
        let task = &ids[task % ids.len()];
        let dest = ColumnId::from(COLUMNS[column]);
        let source = store.task(task).unwrap().column_id.clone();
        let index = dest_index(&store, task, &dest, seed);
        let before = store.clone();

        let mut snapshot = store.snapshot(&[&source, &dest], task);
        let applied = store
            .apply_move(task, &dest, index, &PositionAllocator::default())
            .unwrap();
        snapshot.record(&applied);
        prop_assert!(store.restore(snapshot).is_empty());

        prop_assert_eq!(store, before);
    }

    /// Property: appending N tasks yields strictly increasing positions in creation order
    #[test]
    fn prop_append_is_strictly_increasing(count in 1usize..200, start in -1.0e9f64..1.0e9) {
        let allocator = PositionAllocator::default();
        let column = ColumnId::from("todo");
        let mut tasks = vec![TaskSummary::new("seed", column.clone(), Position::new(start))];

        for i in 0..count {
            let allocation = allocator.append(&column, &tasks).unwrap();
            prop_assert!(allocation.renumber.is_none());
            prop_assert!(allocation.position > tasks.last().unwrap().position);
            tasks.push(TaskSummary::new(format!("t{i}"), column.clone(), allocation.position));
        }
    }

    /// Property: a renumbered column keeps its relative order
    #[test]
    fn prop_renumber_preserves_order(
        count in 2usize..40,
        index_seed in any::<usize>(),
    ) {
        // Neighbors one ulp apart cannot be split.
        let column = ColumnId::from("todo");
        let mut bits = 1.0f64.to_bits();
        let tasks: Vec<TaskSummary> = (0..count)
            .map(|i| {
                let position = Position::new(f64::from_bits(bits));
                let task = TaskSummary::new(format!("t{i}"), column.clone(), position);
                bits += 1;
                task
            })
            .collect();
        let index = 1 + index_seed % (count - 1);

        let allocation = PositionAllocator::default().allocate(&column, &tasks, index).unwrap();
        let plan = allocation.renumber.expect("exhausted gap must renumber");
        let planned: Vec<&TaskId> = plan.entries.iter().map(|(id, _)| id).collect();
        let original: Vec<&TaskId> = tasks.iter().map(|t| &t.id).collect();
        prop_assert_eq!(planned, original);

        let positions: Vec<Position> = plan.positions().collect();
        prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(allocation
            .position
            .is_strictly_between(positions[index - 1], positions[index]));
    }
}
