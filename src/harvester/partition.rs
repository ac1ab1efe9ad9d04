//! Scope partitioning — planning (category × date window) query tasks.

use chrono::Days;

use crate::config::ScopeConfig;
use crate::types::{DateWindow, QueryTask, TaskId};

/// Partition the global scope into independent query tasks.
///
/// Sub-windows are half-open, non-overlapping, contiguous, each at most
/// `chunk_days` long, and their union equals `[from_date, to_date)`.
/// Ordering is deterministic: categories in input order, windows in
/// chronological order within each category.
pub(crate) fn plan_tasks(scope: &ScopeConfig) -> Vec<QueryTask> {
    let mut tasks = Vec::new();

    if scope.from_date >= scope.to_date {
        return tasks;
    }

    let chunk = Days::new(u64::from(scope.chunk_days));
    let mut next_id = 0u64;

    for category in &scope.categories {
        let mut window_start = scope.from_date;
        while window_start < scope.to_date {
            let window_end = window_start
                .checked_add_days(chunk)
                .map(|d| d.min(scope.to_date))
                .unwrap_or(scope.to_date);

            tasks.push(QueryTask {
                id: TaskId(next_id),
                category: category.clone(),
                window: DateWindow::new(window_start, window_end),
                cursor: None,
            });

            next_id += 1;
            window_start = window_end;
        }
    }

    tasks
}
