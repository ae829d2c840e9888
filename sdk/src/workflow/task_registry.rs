//! Per-feature bookkeeping of the tasks a workflow submitted
//!
//! The status is provisional until every registered future has settled:
//! pending and running futures count as successful.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;

use super::future::WorkflowFuture;

/// Outcome of one `(feature, task_name)` group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub feature: String,
    pub task_name: String,
    /// No future in the group failed
    pub success: bool,
    pub count: usize,
}

/// Futures grouped by feature and task name
#[derive(Default)]
pub struct TaskRegistry {
    entries: Mutex<BTreeMap<(String, String), Vec<WorkflowFuture>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a future to its `(feature, task_name)` group
    pub fn register(&self, future: &WorkflowFuture, task_name: &str, feature: &str) {
        self.entries
            .lock()
            .entry((feature.to_string(), task_name.to_string()))
            .or_default()
            .push(future.clone());
    }

    /// Status of every group, ordered by feature then task name
    pub fn get_task_status(&self) -> Vec<TaskStatus> {
        self.entries
            .lock()
            .iter()
            .map(|((feature, task_name), futures)| TaskStatus {
                feature: feature.clone(),
                task_name: task_name.clone(),
                success: futures.iter().all(|f| !f.has_error()),
                count: futures.len(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("groups", &self.entries.lock().len())
            .finish()
    }
}
