//! Tracing helpers
//!
//! Per-task fields travel in spans rather than in global state: every log
//! line emitted while a decision or activity task is handled carries the
//! execution ids of that task.

use flowlane_core::{ActivityTask, DecisionTask};
use tracing::{info_span, Span};

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Logs go to stderr, since a task process answers on
/// stdout. Does nothing if a global subscriber is already set.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Span covering the handling of one decision task
pub fn decision_span(task: &DecisionTask) -> Span {
    info_span!(
        "decision",
        workflow_id = %task.workflow_execution.workflow_id,
        run_id = %task.workflow_execution.run_id,
        workflow_type = %task.workflow_type,
        started_event_id = task.started_event_id,
    )
}

/// Span covering the execution of one activity task
pub fn activity_span(task: &ActivityTask) -> Span {
    info_span!(
        "activity",
        workflow_id = %task.workflow_execution.workflow_id,
        run_id = %task.workflow_execution.run_id,
        activity_id = %task.activity_id,
        activity_type = %task.activity_type,
    )
}
