//! Context handed to a running activity handler

use std::sync::Arc;

use flowlane_core::{limits, ActivityTask, ActivityType, WorkflowExecution};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::worker::supervisor::{PidGuard, PidSet};

/// Per-slot view of the activity task being executed.
///
/// The cancellation token is triggered when the service reports the task as
/// cancel-requested or when the worker shuts down. Handlers that do long work
/// should select on [`ActivityContext::cancelled`].
#[derive(Debug, Clone)]
pub struct ActivityContext {
    task: Arc<ActivityTask>,
    cancel: CancellationToken,
    heartbeat_details: Arc<Mutex<Option<String>>>,
    pids: PidSet,
    /// Forwards recorded details out of a task process
    heartbeat_sink: Option<mpsc::UnboundedSender<String>>,
}

impl ActivityContext {
    /// Context for a task outside of a worker, with its own token
    pub fn new(task: ActivityTask) -> Self {
        Self::with_parts(
            Arc::new(task),
            CancellationToken::new(),
            Arc::new(Mutex::new(None)),
            PidSet::new(),
        )
    }

    pub(crate) fn with_parts(
        task: Arc<ActivityTask>,
        cancel: CancellationToken,
        heartbeat_details: Arc<Mutex<Option<String>>>,
        pids: PidSet,
    ) -> Self {
        Self {
            task,
            cancel,
            heartbeat_details,
            pids,
            heartbeat_sink: None,
        }
    }

    pub(crate) fn with_heartbeat_sink(mut self, sink: mpsc::UnboundedSender<String>) -> Self {
        self.heartbeat_sink = Some(sink);
        self
    }

    pub fn task(&self) -> &ActivityTask {
        &self.task
    }

    pub fn activity_id(&self) -> &str {
        &self.task.activity_id
    }

    pub fn activity_type(&self) -> &ActivityType {
        &self.task.activity_type
    }

    pub fn workflow_execution(&self) -> &WorkflowExecution {
        &self.task.workflow_execution
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the activity is asked to stop
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Set the details sent with the next heartbeat
    pub fn record_heartbeat(&self, details: impl Into<String>) {
        let details = limits::truncate_owned(details.into(), limits::MAX_DETAILS_LEN);
        if let Some(sink) = &self.heartbeat_sink {
            let _ = sink.send(details.clone());
        }
        *self.heartbeat_details.lock() = Some(details);
    }

    /// Latest heartbeat details
    pub fn heartbeat_details(&self) -> Option<String> {
        self.heartbeat_details.lock().clone()
    }

    /// Register a child process for the lifetime of the guard
    pub fn track_pid(&self, pid: u32) -> PidGuard {
        self.pids.track(pid)
    }

    pub fn pids(&self) -> &PidSet {
        &self.pids
    }
}
