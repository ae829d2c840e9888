//! Handles to work submitted from a workflow replay
//!
//! A [`WorkflowFuture`] stands for an activity, timer or child workflow. Its
//! state is derived from history when it is created and only ever moves
//! forward: `Pending -> Running -> Finished | Failed`.
//!
//! Awaiting a future never blocks. It resolves immediately with the result,
//! the task error, or [`FlowError::Suspended`] when history does not hold an
//! outcome yet; propagating the suspension with `?` ends the replay.

use std::fmt;
use std::future::{ready, IntoFuture, Ready};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{FlowError, Result};

/// What kind of work a future stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FutureKind {
    Activity,
    Timer,
    ChildWorkflow,
}

/// Coarse state of a future
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FutureStatus {
    Pending,
    Running,
    Finished,
    Failed,
}

impl FutureStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// How a task ended, when it did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Failed,
    TimedOut,
    Canceled,
    ScheduleFailed,
    ChildFailed,
}

/// Recorded failure of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub reason: String,
    pub details: Option<String>,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>, details: Option<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            details,
        }
    }

    /// Error surfaced to workflow code for the future with the given id
    pub fn to_error(&self, id: &str) -> FlowError {
        match self.kind {
            FailureKind::TimedOut => FlowError::TaskTimedOut { id: id.to_string() },
            FailureKind::Canceled => FlowError::TaskCanceled { id: id.to_string() },
            FailureKind::ChildFailed => FlowError::ChildWorkflowFailed {
                workflow_id: id.to_string(),
                reason: self.reason.clone(),
            },
            FailureKind::Failed | FailureKind::ScheduleFailed => FlowError::TaskFailed {
                id: id.to_string(),
                reason: self.reason.clone(),
                details: self.details.clone(),
            },
        }
    }
}

#[derive(Debug, Clone)]
enum State {
    Pending,
    Running,
    Finished(Value),
    Failed(TaskFailure),
}

impl State {
    fn status(&self) -> FutureStatus {
        match self {
            Self::Pending => FutureStatus::Pending,
            Self::Running => FutureStatus::Running,
            Self::Finished(_) => FutureStatus::Finished,
            Self::Failed(_) => FutureStatus::Failed,
        }
    }
}

#[derive(Debug)]
struct Inner {
    id: String,
    name: String,
    kind: FutureKind,
    state: Mutex<State>,
    transitions: Mutex<Vec<FutureStatus>>,
}

/// Shared handle to submitted work. Cloning yields the same future.
#[derive(Clone)]
pub struct WorkflowFuture {
    inner: Arc<Inner>,
}

impl WorkflowFuture {
    pub(crate) fn new(kind: FutureKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                name: name.into(),
                kind,
                state: Mutex::new(State::Pending),
                transitions: Mutex::new(vec![FutureStatus::Pending]),
            }),
        }
    }

    /// Deterministic id of the task
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Activity, timer or workflow type name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> FutureKind {
        self.inner.kind
    }

    pub fn status(&self) -> FutureStatus {
        self.inner.state.lock().status()
    }

    pub fn is_pending(&self) -> bool {
        self.status() == FutureStatus::Pending
    }

    pub fn is_running(&self) -> bool {
        self.status() == FutureStatus::Running
    }

    /// Finished or failed
    pub fn is_settled(&self) -> bool {
        self.status().is_settled()
    }

    /// Whether both handles point to the same future
    pub fn same_as(&self, other: &WorkflowFuture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Every state the future went through, in order
    pub fn transitions(&self) -> Vec<FutureStatus> {
        self.inner.transitions.lock().clone()
    }

    /// The failure, once failed
    pub fn failure(&self) -> Option<TaskFailure> {
        match &*self.inner.state.lock() {
            State::Failed(failure) => Some(failure.clone()),
            _ => None,
        }
    }

    /// Whether the future holds an error
    pub fn has_error(&self) -> bool {
        self.status() == FutureStatus::Failed
    }

    /// Result of the task, its error, or `Suspended` if not settled
    pub fn result(&self) -> Result<Value> {
        match &*self.inner.state.lock() {
            State::Finished(value) => Ok(value.clone()),
            State::Failed(failure) => Err(failure.to_error(&self.inner.id)),
            State::Pending | State::Running => Err(FlowError::Suspended {
                reason: format!("Waiting for {}", self.inner.id),
            }),
        }
    }

    /// Result deserialized into `T`
    pub fn result_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.result()?)?)
    }

    fn transition(&self, next: State) -> bool {
        let mut state = self.inner.state.lock();
        let current = state.status();
        let target = next.status();
        if current.is_settled() || target <= current {
            return false;
        }
        *state = next;
        self.inner.transitions.lock().push(target);
        true
    }

    pub(crate) fn set_running(&self) -> bool {
        self.transition(State::Running)
    }

    pub(crate) fn set_finished(&self, value: Value) -> bool {
        self.transition(State::Finished(value))
    }

    pub(crate) fn set_failed(&self, failure: TaskFailure) -> bool {
        self.transition(State::Failed(failure))
    }
}

impl fmt::Debug for WorkflowFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowFuture")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("status", &self.status())
            .finish()
    }
}

impl IntoFuture for WorkflowFuture {
    type Output = Result<Value>;
    type IntoFuture = Ready<Result<Value>>;

    fn into_future(self) -> Self::IntoFuture {
        ready(self.result())
    }
}

impl IntoFuture for &WorkflowFuture {
    type Output = Result<Value>;
    type IntoFuture = Ready<Result<Value>>;

    fn into_future(self) -> Self::IntoFuture {
        ready(self.result())
    }
}
