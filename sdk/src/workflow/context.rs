//! Replay context handed to workflow code
//!
//! Workflow code runs from the beginning on every decision task. Each call
//! below maps to a deterministic id, is looked up in history, and either
//! yields an already resolved [`WorkflowFuture`] or records the decision
//! needed to make progress.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use flowlane_core::{
    decode_payload, ActivityState, ActivityTimeouts, ActivityType, ChildWorkflowState,
    ChildWorkflowTimeouts, Decision, History, TimerState, WorkflowExecution, WorkflowType,
};
use flowlane_core::workflow::decision::ceil_seconds;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::future::{FailureKind, FutureKind, TaskFailure, WorkflowFuture};
use super::task_registry::TaskRegistry;
use crate::activity::ActivityInput;
use crate::error::{FlowError, Result};

/// How to call an activity from a workflow
#[derive(Debug, Clone, PartialEq)]
pub struct ActivitySpec {
    pub activity_type: ActivityType,
    pub task_list: Option<String>,
    pub timeouts: ActivityTimeouts,
    /// Extra attempts after a failure or timeout
    pub retry: u32,
    /// Derive the id from the arguments so identical calls share one task
    pub idempotent: bool,
    /// Group reported by the task registry; defaults to the workflow name
    pub feature: Option<String>,
}

impl ActivitySpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            activity_type: ActivityType::new(name, version),
            task_list: None,
            timeouts: ActivityTimeouts::default(),
            retry: 0,
            idempotent: false,
            feature: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.activity_type.name
    }

    pub fn with_task_list(mut self, task_list: impl Into<String>) -> Self {
        self.task_list = Some(task_list.into());
        self
    }

    pub fn with_timeouts(mut self, timeouts: ActivityTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.heartbeat = Some(timeout);
        self
    }

    pub fn with_start_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.start_to_close = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }
}

/// How to start a child workflow
#[derive(Debug, Clone, PartialEq)]
pub struct ChildWorkflowSpec {
    pub workflow_type: WorkflowType,
    pub task_list: Option<String>,
    pub tag_list: Vec<String>,
    pub timeouts: ChildWorkflowTimeouts,
}

impl ChildWorkflowSpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            workflow_type: WorkflowType::new(name, version),
            task_list: None,
            tag_list: Vec::new(),
            timeouts: ChildWorkflowTimeouts::default(),
        }
    }

    pub fn with_task_list(mut self, task_list: impl Into<String>) -> Self {
        self.task_list = Some(task_list.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tag_list = tags;
        self
    }

    pub fn with_timeouts(mut self, timeouts: ChildWorkflowTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// One call made by workflow code, in call order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallSignature {
    Activity {
        id: String,
        name: String,
        input: String,
    },
    Timer {
        id: String,
        seconds: u64,
    },
    ChildWorkflow {
        id: String,
        name: String,
        input: String,
    },
    Signal {
        name: String,
    },
}

/// Limits applied while replaying
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Maximum number of activities open at once; `None` is unbounded
    pub max_parallel: Option<usize>,
    /// Maximum number of decisions produced by one replay
    pub max_decisions: usize,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            max_parallel: None,
            max_decisions: 100,
        }
    }
}

#[derive(Default)]
pub(crate) struct ReplayState {
    pub(crate) decisions: Vec<Decision>,
    pub(crate) futures: Vec<WorkflowFuture>,
    by_id: HashMap<String, WorkflowFuture>,
    activity_counters: HashMap<String, u32>,
    child_counters: HashMap<String, u32>,
    timer_counter: u32,
    pub(crate) signatures: Vec<CallSignature>,
    open_activities: usize,
    pub(crate) deferred: usize,
    pub(crate) execution_context: Option<String>,
}

/// Context for one replay of one workflow execution
pub struct WorkflowContext {
    execution: WorkflowExecution,
    workflow_type: WorkflowType,
    history: Arc<History>,
    input: Value,
    options: ReplayOptions,
    pub(crate) state: Mutex<ReplayState>,
    tasks: TaskRegistry,
}

fn payload_digest(payload: &str) -> String {
    Sha256::digest(payload.as_bytes())
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

impl WorkflowContext {
    pub fn new(
        execution: WorkflowExecution,
        workflow_type: WorkflowType,
        history: Arc<History>,
        input: Value,
        options: ReplayOptions,
    ) -> Self {
        let execution_context = history.execution_context().map(str::to_string);
        Self {
            execution,
            workflow_type,
            history,
            input,
            options,
            state: Mutex::new(ReplayState {
                execution_context,
                ..Default::default()
            }),
            tasks: TaskRegistry::new(),
        }
    }

    pub fn workflow_execution(&self) -> &WorkflowExecution {
        &self.execution
    }

    pub fn workflow_id(&self) -> &str {
        &self.execution.workflow_id
    }

    pub fn workflow_type(&self) -> &WorkflowType {
        &self.workflow_type
    }

    /// Workflow input
    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn task_registry(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Whether cancellation of this execution was requested
    pub fn is_cancel_requested(&self) -> bool {
        self.history.is_cancel_requested()
    }

    /// Attach a context string to the decision response
    pub fn set_execution_context(&self, context: impl Into<String>) {
        self.state.lock().execution_context = Some(context.into());
    }

    /// Context string recorded by the latest completed decision, or set
    /// during this replay
    pub fn execution_context(&self) -> Option<String> {
        self.state.lock().execution_context.clone()
    }

    /// Decisions recorded so far in this replay
    pub fn decisions(&self) -> Vec<Decision> {
        self.state.lock().decisions.clone()
    }

    /// Submit an activity.
    ///
    /// Repeated submits resolving to an id already seen in this replay return
    /// the same future and record nothing new.
    pub fn submit(
        &self,
        spec: &ActivitySpec,
        input: impl Into<ActivityInput>,
    ) -> Result<WorkflowFuture> {
        let payload = input.into().to_payload()?;
        let name = spec.name().to_string();
        let mut state = self.state.lock();

        let id = if spec.idempotent {
            format!("{}-{}", name, payload_digest(&payload))
        } else {
            let counter = state.activity_counters.entry(name.clone()).or_insert(0);
            let id = format!("{}-{}", name, counter);
            *counter += 1;
            id
        };

        state.signatures.push(CallSignature::Activity {
            id: id.clone(),
            name: name.clone(),
            input: payload.clone(),
        });

        if let Some(existing) = state.by_id.get(&id) {
            return Ok(existing.clone());
        }

        let future = WorkflowFuture::new(FutureKind::Activity, &id, &name);
        let schedule = || Decision::ScheduleActivityTask {
            activity_id: id.clone(),
            activity_type: spec.activity_type.clone(),
            input: Some(payload.clone()),
            task_list: spec.task_list.clone(),
            timeouts: spec.timeouts.clone(),
        };

        match self.history.activity(&id) {
            None => self.schedule_activity(&mut state, &future, schedule()),
            Some(record) => match record.state {
                ActivityState::Completed => {
                    future.set_finished(decode_payload(record.result.as_deref()));
                }
                ActivityState::Scheduled | ActivityState::Started => {
                    future.set_running();
                    state.open_activities += 1;
                }
                ActivityState::Failed | ActivityState::TimedOut
                    if record.failures <= spec.retry =>
                {
                    debug!(
                        workflow_id = %self.execution.workflow_id,
                        activity_id = %id,
                        attempt = record.failures + 1,
                        "Retrying activity"
                    );
                    self.schedule_activity(&mut state, &future, schedule());
                }
                ActivityState::Failed => {
                    future.set_failed(TaskFailure::new(
                        FailureKind::Failed,
                        record.reason.clone().unwrap_or_default(),
                        record.details.clone(),
                    ));
                }
                ActivityState::TimedOut => {
                    future.set_failed(TaskFailure::new(
                        FailureKind::TimedOut,
                        record.reason.clone().unwrap_or_else(|| "timed out".into()),
                        record.details.clone(),
                    ));
                }
                ActivityState::Canceled => {
                    future.set_failed(TaskFailure::new(
                        FailureKind::Canceled,
                        "canceled",
                        record.details.clone(),
                    ));
                }
                ActivityState::ScheduleFailed => {
                    future.set_failed(TaskFailure::new(
                        FailureKind::ScheduleFailed,
                        record
                            .reason
                            .clone()
                            .unwrap_or_else(|| "schedule failed".into()),
                        None,
                    ));
                }
            },
        }

        let feature = spec
            .feature
            .clone()
            .unwrap_or_else(|| self.workflow_type.name.clone());
        self.tasks.register(&future, &name, &feature);
        state.by_id.insert(id, future.clone());
        state.futures.push(future.clone());
        Ok(future)
    }

    fn schedule_activity(
        &self,
        state: &mut ReplayState,
        future: &WorkflowFuture,
        decision: Decision,
    ) {
        let parallel_ok = self
            .options
            .max_parallel
            .map_or(true, |max| state.open_activities < max);
        if parallel_ok && state.decisions.len() < self.options.max_decisions {
            state.decisions.push(decision);
            state.open_activities += 1;
        } else {
            state.deferred += 1;
            debug!(
                workflow_id = %self.execution.workflow_id,
                activity_id = %future.id(),
                "Deferring activity to a later decision"
            );
        }
    }

    fn push_decision(&self, state: &mut ReplayState, decision: Decision) {
        if state.decisions.len() < self.options.max_decisions {
            state.decisions.push(decision);
        } else {
            state.deferred += 1;
        }
    }

    /// Start a timer that fires after `duration`
    pub fn start_timer(&self, duration: Duration) -> WorkflowFuture {
        let mut state = self.state.lock();
        let id = format!("timer-{}", state.timer_counter);
        state.timer_counter += 1;
        state.signatures.push(CallSignature::Timer {
            id: id.clone(),
            seconds: ceil_seconds(duration),
        });

        let future = WorkflowFuture::new(FutureKind::Timer, &id, "timer");
        match self.history.timer(&id) {
            None => self.push_decision(
                &mut state,
                Decision::StartTimer {
                    timer_id: id.clone(),
                    start_to_fire: duration,
                },
            ),
            Some(record) => match record.state {
                TimerState::Started => {
                    future.set_running();
                }
                TimerState::Fired => {
                    future.set_finished(Value::Null);
                }
                TimerState::Canceled => {
                    future.set_failed(TaskFailure::new(FailureKind::Canceled, "canceled", None));
                }
                TimerState::StartFailed => {
                    future.set_failed(TaskFailure::new(
                        FailureKind::ScheduleFailed,
                        record.cause.clone().unwrap_or_else(|| "start failed".into()),
                        None,
                    ));
                }
            },
        }

        state.by_id.insert(id, future.clone());
        state.futures.push(future.clone());
        future
    }

    /// Suspend until a timer of `duration` has fired
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        self.start_timer(duration).result().map(|_| ())
    }

    /// Start a child workflow. Its id is `{parent_workflow_id}--{name}-{n}`.
    pub fn submit_workflow(&self, spec: &ChildWorkflowSpec, input: Value) -> Result<WorkflowFuture> {
        let payload = serde_json::to_string(&input)?;
        let name = spec.workflow_type.name.clone();
        let mut state = self.state.lock();

        let counter = state.child_counters.entry(name.clone()).or_insert(0);
        let id = format!("{}--{}-{}", self.execution.workflow_id, name, counter);
        *counter += 1;

        state.signatures.push(CallSignature::ChildWorkflow {
            id: id.clone(),
            name: name.clone(),
            input: payload.clone(),
        });

        let future = WorkflowFuture::new(FutureKind::ChildWorkflow, &id, &name);
        match self.history.child_workflow(&id) {
            None => self.push_decision(
                &mut state,
                Decision::StartChildWorkflowExecution {
                    workflow_id: id.clone(),
                    workflow_type: spec.workflow_type.clone(),
                    input: Some(payload),
                    task_list: spec.task_list.clone(),
                    tag_list: spec.tag_list.clone(),
                    timeouts: spec.timeouts.clone(),
                },
            ),
            Some(record) => {
                let reason = |fallback: &str| {
                    record
                        .reason
                        .clone()
                        .unwrap_or_else(|| fallback.to_string())
                };
                match record.state {
                    ChildWorkflowState::Initiated | ChildWorkflowState::Started => {
                        future.set_running();
                    }
                    ChildWorkflowState::Completed => {
                        future.set_finished(decode_payload(record.result.as_deref()));
                    }
                    ChildWorkflowState::TimedOut => {
                        future.set_failed(TaskFailure::new(
                            FailureKind::TimedOut,
                            reason("timed out"),
                            None,
                        ));
                    }
                    ChildWorkflowState::Canceled => {
                        future.set_failed(TaskFailure::new(
                            FailureKind::Canceled,
                            "canceled",
                            record.details.clone(),
                        ));
                    }
                    ChildWorkflowState::Failed
                    | ChildWorkflowState::StartFailed
                    | ChildWorkflowState::Terminated => {
                        let fallback = if record.state == ChildWorkflowState::Terminated {
                            "terminated"
                        } else {
                            "failed"
                        };
                        future.set_failed(TaskFailure::new(
                            FailureKind::ChildFailed,
                            reason(fallback),
                            record.details.clone(),
                        ));
                    }
                }
            }
        }

        self.tasks.register(&future, &name, &self.workflow_type.name);
        state.by_id.insert(id, future.clone());
        state.futures.push(future.clone());
        Ok(future)
    }

    /// Input of the latest signal with this name, if any was received
    pub fn signal(&self, name: &str) -> Option<Value> {
        self.state.lock().signatures.push(CallSignature::Signal {
            name: name.to_string(),
        });
        self.history
            .signal(name)
            .map(|s| decode_payload(s.input.as_deref()))
    }

    /// Suspend until a signal with this name was received
    pub fn wait_signal(&self, name: &str) -> Result<Value> {
        self.signal(name).ok_or_else(|| FlowError::Suspended {
            reason: format!("Waiting for signal '{}'", name),
        })
    }

    /// All signals received so far, in order
    pub fn signals(&self) -> Vec<(String, Value)> {
        self.history
            .signals()
            .iter()
            .map(|s| (s.name.clone(), decode_payload(s.input.as_deref())))
            .collect()
    }

    /// Suspend unless every future has settled
    pub fn wait<'a>(&self, futures: impl IntoIterator<Item = &'a WorkflowFuture>) -> Result<()> {
        let waiting: Vec<&str> = futures
            .into_iter()
            .filter(|f| !f.is_settled())
            .map(|f| f.id())
            .collect();
        if waiting.is_empty() {
            Ok(())
        } else {
            Err(FlowError::Suspended {
                reason: format!("Waiting for {}", waiting.join(", ")),
            })
        }
    }

    /// Index of the first settled future; suspends if none has settled
    pub fn wait_any<'a>(
        &self,
        futures: impl IntoIterator<Item = &'a WorkflowFuture>,
    ) -> Result<usize> {
        let mut ids = Vec::new();
        for (index, future) in futures.into_iter().enumerate() {
            if future.is_settled() {
                return Ok(index);
            }
            ids.push(future.id().to_string());
        }
        Err(FlowError::Suspended {
            reason: format!("Waiting for any of {}", ids.join(", ")),
        })
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("execution", &self.execution)
            .field("workflow_type", &self.workflow_type)
            .field("events", &self.history.len())
            .finish()
    }
}
