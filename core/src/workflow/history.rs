//! Workflow execution history
//!
//! A [`History`] is built once per decision poll from the (possibly paginated)
//! event list and is read-only afterwards. Besides indexed access to the raw
//! events it keeps a parsed view of the things replay needs to look up by id:
//! activities, timers, child workflows, signals and the cancel request.

use std::collections::HashMap;
use std::ops::Range;

use serde_json::Value;

use super::event::{Event, EventType};

/// State of an activity as seen in history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    Scheduled,
    ScheduleFailed,
    Started,
    Completed,
    Failed,
    TimedOut,
    Canceled,
}

impl ActivityState {
    /// Whether the latest attempt is closed
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Scheduled | Self::Started)
    }
}

/// Everything history recorded about one activity id
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub activity_id: String,
    pub name: String,
    pub version: String,
    pub input: Option<String>,
    pub state: ActivityState,
    pub result: Option<String>,
    pub reason: Option<String>,
    pub details: Option<String>,
    /// Number of attempts that ended failed or timed out
    pub failures: u32,
    /// Number of times the activity was scheduled
    pub attempts: u32,
}

/// State of a timer as seen in history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Started,
    Fired,
    Canceled,
    StartFailed,
}

/// Everything history recorded about one timer id
#[derive(Debug, Clone, PartialEq)]
pub struct TimerRecord {
    pub timer_id: String,
    pub state: TimerState,
    pub cause: Option<String>,
}

/// State of a child workflow as seen in history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildWorkflowState {
    Initiated,
    StartFailed,
    Started,
    Completed,
    Failed,
    TimedOut,
    Canceled,
    Terminated,
}

impl ChildWorkflowState {
    /// Whether the child execution is closed
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Initiated | Self::Started)
    }
}

/// Everything history recorded about one child workflow id
#[derive(Debug, Clone, PartialEq)]
pub struct ChildWorkflowRecord {
    pub workflow_id: String,
    pub run_id: Option<String>,
    pub name: String,
    pub version: String,
    pub state: ChildWorkflowState,
    pub result: Option<String>,
    pub reason: Option<String>,
    pub details: Option<String>,
}

/// A signal received by the execution
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRecord {
    pub name: String,
    pub input: Option<String>,
    pub event_id: i64,
}

/// Ordered event log of one workflow run
#[derive(Debug, Clone, Default)]
pub struct History {
    events: Vec<Event>,
    activities: HashMap<String, ActivityRecord>,
    timers: HashMap<String, TimerRecord>,
    child_workflows: HashMap<String, ChildWorkflowRecord>,
    signals: Vec<SignalRecord>,
    cancel_requested: bool,
    input: Option<String>,
    execution_context: Option<String>,
}

impl History {
    /// Build a history from events in arrival order
    pub fn from_events(events: Vec<Event>) -> Self {
        let mut history = Self {
            events: Vec::with_capacity(events.len()),
            ..Default::default()
        };
        let mut scheduled: HashMap<i64, String> = HashMap::new();
        let mut initiated: HashMap<i64, String> = HashMap::new();

        for event in events {
            history.apply(&event, &mut scheduled, &mut initiated);
            history.events.push(event);
        }
        history
    }

    fn apply(
        &mut self,
        event: &Event,
        scheduled: &mut HashMap<i64, String>,
        initiated: &mut HashMap<i64, String>,
    ) {
        let owned = |key: &str| event.get_str(key).map(str::to_string);

        match event.event_type() {
            EventType::WorkflowExecutionStarted => {
                self.input = owned("input");
            }
            EventType::WorkflowExecutionCancelRequested => {
                self.cancel_requested = true;
            }
            EventType::DecisionTaskCompleted => {
                if let Some(ctx) = owned("executionContext") {
                    self.execution_context = Some(ctx);
                }
            }
            EventType::WorkflowExecutionSignaled => {
                self.signals.push(SignalRecord {
                    name: owned("signalName").unwrap_or_default(),
                    input: owned("input"),
                    event_id: event.id(),
                });
            }

            EventType::ActivityTaskScheduled => {
                let Some(activity_id) = owned("activityId") else {
                    return;
                };
                scheduled.insert(event.id(), activity_id.clone());
                let name = event
                    .get_path_str(&["activityType", "name"])
                    .unwrap_or_default()
                    .to_string();
                let version = event
                    .get_path_str(&["activityType", "version"])
                    .unwrap_or_default()
                    .to_string();
                let input = owned("input");
                let record = self
                    .activities
                    .entry(activity_id.clone())
                    .or_insert_with(|| ActivityRecord {
                        activity_id,
                        name: name.clone(),
                        version: version.clone(),
                        input: input.clone(),
                        state: ActivityState::Scheduled,
                        result: None,
                        reason: None,
                        details: None,
                        failures: 0,
                        attempts: 0,
                    });
                record.name = name;
                record.version = version;
                record.input = input;
                record.state = ActivityState::Scheduled;
                record.attempts += 1;
            }
            EventType::ScheduleActivityTaskFailed => {
                let Some(activity_id) = owned("activityId") else {
                    return;
                };
                let cause = owned("cause");
                let name = event
                    .get_path_str(&["activityType", "name"])
                    .unwrap_or_default()
                    .to_string();
                let version = event
                    .get_path_str(&["activityType", "version"])
                    .unwrap_or_default()
                    .to_string();
                let record = self
                    .activities
                    .entry(activity_id.clone())
                    .or_insert_with(|| ActivityRecord {
                        activity_id,
                        name,
                        version,
                        input: None,
                        state: ActivityState::ScheduleFailed,
                        result: None,
                        reason: None,
                        details: None,
                        failures: 0,
                        attempts: 0,
                    });
                record.state = ActivityState::ScheduleFailed;
                record.reason = cause;
            }
            EventType::ActivityTaskStarted
            | EventType::ActivityTaskCompleted
            | EventType::ActivityTaskFailed
            | EventType::ActivityTaskTimedOut
            | EventType::ActivityTaskCanceled => {
                let Some(activity_id) = event
                    .get_i64("scheduledEventId")
                    .and_then(|id| scheduled.get(&id))
                else {
                    return;
                };
                let Some(record) = self.activities.get_mut(activity_id) else {
                    return;
                };
                match event.event_type() {
                    EventType::ActivityTaskStarted => record.state = ActivityState::Started,
                    EventType::ActivityTaskCompleted => {
                        record.state = ActivityState::Completed;
                        record.result = owned("result");
                    }
                    EventType::ActivityTaskFailed => {
                        record.state = ActivityState::Failed;
                        record.reason = owned("reason");
                        record.details = owned("details");
                        record.failures += 1;
                    }
                    EventType::ActivityTaskTimedOut => {
                        record.state = ActivityState::TimedOut;
                        record.reason = owned("timeoutType");
                        record.details = owned("details");
                        record.failures += 1;
                    }
                    _ => {
                        record.state = ActivityState::Canceled;
                        record.details = owned("details");
                    }
                }
            }

            EventType::TimerStarted
            | EventType::TimerFired
            | EventType::TimerCanceled
            | EventType::StartTimerFailed => {
                let Some(timer_id) = owned("timerId") else {
                    return;
                };
                let (state, cause) = match event.event_type() {
                    EventType::TimerStarted => (TimerState::Started, None),
                    EventType::TimerFired => (TimerState::Fired, None),
                    EventType::TimerCanceled => (TimerState::Canceled, None),
                    _ => (TimerState::StartFailed, owned("cause")),
                };
                self.timers.insert(
                    timer_id.clone(),
                    TimerRecord {
                        timer_id,
                        state,
                        cause,
                    },
                );
            }

            EventType::StartChildWorkflowExecutionInitiated => {
                let Some(workflow_id) = owned("workflowId") else {
                    return;
                };
                initiated.insert(event.id(), workflow_id.clone());
                self.child_workflows.insert(
                    workflow_id.clone(),
                    ChildWorkflowRecord {
                        workflow_id,
                        run_id: None,
                        name: event
                            .get_path_str(&["workflowType", "name"])
                            .unwrap_or_default()
                            .to_string(),
                        version: event
                            .get_path_str(&["workflowType", "version"])
                            .unwrap_or_default()
                            .to_string(),
                        state: ChildWorkflowState::Initiated,
                        result: None,
                        reason: None,
                        details: None,
                    },
                );
            }
            EventType::StartChildWorkflowExecutionFailed => {
                let workflow_id = owned("workflowId").or_else(|| {
                    event
                        .get_i64("initiatedEventId")
                        .and_then(|id| initiated.get(&id).cloned())
                });
                let Some(workflow_id) = workflow_id else {
                    return;
                };
                if let Some(record) = self.child_workflows.get_mut(&workflow_id) {
                    record.state = ChildWorkflowState::StartFailed;
                    record.reason = owned("cause");
                }
            }
            EventType::ChildWorkflowExecutionStarted
            | EventType::ChildWorkflowExecutionCompleted
            | EventType::ChildWorkflowExecutionFailed
            | EventType::ChildWorkflowExecutionTimedOut
            | EventType::ChildWorkflowExecutionCanceled
            | EventType::ChildWorkflowExecutionTerminated => {
                let workflow_id = event
                    .get_path_str(&["workflowExecution", "workflowId"])
                    .map(str::to_string)
                    .or_else(|| {
                        event
                            .get_i64("initiatedEventId")
                            .and_then(|id| initiated.get(&id).cloned())
                    });
                let Some(workflow_id) = workflow_id else {
                    return;
                };
                let Some(record) = self.child_workflows.get_mut(&workflow_id) else {
                    return;
                };
                if let Some(run_id) = event.get_path_str(&["workflowExecution", "runId"]) {
                    record.run_id = Some(run_id.to_string());
                }
                match event.event_type() {
                    EventType::ChildWorkflowExecutionStarted => {
                        record.state = ChildWorkflowState::Started
                    }
                    EventType::ChildWorkflowExecutionCompleted => {
                        record.state = ChildWorkflowState::Completed;
                        record.result = owned("result");
                    }
                    EventType::ChildWorkflowExecutionFailed => {
                        record.state = ChildWorkflowState::Failed;
                        record.reason = owned("reason");
                        record.details = owned("details");
                    }
                    EventType::ChildWorkflowExecutionTimedOut => {
                        record.state = ChildWorkflowState::TimedOut;
                        record.reason = owned("timeoutType");
                    }
                    EventType::ChildWorkflowExecutionCanceled => {
                        record.state = ChildWorkflowState::Canceled;
                        record.details = owned("details");
                    }
                    _ => record.state = ChildWorkflowState::Terminated,
                }
            }
            _ => {}
        }
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if history has no events
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Event at a position
    pub fn get(&self, index: usize) -> Option<&Event> {
        self.events.get(index)
    }

    /// Events in a range of positions, clamped to the history length
    pub fn slice(&self, range: Range<usize>) -> &[Event] {
        let end = range.end.min(self.events.len());
        let start = range.start.min(end);
        &self.events[start..end]
    }

    /// Iterate over events in order
    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    /// All events
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// A history made of the first `len` events
    pub fn prefix(&self, len: usize) -> Self {
        Self::from_events(self.slice(0..len).to_vec())
    }

    /// Raw input of the execution, from `WorkflowExecutionStarted`
    pub fn input(&self) -> Option<&str> {
        self.input.as_deref()
    }

    /// Workflow input parsed as JSON; a non-JSON input is kept as a string
    pub fn input_value(&self) -> Value {
        match self.input.as_deref() {
            None => Value::Null,
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.into())),
        }
    }

    /// Latest execution context recorded by a completed decision
    pub fn execution_context(&self) -> Option<&str> {
        self.execution_context.as_deref()
    }

    /// Look up an activity by id
    pub fn activity(&self, activity_id: &str) -> Option<&ActivityRecord> {
        self.activities.get(activity_id)
    }

    /// All activities by id
    pub fn activities(&self) -> &HashMap<String, ActivityRecord> {
        &self.activities
    }

    /// Look up a timer by id
    pub fn timer(&self, timer_id: &str) -> Option<&TimerRecord> {
        self.timers.get(timer_id)
    }

    /// Look up a child workflow by workflow id
    pub fn child_workflow(&self, workflow_id: &str) -> Option<&ChildWorkflowRecord> {
        self.child_workflows.get(workflow_id)
    }

    /// Signals in the order they were received
    pub fn signals(&self) -> &[SignalRecord] {
        &self.signals
    }

    /// Latest signal with the given name
    pub fn signal(&self, name: &str) -> Option<&SignalRecord> {
        self.signals.iter().rev().find(|s| s.name == name)
    }

    /// Whether cancellation of the execution was requested
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// Whether the execution is already closed
    pub fn is_closed(&self) -> bool {
        self.events
            .last()
            .is_some_and(|e| e.event_type().is_workflow_terminal())
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl std::ops::Index<usize> for History {
    type Output = Event;

    fn index(&self, index: usize) -> &Self::Output {
        &self.events[index]
    }
}
