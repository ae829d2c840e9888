//! Test builders for fluent history setup.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use flowlane_core::{
    ActivityTask, ActivityType, DecisionTaskPage, Event, EventType, History, WorkflowExecution,
    WorkflowType,
};
use serde_json::{json, Value};

fn payload(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Builder for execution histories.
///
/// Event ids are assigned in call order and terminal events are linked to
/// the events that opened them, the way the service records them.
///
/// # Example
///
/// ```ignore
/// use flowlane::testing::HistoryBuilder;
/// use serde_json::json;
///
/// let history = HistoryBuilder::new()
///     .workflow_started(json!([3, 4]))
///     .activity_scheduled("sum-0", "sum", "1.0")
///     .activity_completed("sum-0", json!(7))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct HistoryBuilder {
    events: Vec<Event>,
    clock: DateTime<Utc>,
    scheduled: HashMap<String, i64>,
    initiated: HashMap<String, i64>,
}

impl Default for HistoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryBuilder {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            clock: DateTime::<Utc>::UNIX_EPOCH,
            scheduled: HashMap::new(),
            initiated: HashMap::new(),
        }
    }

    fn next_id(&self) -> i64 {
        self.events.len() as i64 + 1
    }

    /// Append a raw event, returning its id
    pub fn push(&mut self, event_type: EventType, attributes: Value) -> i64 {
        let id = self.next_id();
        self.clock += ChronoDuration::seconds(1);
        self.events.push(Event::new(id, event_type, attributes, self.clock));
        id
    }

    fn with(mut self, event_type: EventType, attributes: Value) -> Self {
        self.push(event_type, attributes);
        self
    }

    fn scheduled_id(&self, activity_id: &str) -> i64 {
        self.scheduled.get(activity_id).copied().unwrap_or_default()
    }

    fn initiated_id(&self, workflow_id: &str) -> i64 {
        self.initiated.get(workflow_id).copied().unwrap_or_default()
    }

    pub fn workflow_started(self, input: Value) -> Self {
        let mut attributes = json!({
            "workflowType": {"name": "test", "version": "1.0"},
            "taskList": {"name": "default"},
        });
        if let Some(input) = payload(&input) {
            attributes["input"] = Value::String(input);
        }
        self.with(EventType::WorkflowExecutionStarted, attributes)
    }

    pub fn activity_scheduled(mut self, activity_id: &str, name: &str, version: &str) -> Self {
        let id = self.push(
            EventType::ActivityTaskScheduled,
            json!({
                "activityId": activity_id,
                "activityType": {"name": name, "version": version},
                "taskList": {"name": "default"},
            }),
        );
        self.scheduled.insert(activity_id.to_string(), id);
        self
    }

    pub fn activity_started(self, activity_id: &str) -> Self {
        let scheduled = self.scheduled_id(activity_id);
        self.with(
            EventType::ActivityTaskStarted,
            json!({"scheduledEventId": scheduled, "identity": "worker:default"}),
        )
    }

    pub fn activity_completed(self, activity_id: &str, result: Value) -> Self {
        let scheduled = self.scheduled_id(activity_id);
        let mut attributes = json!({"scheduledEventId": scheduled});
        if let Some(result) = payload(&result) {
            attributes["result"] = Value::String(result);
        }
        self.with(EventType::ActivityTaskCompleted, attributes)
    }

    pub fn activity_failed(self, activity_id: &str, reason: &str, details: &str) -> Self {
        let scheduled = self.scheduled_id(activity_id);
        self.with(
            EventType::ActivityTaskFailed,
            json!({"scheduledEventId": scheduled, "reason": reason, "details": details}),
        )
    }

    pub fn activity_timed_out(self, activity_id: &str) -> Self {
        let scheduled = self.scheduled_id(activity_id);
        self.with(
            EventType::ActivityTaskTimedOut,
            json!({"scheduledEventId": scheduled, "timeoutType": "START_TO_CLOSE"}),
        )
    }

    pub fn timer_started(self, timer_id: &str) -> Self {
        self.with(
            EventType::TimerStarted,
            json!({"timerId": timer_id, "startToFireTimeout": "1"}),
        )
    }

    pub fn timer_fired(self, timer_id: &str) -> Self {
        self.with(EventType::TimerFired, json!({"timerId": timer_id}))
    }

    pub fn child_initiated(mut self, workflow_id: &str, name: &str, version: &str) -> Self {
        let id = self.push(
            EventType::StartChildWorkflowExecutionInitiated,
            json!({
                "workflowId": workflow_id,
                "workflowType": {"name": name, "version": version},
            }),
        );
        self.initiated.insert(workflow_id.to_string(), id);
        self
    }

    pub fn child_started(self, workflow_id: &str, run_id: &str) -> Self {
        let initiated = self.initiated_id(workflow_id);
        self.with(
            EventType::ChildWorkflowExecutionStarted,
            json!({
                "initiatedEventId": initiated,
                "workflowExecution": {"workflowId": workflow_id, "runId": run_id},
            }),
        )
    }

    pub fn child_completed(self, workflow_id: &str, result: Value) -> Self {
        let initiated = self.initiated_id(workflow_id);
        let mut attributes = json!({
            "initiatedEventId": initiated,
            "workflowExecution": {"workflowId": workflow_id},
        });
        if let Some(result) = payload(&result) {
            attributes["result"] = Value::String(result);
        }
        self.with(EventType::ChildWorkflowExecutionCompleted, attributes)
    }

    pub fn child_failed(self, workflow_id: &str, reason: &str, details: &str) -> Self {
        let initiated = self.initiated_id(workflow_id);
        self.with(
            EventType::ChildWorkflowExecutionFailed,
            json!({
                "initiatedEventId": initiated,
                "workflowExecution": {"workflowId": workflow_id},
                "reason": reason,
                "details": details,
            }),
        )
    }

    pub fn signal(self, name: &str, input: Value) -> Self {
        let mut attributes = json!({"signalName": name});
        if let Some(input) = payload(&input) {
            attributes["input"] = Value::String(input);
        }
        self.with(EventType::WorkflowExecutionSignaled, attributes)
    }

    pub fn cancel_requested(self) -> Self {
        self.with(EventType::WorkflowExecutionCancelRequested, json!({}))
    }

    /// Decision task round trip, recording `execution_context` if given
    pub fn decision_completed(mut self, execution_context: Option<&str>) -> Self {
        let scheduled = self.push(
            EventType::DecisionTaskScheduled,
            json!({"taskList": {"name": "default"}}),
        );
        let started = self.push(
            EventType::DecisionTaskStarted,
            json!({"scheduledEventId": scheduled}),
        );
        let mut attributes = json!({"scheduledEventId": scheduled, "startedEventId": started});
        if let Some(ctx) = execution_context {
            attributes["executionContext"] = Value::String(ctx.to_string());
        }
        self.with(EventType::DecisionTaskCompleted, attributes)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    pub fn build(self) -> History {
        History::from_events(self.events)
    }
}

/// An activity task as the service hands it out. A `Null` input means no
/// payload.
pub fn activity_task(task_token: &str, activity_id: &str, name: &str, input: Value) -> ActivityTask {
    ActivityTask {
        task_token: task_token.to_string(),
        activity_id: activity_id.to_string(),
        activity_type: ActivityType::new(name, "1.0"),
        workflow_execution: WorkflowExecution::new("wf-1", "run-1"),
        input: payload(&input),
        started_event_id: 0,
    }
}

/// One page of a decision task for `workflow_type` on execution `wf-1/run-1`
pub fn decision_page(
    task_token: &str,
    workflow_type: WorkflowType,
    events: Vec<Event>,
    next_page_token: Option<&str>,
) -> DecisionTaskPage {
    let started_event_id = events.last().map(Event::id).unwrap_or_default();
    DecisionTaskPage {
        task_token: task_token.to_string(),
        workflow_execution: WorkflowExecution::new("wf-1", "run-1"),
        workflow_type,
        events,
        started_event_id,
        previous_started_event_id: 0,
        next_page_token: next_page_token.map(str::to_string),
    }
}
