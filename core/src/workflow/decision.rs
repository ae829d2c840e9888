//! Decisions returned to the service at the end of a decision task

use std::time::Duration;

use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::client::types::{ActivityType, WorkflowType};

/// Timeouts attached to a scheduled activity. `None` uses the type default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityTimeouts {
    pub schedule_to_start: Option<Duration>,
    pub start_to_close: Option<Duration>,
    pub schedule_to_close: Option<Duration>,
    pub heartbeat: Option<Duration>,
}

/// Timeouts attached to a started child workflow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildWorkflowTimeouts {
    pub execution_start_to_close: Option<Duration>,
    pub task_start_to_close: Option<Duration>,
}

/// Whole seconds, rounded up so that a non-zero duration never goes out as
/// `"0"`
pub fn ceil_seconds(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

fn seconds(d: Duration) -> String {
    ceil_seconds(d).to_string()
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: Option<String>) {
    if let Some(v) = value {
        map.insert(key.to_string(), Value::String(v));
    }
}

/// A decision made by replaying a workflow
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    ScheduleActivityTask {
        activity_id: String,
        activity_type: ActivityType,
        input: Option<String>,
        task_list: Option<String>,
        timeouts: ActivityTimeouts,
    },
    StartTimer {
        timer_id: String,
        start_to_fire: Duration,
    },
    StartChildWorkflowExecution {
        workflow_id: String,
        workflow_type: WorkflowType,
        input: Option<String>,
        task_list: Option<String>,
        tag_list: Vec<String>,
        timeouts: ChildWorkflowTimeouts,
    },
    CompleteWorkflowExecution {
        result: Option<String>,
    },
    FailWorkflowExecution {
        reason: String,
        details: String,
    },
    CancelWorkflowExecution {
        details: Option<String>,
    },
}

impl Decision {
    /// Wire name of the decision
    pub fn decision_type(&self) -> &'static str {
        match self {
            Self::ScheduleActivityTask { .. } => "ScheduleActivityTask",
            Self::StartTimer { .. } => "StartTimer",
            Self::StartChildWorkflowExecution { .. } => "StartChildWorkflowExecution",
            Self::CompleteWorkflowExecution { .. } => "CompleteWorkflowExecution",
            Self::FailWorkflowExecution { .. } => "FailWorkflowExecution",
            Self::CancelWorkflowExecution { .. } => "CancelWorkflowExecution",
        }
    }

    /// Whether this decision closes the workflow execution
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CompleteWorkflowExecution { .. }
                | Self::FailWorkflowExecution { .. }
                | Self::CancelWorkflowExecution { .. }
        )
    }

    /// Activity id of a schedule decision
    pub fn activity_id(&self) -> Option<&str> {
        match self {
            Self::ScheduleActivityTask { activity_id, .. } => Some(activity_id),
            _ => None,
        }
    }

    /// Encode in the service wire shape:
    /// `{"decisionType": ..., "<lowerCamelType>DecisionAttributes": {...}}`
    pub fn to_value(&self) -> Value {
        let mut attrs = Map::new();
        match self {
            Self::ScheduleActivityTask {
                activity_id,
                activity_type,
                input,
                task_list,
                timeouts,
            } => {
                attrs.insert("activityId".into(), json!(activity_id));
                attrs.insert(
                    "activityType".into(),
                    json!({"name": activity_type.name, "version": activity_type.version}),
                );
                insert_opt(&mut attrs, "input", input.clone());
                if let Some(task_list) = task_list {
                    attrs.insert("taskList".into(), json!({ "name": task_list }));
                }
                insert_opt(
                    &mut attrs,
                    "scheduleToStartTimeout",
                    timeouts.schedule_to_start.map(seconds),
                );
                insert_opt(
                    &mut attrs,
                    "startToCloseTimeout",
                    timeouts.start_to_close.map(seconds),
                );
                insert_opt(
                    &mut attrs,
                    "scheduleToCloseTimeout",
                    timeouts.schedule_to_close.map(seconds),
                );
                insert_opt(&mut attrs, "heartbeatTimeout", timeouts.heartbeat.map(seconds));
            }
            Self::StartTimer {
                timer_id,
                start_to_fire,
            } => {
                attrs.insert("timerId".into(), json!(timer_id));
                attrs.insert("startToFireTimeout".into(), json!(seconds(*start_to_fire)));
            }
            Self::StartChildWorkflowExecution {
                workflow_id,
                workflow_type,
                input,
                task_list,
                tag_list,
                timeouts,
            } => {
                attrs.insert("workflowId".into(), json!(workflow_id));
                attrs.insert(
                    "workflowType".into(),
                    json!({"name": workflow_type.name, "version": workflow_type.version}),
                );
                insert_opt(&mut attrs, "input", input.clone());
                if let Some(task_list) = task_list {
                    attrs.insert("taskList".into(), json!({ "name": task_list }));
                }
                if !tag_list.is_empty() {
                    attrs.insert("tagList".into(), json!(tag_list));
                }
                insert_opt(
                    &mut attrs,
                    "executionStartToCloseTimeout",
                    timeouts.execution_start_to_close.map(seconds),
                );
                insert_opt(
                    &mut attrs,
                    "taskStartToCloseTimeout",
                    timeouts.task_start_to_close.map(seconds),
                );
            }
            Self::CompleteWorkflowExecution { result } => {
                insert_opt(&mut attrs, "result", result.clone());
            }
            Self::FailWorkflowExecution { reason, details } => {
                attrs.insert("reason".into(), json!(reason));
                attrs.insert("details".into(), json!(details));
            }
            Self::CancelWorkflowExecution { details } => {
                insert_opt(&mut attrs, "details", details.clone());
            }
        }

        let decision_type = self.decision_type();
        let mut key = decision_type.to_string();
        if let Some(first) = key.get_mut(0..1) {
            first.make_ascii_lowercase();
        }
        key.push_str("DecisionAttributes");

        let mut out = Map::new();
        out.insert("decisionType".into(), json!(decision_type));
        out.insert(key, Value::Object(attrs));
        Value::Object(out)
    }
}

impl Serialize for Decision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}
