//! History event types
//!
//! Events arrive from the service in its wire shape:
//!
//! ```json
//! {
//!   "eventId": 5,
//!   "eventType": "ActivityTaskCompleted",
//!   "eventTimestamp": 1700000000.25,
//!   "activityTaskCompletedEventAttributes": {"scheduledEventId": 3, "result": "7"}
//! }
//! ```
//!
//! [`Event`] keeps the typed header and the attribute object as raw JSON.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

macro_rules! event_types {
    ($($variant:ident),* $(,)?) => {
        /// Event types recorded in a workflow execution history
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventType {
            $($variant,)*
            /// Event type this engine does not know about
            Unknown,
        }

        impl EventType {
            /// Wire name of the event type
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant),)*
                    Self::Unknown => "Unknown",
                }
            }

            /// Parse a wire name, mapping unrecognised names to `Unknown`
            pub fn parse(name: &str) -> Self {
                match name {
                    $(stringify!($variant) => Self::$variant,)*
                    _ => Self::Unknown,
                }
            }
        }
    };
}

event_types! {
    WorkflowExecutionStarted,
    WorkflowExecutionCancelRequested,
    WorkflowExecutionCompleted,
    CompleteWorkflowExecutionFailed,
    WorkflowExecutionFailed,
    FailWorkflowExecutionFailed,
    WorkflowExecutionTimedOut,
    WorkflowExecutionCanceled,
    CancelWorkflowExecutionFailed,
    WorkflowExecutionContinuedAsNew,
    ContinueAsNewWorkflowExecutionFailed,
    WorkflowExecutionTerminated,
    DecisionTaskScheduled,
    DecisionTaskStarted,
    DecisionTaskCompleted,
    DecisionTaskTimedOut,
    ActivityTaskScheduled,
    ScheduleActivityTaskFailed,
    ActivityTaskStarted,
    ActivityTaskCompleted,
    ActivityTaskFailed,
    ActivityTaskTimedOut,
    ActivityTaskCanceled,
    ActivityTaskCancelRequested,
    RequestCancelActivityTaskFailed,
    WorkflowExecutionSignaled,
    MarkerRecorded,
    RecordMarkerFailed,
    TimerStarted,
    StartTimerFailed,
    TimerFired,
    TimerCanceled,
    CancelTimerFailed,
    StartChildWorkflowExecutionInitiated,
    StartChildWorkflowExecutionFailed,
    ChildWorkflowExecutionStarted,
    ChildWorkflowExecutionCompleted,
    ChildWorkflowExecutionFailed,
    ChildWorkflowExecutionTimedOut,
    ChildWorkflowExecutionCanceled,
    ChildWorkflowExecutionTerminated,
    SignalExternalWorkflowExecutionInitiated,
    SignalExternalWorkflowExecutionFailed,
    ExternalWorkflowExecutionSignaled,
    RequestCancelExternalWorkflowExecutionInitiated,
    RequestCancelExternalWorkflowExecutionFailed,
    ExternalWorkflowExecutionCancelRequested,
}

impl EventType {
    /// Check if this event type closes an activity attempt
    pub fn is_activity_terminal(&self) -> bool {
        matches!(
            self,
            Self::ActivityTaskCompleted
                | Self::ActivityTaskFailed
                | Self::ActivityTaskTimedOut
                | Self::ActivityTaskCanceled
                | Self::ScheduleActivityTaskFailed
        )
    }

    /// Check if this event type closes a child workflow
    pub fn is_child_workflow_terminal(&self) -> bool {
        matches!(
            self,
            Self::ChildWorkflowExecutionCompleted
                | Self::ChildWorkflowExecutionFailed
                | Self::ChildWorkflowExecutionTimedOut
                | Self::ChildWorkflowExecutionCanceled
                | Self::ChildWorkflowExecutionTerminated
                | Self::StartChildWorkflowExecutionFailed
        )
    }

    /// Check if this event type closes the workflow execution itself
    pub fn is_workflow_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowExecutionCompleted
                | Self::WorkflowExecutionFailed
                | Self::WorkflowExecutionTimedOut
                | Self::WorkflowExecutionCanceled
                | Self::WorkflowExecutionContinuedAsNew
                | Self::WorkflowExecutionTerminated
        )
    }

    /// Key under which the service nests this event's attributes,
    /// e.g. `activityTaskScheduledEventAttributes`.
    pub fn attributes_key(&self) -> String {
        let name = self.as_str();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => format!(
                "{}{}EventAttributes",
                first.to_ascii_lowercase(),
                chars.as_str()
            ),
            None => "EventAttributes".to_string(),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable entry of a workflow execution history
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: i64,
    event_type: EventType,
    attributes: Value,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event
    pub fn new(id: i64, event_type: EventType, attributes: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            event_type,
            attributes,
            timestamp,
        }
    }

    /// Event id, unique and increasing within one execution history
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Get the event type
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Get the timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Get the attribute object
    pub fn attributes(&self) -> &Value {
        &self.attributes
    }

    /// Get an attribute
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Get an attribute as a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    /// Get an attribute as an i64
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.attributes.get(key).and_then(|v| v.as_i64())
    }

    /// Get a nested attribute, e.g. `["activityType", "name"]`
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.attributes, |value, key| value.get(key))
    }

    /// Get a nested string attribute
    pub fn get_path_str(&self, path: &[&str]) -> Option<&str> {
        self.get_path(path).and_then(|v| v.as_str())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    event_id: i64,
    event_type: String,
    #[serde(default)]
    event_timestamp: Option<Value>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

fn parse_timestamp(raw: Option<Value>) -> Result<DateTime<Utc>, String> {
    match raw {
        None | Some(Value::Null) => Ok(DateTime::<Utc>::UNIX_EPOCH),
        Some(Value::Number(n)) => {
            let secs = n.as_f64().ok_or("eventTimestamp is not a number")?;
            let millis = (secs * 1000.0).round() as i64;
            Utc.timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| format!("eventTimestamp out of range: {}", secs))
        }
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| format!("invalid eventTimestamp '{}': {}", s, e)),
        Some(other) => Err(format!("unsupported eventTimestamp: {}", other)),
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireEvent::deserialize(deserializer)?;
        let event_type = EventType::parse(&wire.event_type);
        let timestamp = parse_timestamp(wire.event_timestamp).map_err(D::Error::custom)?;
        let attributes = wire
            .rest
            .into_iter()
            .find(|(key, _)| key.ends_with("EventAttributes"))
            .map(|(_, value)| value)
            .unwrap_or_else(|| Value::Object(Map::new()));

        Ok(Self {
            id: wire.event_id,
            event_type,
            attributes,
            timestamp,
        })
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("eventId", &self.id)?;
        map.serialize_entry("eventType", self.event_type.as_str())?;
        map.serialize_entry(
            "eventTimestamp",
            &(self.timestamp.timestamp_millis() as f64 / 1000.0),
        )?;
        map.serialize_entry(&self.event_type.attributes_key(), &self.attributes)?;
        map.end()
    }
}
