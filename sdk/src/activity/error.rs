//! Error raised by activity handlers

use flowlane_core::{limits, CoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinError;

use crate::error::FlowError;

/// Handler-level failure, reported as `respond_activity_task_failed` with
/// reason `"{error_type}: {message}"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{error_type}: {message}")]
pub struct ActivityError {
    pub error_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Result type returned by activity handlers
pub type ActivityResult<T> = std::result::Result<T, ActivityError>;

impl ActivityError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Wrap any error, naming it after its type
    pub fn from_error<E: std::error::Error>(error: &E) -> Self {
        let type_name = std::any::type_name::<E>();
        let short = type_name
            .split('<')
            .next()
            .and_then(|path| path.rsplit("::").next())
            .unwrap_or(type_name);
        Self::new(short, error.to_string())
    }

    /// Failure reason, truncated to the service limit
    pub fn reason(&self) -> String {
        limits::reason(&self.to_string())
    }

    /// Failure details, truncated to the service limit
    pub fn details_string(&self) -> String {
        match &self.details {
            None => String::new(),
            Some(Value::String(s)) => limits::details(s),
            Some(other) => limits::details(&other.to_string()),
        }
    }
}

/// Serialize a handler result, failing with `ResultTooLarge` past the
/// service limit
pub(crate) fn encode_result(value: &Value) -> ActivityResult<String> {
    let payload = serde_json::to_string(value)?;
    if payload.len() > limits::MAX_DETAILS_LEN {
        return Err(ActivityError::new(
            "ResultTooLarge",
            format!(
                "result of {} bytes exceeds {}",
                payload.len(),
                limits::MAX_DETAILS_LEN
            ),
        ));
    }
    Ok(payload)
}

/// A handler task that panicked or was aborted
impl From<JoinError> for ActivityError {
    fn from(err: JoinError) -> Self {
        if !err.is_panic() {
            return Self::new("Canceled", err.to_string());
        }
        let payload = err.into_panic();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::new("Panic", message)
    }
}

impl From<FlowError> for ActivityError {
    fn from(err: FlowError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<CoreError> for ActivityError {
    fn from(err: CoreError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<serde_json::Error> for ActivityError {
    fn from(err: serde_json::Error) -> Self {
        Self::new("SerializationError", err.to_string())
    }
}

impl From<std::io::Error> for ActivityError {
    fn from(err: std::io::Error) -> Self {
        Self::new("IoError", err.to_string())
    }
}
