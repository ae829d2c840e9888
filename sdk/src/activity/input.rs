//! Positional and keyword arguments passed to an activity

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlowError, Result};

/// Activity arguments, carried on the wire as `{"args": [...], "kwargs": {...}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityInput {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl ActivityInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Input made of positional arguments only
    pub fn args(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Map::new(),
        }
    }

    pub fn with_arg(mut self, value: Value) -> Self {
        self.args.push(value);
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    /// Positional argument deserialized into `T`
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self
            .args
            .get(index)
            .ok_or_else(|| FlowError::InvalidInput(format!("missing argument {}", index)))?;
        serde_json::from_value(value.clone())
            .map_err(|e| FlowError::InvalidInput(format!("argument {}: {}", index, e)))
    }

    /// Keyword argument deserialized into `T`
    pub fn kwarg<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .kwargs
            .get(key)
            .ok_or_else(|| FlowError::InvalidInput(format!("missing argument '{}'", key)))?;
        serde_json::from_value(value.clone())
            .map_err(|e| FlowError::InvalidInput(format!("argument '{}': {}", key, e)))
    }

    /// Encode for the wire
    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a wire payload. A JSON value that is not an args/kwargs
    /// object becomes the single positional argument.
    pub fn from_payload(raw: Option<&str>) -> Result<Self> {
        let Some(raw) = raw else {
            return Ok(Self::default());
        };
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| FlowError::InvalidInput(format!("activity input is not JSON: {}", e)))?;
        Ok(Self::from(value))
    }
}

impl From<Vec<Value>> for ActivityInput {
    fn from(args: Vec<Value>) -> Self {
        Self::args(args)
    }
}

impl From<Value> for ActivityInput {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(ref map)
                if map.keys().all(|k| k == "args" || k == "kwargs") && !map.is_empty() =>
            {
                serde_json::from_value(value.clone()).unwrap_or_else(|_| Self::args(vec![value]))
            }
            Value::Null => Self::default(),
            other => Self::args(vec![other]),
        }
    }
}
