//! ActivityDefinition trait

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::context::ActivityContext;
use super::error::ActivityResult;
use super::input::ActivityInput;

/// An activity implemented in Rust
#[async_trait]
pub trait ActivityDefinition: Send + Sync {
    type Output: Serialize + Send + 'static;

    /// Activity type name
    fn name(&self) -> &str;

    /// Activity type version
    fn version(&self) -> &str {
        "1.0"
    }

    /// Heartbeat timeout declared for the type; the worker's heartbeat
    /// interval must stay below it
    fn heartbeat_timeout(&self) -> Option<Duration> {
        None
    }

    fn description(&self) -> Option<&str> {
        None
    }

    async fn execute(&self, ctx: &ActivityContext, input: ActivityInput) -> ActivityResult<Self::Output>;
}
