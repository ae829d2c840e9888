//! WorkflowDefinition trait

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;
use crate::workflow::context::WorkflowContext;

/// Definition of a workflow with typed input and output.
///
/// `execute` runs again from the start on every decision task, so it must only
/// act through the context and derive everything else from its input.
#[async_trait]
pub trait WorkflowDefinition: Send + Sync {
    type Input: Serialize + DeserializeOwned + Send + 'static;
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Workflow type name
    fn name(&self) -> &str;

    /// Workflow type version
    fn version(&self) -> &str {
        "1.0"
    }

    /// Default task list for executions of this type
    fn task_list(&self) -> Option<&str> {
        None
    }

    fn description(&self) -> Option<&str> {
        None
    }

    async fn execute(&self, ctx: &WorkflowContext, input: Self::Input) -> Result<Self::Output>;
}
