//! Flowlane engine for Rust
//!
//! Drives workflow executions hosted by an SWF-style task exchange service:
//! deciders replay workflow definitions against their history to compute
//! the next decisions, and activity workers run each handler in its own
//! task process beside a heartbeat.

#![allow(clippy::result_large_err)]

pub mod activity;
pub mod client;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod worker;
pub mod workflow;

/// Testing utilities: a scripted in-memory service and history builders.
/// Available only with the `testing` feature enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export core types
pub use flowlane_core::{
    ActivityTask, ActivityTimeouts, ActivityType, ChildWorkflowTimeouts, CoreError, Decision,
    DecisionTask, Delay, History, NamedIdentity, RetryPolicy, SwfService, WorkflowExecution,
    WorkflowExecutionInfo, WorkflowType,
};

pub use error::{FlowError, Result};

// Re-export config types
pub use config::{
    ConfigError, Credentials, DeciderConfig, Isolation, PollConfig, ServiceContext, WorkerConfig,
};

// Re-export client types
pub use client::{Client, StartWorkflowOptions, StartWorkflowResult};

// Re-export workflow types
pub use workflow::{
    ActivitySpec, CallSignature, ChildWorkflowSpec, ReplayOptions, ReplayOutcome, TaskRegistry,
    TaskStatus, WorkflowContext, WorkflowDefinition, WorkflowFuture, WorkflowStatus,
};

// Re-export activity types
pub use activity::{
    ActivityContext, ActivityDefinition, ActivityError, ActivityInput, ActivityRegistry,
    ActivityResult, CommandSpec, RegisteredActivity, TaskMessage,
};

// Re-export worker types
pub use worker::{
    ActivityWorker, Actor, ActorHandle, Decider, Poller, ProcessSupervisor, RegisteredWorkflow,
    WorkflowRegistry,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::activity::{
        ActivityContext, ActivityDefinition, ActivityError, ActivityInput, ActivityRegistry,
        ActivityResult, CommandSpec,
    };
    pub use crate::activity::serve_task;
    pub use crate::client::{Client, StartWorkflowOptions};
    pub use crate::config::{DeciderConfig, Isolation, ServiceContext, WorkerConfig};
    pub use crate::error::{FlowError, Result};
    pub use crate::worker::{ActivityWorker, Decider, WorkflowRegistry};
    pub use crate::workflow::{
        ActivitySpec, ChildWorkflowSpec, WorkflowContext, WorkflowDefinition, WorkflowFuture,
    };
    pub use async_trait::async_trait;
    pub use flowlane_core::{ActivityType, SwfService, WorkflowExecution, WorkflowType};
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{json, Value};
}
