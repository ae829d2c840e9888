//! Workflow types and deterministic replay

pub mod context;
pub mod definition;
pub mod future;
pub mod replay;
pub mod task_registry;

pub use context::{ActivitySpec, CallSignature, ChildWorkflowSpec, ReplayOptions, WorkflowContext};
pub use definition::WorkflowDefinition;
pub use future::{FailureKind, FutureKind, FutureStatus, TaskFailure, WorkflowFuture};
pub use replay::{replay, ReplayOutcome, WorkflowStatus};
pub use task_registry::{TaskRegistry, TaskStatus};
