//! Client-side view of the task exchange service.
//!
//! The transport itself is out of scope; this module defines the
//! [`SwfService`] trait it must implement and the shapes it exchanges.

mod service;
pub mod types;

pub use service::{fetch_decision_task, SwfService};
pub use types::{
    decode_payload, encode_payload, ActivityTask, ActivityType, ActivityTypeRegistration,
    ChildPolicy, DecisionTask, DecisionTaskPage, DomainRegistration, ExecutionStatus,
    HeartbeatResponse, StartWorkflowRequest, WorkflowExecution, WorkflowExecutionInfo,
    WorkflowType, WorkflowTypeRegistration,
};
