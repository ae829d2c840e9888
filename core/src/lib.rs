//! # Flowlane Core
//!
//! Protocol-level building blocks for the Flowlane workflow engine.
//!
//! This crate knows how to talk about the task exchange service but does not
//! run anything: the engine (pollers, replay, worker pool) lives in the
//! `flowlane` crate.
//!
//! ## Modules
//!
//! - [`client`] - the [`SwfService`] seam and its request/response shapes
//! - [`workflow`] - history events, the parsed [`History`] and [`Decision`]s
//! - [`retry`] - retry with backoff for service calls
//! - [`worker`] - poller identity
//! - [`limits`] - string length limits
//! - [`error`] - core error types

pub mod client;
pub mod error;
pub mod limits;
pub mod retry;
pub mod worker;
pub mod workflow;

pub use error::{CoreError, CoreResult};

pub use client::{
    decode_payload, encode_payload, fetch_decision_task, ActivityTask, ActivityType,
    ActivityTypeRegistration, ChildPolicy, DecisionTask, DecisionTaskPage, DomainRegistration,
    ExecutionStatus, HeartbeatResponse, StartWorkflowRequest, SwfService, WorkflowExecution,
    WorkflowExecutionInfo, WorkflowType, WorkflowTypeRegistration,
};

pub use retry::{calculate_backoff, with_delay, Delay, RetryOn, RetryPolicy, Retryable};

pub use worker::NamedIdentity;

pub use workflow::{
    ActivityRecord, ActivityState, ActivityTimeouts, ChildWorkflowRecord, ChildWorkflowState,
    ChildWorkflowTimeouts, Decision, Event, EventType, History, SignalRecord, TimerRecord,
    TimerState,
};
