//! Workflow module - events, history and decisions

pub mod decision;
pub mod event;
pub mod history;

pub use decision::{ActivityTimeouts, ChildWorkflowTimeouts, Decision};
pub use event::{Event, EventType};
pub use history::{
    ActivityRecord, ActivityState, ChildWorkflowRecord, ChildWorkflowState, History,
    SignalRecord, TimerRecord, TimerState,
};
