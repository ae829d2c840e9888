//! Pollers and the machinery that runs their tasks

pub mod activity_worker;
pub mod actor;
pub mod decider;
pub mod heartbeat;
pub mod registry;
pub mod supervisor;

pub use activity_worker::{ActivityWorker, SlotOutcome};
pub use actor::{complete_with_retry, Actor, ActorHandle, Poller};
pub use decider::Decider;
pub use heartbeat::{Heartbeat, HeartbeatExit};
pub use registry::{BoxedWorkflowFn, RegisteredWorkflow, WorkflowRegistry};
pub use supervisor::{PidGuard, PidSet, ProcessSupervisor};
