//! Deterministic replay of a workflow against its history
//!
//! [`replay`] runs the workflow body once, from the beginning, with a fresh
//! [`WorkflowContext`] and turns the way it ended into the decisions of the
//! next response:
//!
//! | outcome                   | decisions                             |
//! |---------------------------|---------------------------------------|
//! | returned a value          | `CompleteWorkflowExecution`           |
//! | suspended                 | whatever the body scheduled           |
//! | canceled after a request  | `CancelWorkflowExecution`             |
//! | any other error or panic  | `FailWorkflowExecution`               |

use std::any::Any;
use std::sync::Arc;

use flowlane_core::{limits, Decision, History, WorkflowExecution};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::context::{CallSignature, ReplayOptions, WorkflowContext};
use super::future::WorkflowFuture;
use super::task_registry::TaskStatus;
use crate::error::{FlowError, Result};
use crate::worker::registry::RegisteredWorkflow;

/// How a replay ended
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowStatus {
    Completed(Value),
    Suspended,
    Failed { reason: String, details: String },
    Canceled,
}

/// Everything one replay produced
#[derive(Debug)]
pub struct ReplayOutcome {
    pub decisions: Vec<Decision>,
    pub futures: Vec<WorkflowFuture>,
    pub signatures: Vec<CallSignature>,
    pub status: WorkflowStatus,
    pub task_status: Vec<TaskStatus>,
    pub execution_context: Option<String>,
}

impl ReplayOutcome {
    pub fn is_suspended(&self) -> bool {
        self.status == WorkflowStatus::Suspended
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Replay `workflow` over `history` and compute the next decisions.
///
/// The body runs on its own task so that a panic is reported as a workflow
/// failure instead of taking the decider down.
pub async fn replay(
    history: Arc<History>,
    workflow: &RegisteredWorkflow,
    input: Value,
    execution: WorkflowExecution,
    options: ReplayOptions,
) -> ReplayOutcome {
    let ctx = Arc::new(WorkflowContext::new(
        execution,
        workflow.workflow_type().clone(),
        history,
        input.clone(),
        options,
    ));

    let body = workflow.execute(Arc::clone(&ctx), input);
    let result = match tokio::spawn(body).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(FlowError::WorkflowFailed(format!(
            "workflow panicked: {}",
            panic_message(e.into_panic())
        ))),
        Err(e) => Err(FlowError::WorkflowFailed(e.to_string())),
    };

    finish(&ctx, result)
}

fn finish(ctx: &WorkflowContext, result: Result<Value>) -> ReplayOutcome {
    let task_status = ctx.task_registry().get_task_status();
    let mut state = ctx.state.lock();
    let scheduled = std::mem::take(&mut state.decisions);
    let workflow_id = ctx.workflow_id().to_string();

    let (decisions, status) = match result {
        Ok(value) => match serde_json::to_string(&value) {
            Ok(payload) if payload.len() > limits::MAX_DETAILS_LEN => fail(
                FlowError::WorkflowFailed(format!(
                    "result of {} bytes exceeds {}",
                    payload.len(),
                    limits::MAX_DETAILS_LEN
                )),
                &task_status,
            ),
            Ok(payload) => {
                if !scheduled.is_empty() {
                    warn!(
                        workflow_id = %workflow_id,
                        dropped = scheduled.len(),
                        "Workflow completed with unawaited tasks"
                    );
                }
                (
                    vec![Decision::CompleteWorkflowExecution {
                        result: Some(payload),
                    }],
                    WorkflowStatus::Completed(value),
                )
            }
            Err(e) => fail(FlowError::Serialization(e), &task_status),
        },
        Err(FlowError::Suspended { reason }) => {
            debug!(
                workflow_id = %workflow_id,
                decisions = scheduled.len(),
                deferred = state.deferred,
                reason = %reason,
                "Workflow suspended"
            );
            (scheduled, WorkflowStatus::Suspended)
        }
        Err(FlowError::WorkflowCanceled(details)) if ctx.is_cancel_requested() => (
            vec![Decision::CancelWorkflowExecution {
                details: Some(limits::details(&details)),
            }],
            WorkflowStatus::Canceled,
        ),
        Err(error) => fail(error, &task_status),
    };

    ReplayOutcome {
        decisions,
        futures: std::mem::take(&mut state.futures),
        signatures: std::mem::take(&mut state.signatures),
        status,
        task_status,
        execution_context: state
            .execution_context
            .take()
            .map(|c| limits::truncate_owned(c, limits::MAX_EXECUTION_CONTEXT_LEN)),
    }
}

fn fail(error: FlowError, task_status: &[TaskStatus]) -> (Vec<Decision>, WorkflowStatus) {
    let reason = limits::reason(&format!("{}: {}", error.kind(), error));
    let details = limits::details(
        &json!({
            "error": error.to_string(),
            "tasks": task_status,
        })
        .to_string(),
    );
    warn!(reason = %reason, "Workflow failed");
    (
        vec![Decision::FailWorkflowExecution {
            reason: reason.clone(),
            details: details.clone(),
        }],
        WorkflowStatus::Failed { reason, details },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityInput;
    use crate::testing::HistoryBuilder;
    use crate::workflow::context::ActivitySpec;

    fn execution() -> WorkflowExecution {
        WorkflowExecution::new("wf-1", "run-1")
    }

    fn two_steps() -> RegisteredWorkflow {
        RegisteredWorkflow::from_fn("steps", "1", |ctx, _input| async move {
            let a = ctx.submit(&ActivitySpec::new("a", "1"), ActivityInput::new())?;
            let first = a.await?;
            let b = ctx.submit(&ActivitySpec::new("b", "1"), vec![first])?;
            Ok(b.await?)
        })
    }

    #[tokio::test]
    async fn test_first_replay_schedules() {
        let history = HistoryBuilder::new().workflow_started(json!(null)).build();
        let outcome = replay(
            Arc::new(history),
            &two_steps(),
            Value::Null,
            execution(),
            ReplayOptions::default(),
        )
        .await;
        assert!(outcome.is_suspended());
        assert_eq!(outcome.decisions.len(), 1);
        assert_eq!(outcome.decisions[0].activity_id(), Some("a-0"));
    }

    #[tokio::test]
    async fn test_completed_history_completes() {
        let history = HistoryBuilder::new()
            .workflow_started(json!(null))
            .activity_scheduled("a-0", "a", "1")
            .activity_completed("a-0", json!(1))
            .activity_scheduled("b-0", "b", "1")
            .activity_completed("b-0", json!(2))
            .build();
        let outcome = replay(
            Arc::new(history),
            &two_steps(),
            Value::Null,
            execution(),
            ReplayOptions::default(),
        )
        .await;
        assert_eq!(outcome.status, WorkflowStatus::Completed(json!(2)));
        assert!(matches!(
            &outcome.decisions[..],
            [Decision::CompleteWorkflowExecution { result: Some(r) }] if r == "2"
        ));
    }

    #[tokio::test]
    async fn test_task_failure_fails_workflow() {
        let history = HistoryBuilder::new()
            .activity_scheduled("a-0", "a", "1")
            .activity_failed("a-0", "ValueError: bad", "trace")
            .build();
        let outcome = replay(
            Arc::new(history),
            &two_steps(),
            Value::Null,
            execution(),
            ReplayOptions::default(),
        )
        .await;
        match &outcome.status {
            WorkflowStatus::Failed { reason, details } => {
                assert!(reason.starts_with("TaskFailed: "));
                let details: Value = serde_json::from_str(details).unwrap();
                assert_eq!(details["tasks"][0]["task_name"], "a");
                assert_eq!(details["tasks"][0]["success"], false);
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let workflow = RegisteredWorkflow::from_fn("boom", "1", |_ctx, _input| async move {
            if true {
                panic!("kaboom");
            }
            Ok(Value::Null)
        });
        let outcome = replay(
            Arc::new(HistoryBuilder::new().build()),
            &workflow,
            Value::Null,
            execution(),
            ReplayOptions::default(),
        )
        .await;
        match outcome.status {
            WorkflowStatus::Failed { reason, .. } => assert!(reason.contains("kaboom")),
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_after_request() {
        let workflow = RegisteredWorkflow::from_fn("stoppable", "1", |ctx, _input| async move {
            if ctx.is_cancel_requested() {
                return Err(FlowError::WorkflowCanceled("stopping".into()));
            }
            ctx.wait_signal("go")
        });
        let history = HistoryBuilder::new().cancel_requested().build();
        let outcome = replay(
            Arc::new(history),
            &workflow,
            Value::Null,
            execution(),
            ReplayOptions::default(),
        )
        .await;
        assert_eq!(outcome.status, WorkflowStatus::Canceled);
        assert!(matches!(
            outcome.decisions[0],
            Decision::CancelWorkflowExecution { .. }
        ));
    }

    #[tokio::test]
    async fn test_execution_context_carried() {
        let workflow = RegisteredWorkflow::from_fn("ctx", "1", |ctx, _input| async move {
            ctx.set_execution_context("step-2");
            ctx.sleep(std::time::Duration::from_secs(1))?;
            Ok(Value::Null)
        });
        let outcome = replay(
            Arc::new(HistoryBuilder::new().build()),
            &workflow,
            Value::Null,
            execution(),
            ReplayOptions::default(),
        )
        .await;
        assert!(outcome.is_suspended());
        assert_eq!(outcome.execution_context.as_deref(), Some("step-2"));
        assert_eq!(outcome.signatures.len(), 1);
    }
}
