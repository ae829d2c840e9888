//! Decider - polls for decision tasks and answers them by replay
//!
//! Every decision task carries the full history of its execution. The
//! decider looks the workflow type up in its registry, replays the
//! definition from the start against that history and sends back the
//! decisions the replay produced.

use std::sync::Arc;

use async_trait::async_trait;
use flowlane_core::{fetch_decision_task, DecisionTask, NamedIdentity, SwfService};
use tracing::{debug, info, warn, Instrument};

use super::actor::{complete_with_retry, Actor, Poller};
use super::registry::WorkflowRegistry;
use crate::config::{DeciderConfig, ServiceContext};
use crate::error::Result;
use crate::telemetry::decision_span;
use crate::workflow::{replay, ReplayOptions, ReplayOutcome};

/// Polls one task list for decision tasks
pub struct Decider {
    service: Arc<dyn SwfService>,
    context: ServiceContext,
    task_list: String,
    registry: Arc<WorkflowRegistry>,
    config: DeciderConfig,
}

impl Decider {
    pub fn new(
        service: Arc<dyn SwfService>,
        context: ServiceContext,
        task_list: impl Into<String>,
        registry: Arc<WorkflowRegistry>,
        config: DeciderConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            service,
            context,
            task_list: task_list.into(),
            registry,
            config,
        })
    }

    pub fn task_list(&self) -> &str {
        &self.task_list
    }

    pub fn config(&self) -> &DeciderConfig {
        &self.config
    }

    /// Wrap the decider in an actor identified as `decider:{task_list}`
    pub fn into_actor(self) -> Actor<Self> {
        let mut identity = NamedIdentity::new(format!("decider:{}", self.task_list));
        if let Some(id) = &self.context.identity {
            identity = identity.with_override(id.clone());
        }
        let poll = self.config.poll;
        Actor::new(self, identity, poll)
    }

    fn replay_options(&self) -> ReplayOptions {
        ReplayOptions {
            max_parallel: self.config.max_parallel,
            max_decisions: self.config.max_decisions,
        }
    }

    /// Replay the task's workflow and send the resulting decisions.
    ///
    /// Returns `None` when the workflow type is not registered; the task is
    /// then left to time out on the service side.
    pub async fn decide(&self, task: DecisionTask) -> Option<ReplayOutcome> {
        let Some(workflow) = self.registry.get(&task.workflow_type) else {
            warn!(
                workflow_type = %task.workflow_type,
                task_list = %self.task_list,
                "Workflow type not registered, leaving the task to time out"
            );
            return None;
        };

        let DecisionTask {
            task_token,
            workflow_execution,
            history,
            ..
        } = task;
        let input = history.input_value();
        let outcome = replay(
            Arc::new(history),
            &workflow,
            input,
            workflow_execution,
            self.replay_options(),
        )
        .await;

        debug!(
            decisions = outcome.decisions.len(),
            status = ?outcome.status,
            "Replay finished"
        );

        let policy = self.config.respond_retry();
        let service = &self.service;
        let decisions = &outcome.decisions;
        let execution_context = outcome.execution_context.as_deref();
        let sent = complete_with_retry(&policy, "respond_decision_task_completed", || {
            service.respond_decision_task_completed(&task_token, decisions, execution_context)
        })
        .await;
        if sent.is_some() {
            info!(decisions = decisions.len(), "Decisions sent");
        }
        Some(outcome)
    }
}

#[async_trait]
impl Poller for Decider {
    type Task = DecisionTask;

    fn name(&self) -> &str {
        "decider"
    }

    async fn poll(&self, identity: &str) -> Result<DecisionTask> {
        Ok(fetch_decision_task(
            self.service.as_ref(),
            &self.context.domain,
            &self.task_list,
            identity,
        )
        .await?)
    }

    async fn process(&self, task: DecisionTask) {
        let span = decision_span(&task);
        self.decide(task).instrument(span).await;
    }
}

impl std::fmt::Debug for Decider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decider")
            .field("domain", &self.context.domain)
            .field("task_list", &self.task_list)
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{decision_page, HistoryBuilder, MockSwfService, ServiceCall};
    use crate::workflow::ActivitySpec;
    use flowlane_core::{Decision, WorkflowType};
    use serde_json::json;

    fn decider(service: Arc<MockSwfService>) -> Decider {
        let registry = WorkflowRegistry::new();
        registry
            .register_fn("add", "1.0", |ctx, input| async move {
                let sum = ctx.submit(&ActivitySpec::new("sum", "1.0"), input)?;
                Ok(sum.await?)
            })
            .unwrap();
        Decider::new(
            service,
            ServiceContext::new("test", "local"),
            "default",
            Arc::new(registry),
            DeciderConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_poll_replay_respond() {
        let service = Arc::new(MockSwfService::new());
        let events = HistoryBuilder::new()
            .workflow_started(json!([3, 4]))
            .decision_completed(None)
            .into_events();
        service.push_decision_page(Ok(decision_page(
            "tok",
            WorkflowType::new("add", "1.0"),
            events,
            None,
        )));
        let decider = decider(Arc::clone(&service));

        let task = decider.poll("me").await.unwrap();
        decider.process(task).await;

        match &service.responses()[..] {
            [ServiceCall::RespondDecisionCompleted {
                task_token,
                decisions,
                ..
            }] => {
                assert_eq!(task_token, "tok");
                assert_eq!(decisions.len(), 1);
                assert_eq!(decisions[0].activity_id(), Some("sum-0"));
            }
            other => panic!("Expected one decision response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unregistered_type_is_not_answered() {
        let service = Arc::new(MockSwfService::new());
        service.push_decision_page(Ok(decision_page(
            "tok",
            WorkflowType::new("unknown", "1.0"),
            HistoryBuilder::new().workflow_started(json!(null)).into_events(),
            None,
        )));
        let decider = decider(Arc::clone(&service));

        let task = decider.poll("me").await.unwrap();
        assert!(decider.decide(task).await.is_none());
        assert!(service.responses().is_empty());
    }

    #[tokio::test]
    async fn test_completes_with_activity_result() {
        let service = Arc::new(MockSwfService::new());
        let decider = decider(Arc::clone(&service));
        let history = HistoryBuilder::new()
            .workflow_started(json!([3, 4]))
            .activity_scheduled("sum-0", "sum", "1.0")
            .activity_completed("sum-0", json!(7))
            .build();
        let task = DecisionTask {
            task_token: "tok".into(),
            workflow_execution: flowlane_core::WorkflowExecution::new("wf-1", "run-1"),
            workflow_type: WorkflowType::new("add", "1.0"),
            started_event_id: 3,
            previous_started_event_id: 0,
            history,
        };

        let outcome = decider.decide(task).await.unwrap();
        assert_eq!(
            outcome.decisions,
            vec![Decision::CompleteWorkflowExecution {
                result: Some("7".into())
            }]
        );
    }
}
