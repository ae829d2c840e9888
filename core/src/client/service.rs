//! The task exchange service seam
//!
//! Transports implement [`SwfService`] and translate service faults with
//! [`CoreError::from_fault`](crate::CoreError::from_fault). A long-poll that
//! returns without a task must surface as [`CoreError::PollTimeout`].

use async_trait::async_trait;
use tracing::debug;

use super::types::{
    ActivityTask, ActivityTypeRegistration, DecisionTask, DecisionTaskPage, DomainRegistration,
    HeartbeatResponse, StartWorkflowRequest, WorkflowExecution, WorkflowExecutionInfo,
    WorkflowTypeRegistration,
};
use crate::error::{CoreError, CoreResult};
use crate::workflow::{Decision, History};

/// Operations consumed from the remote task exchange service
#[async_trait]
pub trait SwfService: Send + Sync {
    /// Long-poll for one page of a decision task
    async fn poll_for_decision_task(
        &self,
        domain: &str,
        task_list: &str,
        identity: &str,
        next_page_token: Option<&str>,
    ) -> CoreResult<DecisionTaskPage>;

    /// Long-poll for an activity task
    async fn poll_for_activity_task(
        &self,
        domain: &str,
        task_list: &str,
        identity: &str,
    ) -> CoreResult<ActivityTask>;

    async fn respond_decision_task_completed(
        &self,
        task_token: &str,
        decisions: &[Decision],
        execution_context: Option<&str>,
    ) -> CoreResult<()>;

    async fn respond_activity_task_completed(
        &self,
        task_token: &str,
        result: Option<&str>,
    ) -> CoreResult<()>;

    async fn respond_activity_task_failed(
        &self,
        task_token: &str,
        reason: &str,
        details: &str,
    ) -> CoreResult<()>;

    async fn respond_activity_task_canceled(
        &self,
        task_token: &str,
        details: Option<&str>,
    ) -> CoreResult<()>;

    async fn record_activity_task_heartbeat(
        &self,
        task_token: &str,
        details: Option<&str>,
    ) -> CoreResult<HeartbeatResponse>;

    /// Start a workflow execution, returning its run id
    async fn start_workflow_execution(&self, request: &StartWorkflowRequest)
        -> CoreResult<String>;

    async fn signal_workflow_execution(
        &self,
        domain: &str,
        workflow_id: &str,
        run_id: Option<&str>,
        signal_name: &str,
        input: Option<&str>,
    ) -> CoreResult<()>;

    async fn request_cancel_workflow_execution(
        &self,
        domain: &str,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> CoreResult<()>;

    async fn terminate_workflow_execution(
        &self,
        domain: &str,
        workflow_id: &str,
        run_id: Option<&str>,
        reason: Option<&str>,
        details: Option<&str>,
    ) -> CoreResult<()>;

    async fn describe_workflow_execution(
        &self,
        domain: &str,
        execution: &WorkflowExecution,
    ) -> CoreResult<WorkflowExecutionInfo>;

    async fn register_domain(&self, request: &DomainRegistration) -> CoreResult<()>;

    async fn register_workflow_type(&self, request: &WorkflowTypeRegistration) -> CoreResult<()>;

    async fn register_activity_type(&self, request: &ActivityTypeRegistration) -> CoreResult<()>;
}

/// Poll for a decision task and follow `nextPageToken` until the whole
/// history has been fetched.
///
/// Pages are concatenated in arrival order before a single [`History`] is
/// built. A page that belongs to a different task token aborts the fetch.
pub async fn fetch_decision_task(
    service: &dyn SwfService,
    domain: &str,
    task_list: &str,
    identity: &str,
) -> CoreResult<DecisionTask> {
    let first = service
        .poll_for_decision_task(domain, task_list, identity, None)
        .await?;

    let DecisionTaskPage {
        task_token,
        workflow_execution,
        workflow_type,
        mut events,
        started_event_id,
        previous_started_event_id,
        next_page_token,
    } = first;

    let mut token = next_page_token;
    let mut pages = 1usize;
    while let Some(page_token) = token.take() {
        let page = service
            .poll_for_decision_task(domain, task_list, identity, Some(&page_token))
            .await?;
        if page.task_token != task_token {
            return Err(CoreError::Other(format!(
                "history page belongs to a different decision task (expected {}, got {})",
                task_token, page.task_token
            )));
        }
        events.extend(page.events);
        token = page.next_page_token;
        pages += 1;
    }

    debug!(
        workflow_id = %workflow_execution.workflow_id,
        run_id = %workflow_execution.run_id,
        pages,
        events = events.len(),
        "Fetched decision task history"
    );

    Ok(DecisionTask {
        task_token,
        workflow_execution,
        workflow_type,
        started_event_id,
        previous_started_event_id,
        history: History::from_events(events),
    })
}
