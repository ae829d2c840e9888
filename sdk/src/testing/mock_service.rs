//! In-memory [`SwfService`] for tests.
//!
//! Poll and heartbeat responses are scripted up front; every call is
//! recorded so tests can assert on what the engine sent.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use flowlane_core::{
    ActivityTask, ActivityTypeRegistration, CoreError, CoreResult, Decision, DecisionTaskPage,
    DomainRegistration, ExecutionStatus, HeartbeatResponse, StartWorkflowRequest, SwfService,
    WorkflowExecution, WorkflowExecutionInfo, WorkflowType, WorkflowTypeRegistration,
};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Delay of a poll that finds nothing scripted
const EMPTY_POLL_DELAY: Duration = Duration::from_millis(10);

/// A call recorded by [`MockSwfService`]
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCall {
    PollDecision {
        task_list: String,
        identity: String,
        next_page_token: Option<String>,
    },
    PollActivity {
        task_list: String,
        identity: String,
    },
    RespondDecisionCompleted {
        task_token: String,
        decisions: Vec<Decision>,
        execution_context: Option<String>,
    },
    RespondActivityCompleted {
        task_token: String,
        result: Option<String>,
    },
    RespondActivityFailed {
        task_token: String,
        reason: String,
        details: String,
    },
    RespondActivityCanceled {
        task_token: String,
        details: Option<String>,
    },
    RecordHeartbeat {
        task_token: String,
        details: Option<String>,
    },
    StartWorkflow(StartWorkflowRequest),
    Signal {
        workflow_id: String,
        run_id: Option<String>,
        signal_name: String,
        input: Option<String>,
    },
    RequestCancel {
        workflow_id: String,
        run_id: Option<String>,
    },
    Terminate {
        workflow_id: String,
        run_id: Option<String>,
        reason: Option<String>,
        details: Option<String>,
    },
    Describe(WorkflowExecution),
    RegisterDomain(DomainRegistration),
    RegisterWorkflowType(WorkflowTypeRegistration),
    RegisterActivityType(ActivityTypeRegistration),
}

impl ServiceCall {
    /// Whether this call settles a task (decision or activity response)
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Self::RespondDecisionCompleted { .. }
                | Self::RespondActivityCompleted { .. }
                | Self::RespondActivityFailed { .. }
                | Self::RespondActivityCanceled { .. }
        )
    }
}

#[derive(Default)]
struct Script {
    decision_pages: VecDeque<CoreResult<DecisionTaskPage>>,
    activity_tasks: VecDeque<CoreResult<ActivityTask>>,
    heartbeats: VecDeque<CoreResult<HeartbeatResponse>>,
    respond_errors: VecDeque<CoreError>,
    client_errors: VecDeque<CoreError>,
}

/// Scripted, recording service
#[derive(Default)]
pub struct MockSwfService {
    script: Mutex<Script>,
    calls: Mutex<Vec<ServiceCall>>,
    notify: Notify,
}

impl MockSwfService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_decision_page(&self, page: CoreResult<DecisionTaskPage>) {
        self.script.lock().decision_pages.push_back(page);
    }

    pub fn push_activity_task(&self, task: CoreResult<ActivityTask>) {
        self.script.lock().activity_tasks.push_back(task);
    }

    /// Script the next heartbeat response. Unscripted heartbeats succeed.
    pub fn push_heartbeat(&self, response: CoreResult<HeartbeatResponse>) {
        self.script.lock().heartbeats.push_back(response);
    }

    /// Fail the next respond call with `error`
    pub fn push_respond_error(&self, error: CoreError) {
        self.script.lock().respond_errors.push_back(error);
    }

    /// Fail the next client-side call (start, signal, cancel...) with `error`
    pub fn push_client_error(&self, error: CoreError) {
        self.script.lock().client_errors.push_back(error);
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().clone()
    }

    /// Task responses only, in the order they were sent
    pub fn responses(&self) -> Vec<ServiceCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.is_response())
            .cloned()
            .collect()
    }

    pub fn heartbeat_count(&self) -> usize {
        self.count(|call| matches!(call, ServiceCall::RecordHeartbeat { .. }))
    }

    pub fn poll_count(&self) -> usize {
        self.count(|call| {
            matches!(
                call,
                ServiceCall::PollDecision { .. } | ServiceCall::PollActivity { .. }
            )
        })
    }

    pub fn count(&self, predicate: impl Fn(&ServiceCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    /// Wait until a recorded call matches `predicate`. Returns `false` on
    /// timeout.
    pub async fn wait_for_call(
        &self,
        predicate: impl Fn(&ServiceCall) -> bool,
        timeout: Duration,
    ) -> bool {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.calls.lock().iter().any(&predicate) {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    fn record(&self, call: ServiceCall) {
        self.calls.lock().push(call);
        self.notify.notify_waiters();
    }

    fn respond(&self, call: ServiceCall) -> CoreResult<()> {
        self.record(call);
        match self.script.lock().respond_errors.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn client(&self, call: ServiceCall) -> CoreResult<()> {
        self.record(call);
        match self.script.lock().client_errors.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for MockSwfService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSwfService")
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

#[async_trait]
impl SwfService for MockSwfService {
    async fn poll_for_decision_task(
        &self,
        _domain: &str,
        task_list: &str,
        identity: &str,
        next_page_token: Option<&str>,
    ) -> CoreResult<DecisionTaskPage> {
        self.record(ServiceCall::PollDecision {
            task_list: task_list.to_string(),
            identity: identity.to_string(),
            next_page_token: next_page_token.map(str::to_string),
        });
        let next = self.script.lock().decision_pages.pop_front();
        match next {
            Some(page) => page,
            None => {
                tokio::time::sleep(EMPTY_POLL_DELAY).await;
                Err(CoreError::PollTimeout)
            }
        }
    }

    async fn poll_for_activity_task(
        &self,
        _domain: &str,
        task_list: &str,
        identity: &str,
    ) -> CoreResult<ActivityTask> {
        self.record(ServiceCall::PollActivity {
            task_list: task_list.to_string(),
            identity: identity.to_string(),
        });
        let next = self.script.lock().activity_tasks.pop_front();
        match next {
            Some(task) => task,
            None => {
                tokio::time::sleep(EMPTY_POLL_DELAY).await;
                Err(CoreError::PollTimeout)
            }
        }
    }

    async fn respond_decision_task_completed(
        &self,
        task_token: &str,
        decisions: &[Decision],
        execution_context: Option<&str>,
    ) -> CoreResult<()> {
        self.respond(ServiceCall::RespondDecisionCompleted {
            task_token: task_token.to_string(),
            decisions: decisions.to_vec(),
            execution_context: execution_context.map(str::to_string),
        })
    }

    async fn respond_activity_task_completed(
        &self,
        task_token: &str,
        result: Option<&str>,
    ) -> CoreResult<()> {
        self.respond(ServiceCall::RespondActivityCompleted {
            task_token: task_token.to_string(),
            result: result.map(str::to_string),
        })
    }

    async fn respond_activity_task_failed(
        &self,
        task_token: &str,
        reason: &str,
        details: &str,
    ) -> CoreResult<()> {
        self.respond(ServiceCall::RespondActivityFailed {
            task_token: task_token.to_string(),
            reason: reason.to_string(),
            details: details.to_string(),
        })
    }

    async fn respond_activity_task_canceled(
        &self,
        task_token: &str,
        details: Option<&str>,
    ) -> CoreResult<()> {
        self.respond(ServiceCall::RespondActivityCanceled {
            task_token: task_token.to_string(),
            details: details.map(str::to_string),
        })
    }

    async fn record_activity_task_heartbeat(
        &self,
        task_token: &str,
        details: Option<&str>,
    ) -> CoreResult<HeartbeatResponse> {
        self.record(ServiceCall::RecordHeartbeat {
            task_token: task_token.to_string(),
            details: details.map(str::to_string),
        });
        let next = self.script.lock().heartbeats.pop_front();
        next.unwrap_or_else(|| Ok(HeartbeatResponse::default()))
    }

    async fn start_workflow_execution(
        &self,
        request: &StartWorkflowRequest,
    ) -> CoreResult<String> {
        self.client(ServiceCall::StartWorkflow(request.clone()))?;
        Ok(format!("run-{}", request.workflow_id))
    }

    async fn signal_workflow_execution(
        &self,
        _domain: &str,
        workflow_id: &str,
        run_id: Option<&str>,
        signal_name: &str,
        input: Option<&str>,
    ) -> CoreResult<()> {
        self.client(ServiceCall::Signal {
            workflow_id: workflow_id.to_string(),
            run_id: run_id.map(str::to_string),
            signal_name: signal_name.to_string(),
            input: input.map(str::to_string),
        })
    }

    async fn request_cancel_workflow_execution(
        &self,
        _domain: &str,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> CoreResult<()> {
        self.client(ServiceCall::RequestCancel {
            workflow_id: workflow_id.to_string(),
            run_id: run_id.map(str::to_string),
        })
    }

    async fn terminate_workflow_execution(
        &self,
        _domain: &str,
        workflow_id: &str,
        run_id: Option<&str>,
        reason: Option<&str>,
        details: Option<&str>,
    ) -> CoreResult<()> {
        self.client(ServiceCall::Terminate {
            workflow_id: workflow_id.to_string(),
            run_id: run_id.map(str::to_string),
            reason: reason.map(str::to_string),
            details: details.map(str::to_string),
        })
    }

    async fn describe_workflow_execution(
        &self,
        _domain: &str,
        execution: &WorkflowExecution,
    ) -> CoreResult<WorkflowExecutionInfo> {
        self.client(ServiceCall::Describe(execution.clone()))?;
        Ok(WorkflowExecutionInfo {
            execution: execution.clone(),
            workflow_type: WorkflowType::new("test", "1.0"),
            execution_status: ExecutionStatus::Open,
            close_status: None,
            start_timestamp: None,
            close_timestamp: None,
            task_list: Some("default".to_string()),
            cancel_requested: false,
            latest_execution_context: None,
        })
    }

    async fn register_domain(&self, request: &DomainRegistration) -> CoreResult<()> {
        self.client(ServiceCall::RegisterDomain(request.clone()))
    }

    async fn register_workflow_type(&self, request: &WorkflowTypeRegistration) -> CoreResult<()> {
        self.client(ServiceCall::RegisterWorkflowType(request.clone()))
    }

    async fn register_activity_type(&self, request: &ActivityTypeRegistration) -> CoreResult<()> {
        self.client(ServiceCall::RegisterActivityType(request.clone()))
    }
}
