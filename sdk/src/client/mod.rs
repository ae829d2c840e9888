//! Client - starts and steers workflow executions
//!
//! A thin facade over [`SwfService`] for the caller side: every call goes
//! through the retry utility and service faults come back as
//! [`FlowError`](crate::FlowError).

use std::sync::Arc;
use std::time::Duration;

use flowlane_core::{
    encode_payload, with_delay, ActivityTypeRegistration, DomainRegistration, RetryPolicy,
    StartWorkflowRequest, SwfService, WorkflowExecution, WorkflowExecutionInfo, WorkflowType,
    WorkflowTypeRegistration,
};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::activity::ActivityRegistry;
use crate::config::ServiceContext;
use crate::error::Result;
use crate::worker::WorkflowRegistry;

/// Result of starting a workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartWorkflowResult {
    pub execution: WorkflowExecution,
}

/// Options for starting a workflow
#[derive(Debug, Clone, Default)]
pub struct StartWorkflowOptions {
    /// Workflow id; a random one is generated when unset
    pub workflow_id: Option<String>,
    /// Task list overriding the type's default
    pub task_list: Option<String>,
    pub tags: Vec<String>,
    pub execution_timeout: Option<Duration>,
    pub task_timeout: Option<Duration>,
}

impl StartWorkflowOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_task_list(mut self, task_list: impl Into<String>) -> Self {
        self.task_list = Some(task_list.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }
}

/// Caller-side access to the task exchange service
#[derive(Clone)]
pub struct Client {
    service: Arc<dyn SwfService>,
    context: ServiceContext,
    retry: RetryPolicy,
}

impl Client {
    pub fn new(service: Arc<dyn SwfService>, context: ServiceContext) -> Self {
        Self {
            service,
            context,
            retry: RetryPolicy::respond(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn domain(&self) -> &str {
        &self.context.domain
    }

    /// Start a workflow with default options
    pub async fn start_workflow(
        &self,
        workflow_type: WorkflowType,
        input: Value,
    ) -> Result<StartWorkflowResult> {
        self.start_workflow_with_options(workflow_type, input, StartWorkflowOptions::new())
            .await
    }

    pub async fn start_workflow_with_options(
        &self,
        workflow_type: WorkflowType,
        input: Value,
        options: StartWorkflowOptions,
    ) -> Result<StartWorkflowResult> {
        let workflow_id = options
            .workflow_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut request =
            StartWorkflowRequest::new(&self.context.domain, &workflow_id, workflow_type)
                .with_tags(options.tags);
        if !input.is_null() {
            request = request.with_input(encode_payload(&input)?);
        }
        if let Some(task_list) = options.task_list {
            request = request.with_task_list(task_list);
        }
        if let Some(timeout) = options.execution_timeout {
            request = request.with_execution_timeout(timeout);
        }
        if let Some(timeout) = options.task_timeout {
            request = request.with_task_timeout(timeout);
        }

        let service = &self.service;
        let request = &request;
        let run_id = with_delay(&self.retry, || service.start_workflow_execution(request)).await?;
        info!(
            workflow_id = %workflow_id,
            run_id = %run_id,
            workflow_type = %request.workflow_type,
            "Workflow started"
        );
        Ok(StartWorkflowResult {
            execution: WorkflowExecution::new(workflow_id, run_id),
        })
    }

    /// Send a signal to the latest run (or `run_id`) of a workflow
    pub async fn signal_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
        signal_name: &str,
        input: Value,
    ) -> Result<()> {
        let input = if input.is_null() {
            None
        } else {
            Some(encode_payload(&input)?)
        };
        let service = &self.service;
        let domain = self.context.domain.as_str();
        let input = input.as_deref();
        with_delay(&self.retry, || {
            service.signal_workflow_execution(domain, workflow_id, run_id, signal_name, input)
        })
        .await?;
        debug!(workflow_id, signal_name, "Signal sent");
        Ok(())
    }

    /// Ask a workflow to cancel itself
    pub async fn request_cancel(&self, workflow_id: &str, run_id: Option<&str>) -> Result<()> {
        let service = &self.service;
        let domain = self.context.domain.as_str();
        with_delay(&self.retry, || {
            service.request_cancel_workflow_execution(domain, workflow_id, run_id)
        })
        .await?;
        info!(workflow_id, "Cancellation requested");
        Ok(())
    }

    pub async fn terminate(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
        reason: Option<&str>,
        details: Option<&str>,
    ) -> Result<()> {
        let service = &self.service;
        let domain = self.context.domain.as_str();
        with_delay(&self.retry, || {
            service.terminate_workflow_execution(domain, workflow_id, run_id, reason, details)
        })
        .await?;
        info!(workflow_id, "Workflow terminated");
        Ok(())
    }

    pub async fn describe(&self, execution: &WorkflowExecution) -> Result<WorkflowExecutionInfo> {
        let service = &self.service;
        let domain = self.context.domain.as_str();
        Ok(with_delay(&self.retry, || {
            service.describe_workflow_execution(domain, execution)
        })
        .await?)
    }

    pub async fn register_domain(&self, description: Option<&str>, retention_days: u32) -> Result<()> {
        let request = DomainRegistration {
            name: self.context.domain.clone(),
            description: description.map(str::to_string),
            retention_period_days: retention_days,
        };
        let service = &self.service;
        let request = &request;
        Ok(with_delay(&self.retry, || service.register_domain(request)).await?)
    }

    /// Register every workflow type of `registry`, defaulting to `task_list`
    pub async fn register_workflow_types(
        &self,
        registry: &WorkflowRegistry,
        task_list: &str,
    ) -> Result<()> {
        let service = &self.service;
        for workflow_type in registry.workflow_types() {
            let default = registry
                .get(&workflow_type)
                .and_then(|w| w.task_list().map(str::to_string));
            let request = WorkflowTypeRegistration {
                domain: self.context.domain.clone(),
                workflow_type,
                default_task_list: Some(default.unwrap_or_else(|| task_list.to_string())),
                default_execution_start_to_close_timeout: None,
                default_task_start_to_close_timeout: None,
                default_child_policy: Default::default(),
            };
            let request = &request;
            with_delay(&self.retry, || service.register_workflow_type(request)).await?;
            debug!(workflow_type = %request.workflow_type, "Workflow type registered");
        }
        Ok(())
    }

    /// Register every activity type of `registry`, defaulting to `task_list`
    pub async fn register_activity_types(
        &self,
        registry: &ActivityRegistry,
        task_list: &str,
    ) -> Result<()> {
        let service = &self.service;
        for activity_type in registry.activity_types() {
            let heartbeat_timeout = registry
                .get(&activity_type)
                .and_then(|a| a.heartbeat_timeout());
            let request = ActivityTypeRegistration {
                domain: self.context.domain.clone(),
                activity_type,
                default_task_list: Some(task_list.to_string()),
                default_task_heartbeat_timeout: heartbeat_timeout,
                default_task_schedule_to_start_timeout: None,
                default_task_start_to_close_timeout: None,
                default_task_schedule_to_close_timeout: None,
            };
            let request = &request;
            with_delay(&self.retry, || service.register_activity_type(request)).await?;
            debug!(activity_type = %request.activity_type, "Activity type registered");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("domain", &self.context.domain)
            .field("retry", &self.retry)
            .finish()
    }
}
