//! WorkflowRegistry - Registry for workflow definitions

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use flowlane_core::WorkflowType;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{FlowError, Result};
use crate::workflow::context::WorkflowContext;
use crate::workflow::definition::WorkflowDefinition;

/// Type alias for boxed workflow execution functions
pub type BoxedWorkflowFn = Box<
    dyn Fn(Arc<WorkflowContext>, Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        + Send
        + Sync,
>;

/// A registered workflow with its type and execution function
pub struct RegisteredWorkflow {
    workflow_type: WorkflowType,
    task_list: Option<String>,
    description: Option<String>,
    execute_fn: BoxedWorkflowFn,
}

impl RegisteredWorkflow {
    pub fn new(workflow_type: WorkflowType, execute_fn: BoxedWorkflowFn) -> Self {
        Self {
            workflow_type,
            task_list: None,
            description: None,
            execute_fn,
        }
    }

    /// Wrap a closure taking the context and raw JSON input
    pub fn from_fn<F, Fut>(name: &str, version: &str, f: F) -> Self
    where
        F: Fn(Arc<WorkflowContext>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let execute_fn: BoxedWorkflowFn = Box::new(move |ctx, input| Box::pin(f(ctx, input)));
        Self::new(WorkflowType::new(name, version), execute_fn)
    }

    pub fn with_task_list(mut self, task_list: impl Into<String>) -> Self {
        self.task_list = Some(task_list.into());
        self
    }

    pub fn workflow_type(&self) -> &WorkflowType {
        &self.workflow_type
    }

    pub fn task_list(&self) -> Option<&str> {
        self.task_list.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Build the future running the workflow body
    pub fn execute(
        &self,
        ctx: Arc<WorkflowContext>,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> {
        (self.execute_fn)(ctx, input)
    }
}

impl std::fmt::Debug for RegisteredWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredWorkflow")
            .field("workflow_type", &self.workflow_type)
            .field("task_list", &self.task_list)
            .field("execute_fn", &"<function>")
            .finish()
    }
}

/// Registry of workflow types a decider can replay, keyed by name and version
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<WorkflowType, Arc<RegisteredWorkflow>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prepared workflow
    pub fn register_raw(&self, workflow: RegisteredWorkflow) -> Result<()> {
        let workflow_type = workflow.workflow_type.clone();
        let mut workflows = self.workflows.write();

        if workflows.contains_key(&workflow_type) {
            return Err(FlowError::InvalidConfiguration(format!(
                "Workflow '{}' is already registered",
                workflow_type
            )));
        }

        workflows.insert(workflow_type, Arc::new(workflow));
        Ok(())
    }

    /// Register a workflow definition
    ///
    /// ```ignore
    /// registry.register(OrderWorkflow)?;
    /// ```
    pub fn register<W>(&self, workflow: W) -> Result<()>
    where
        W: WorkflowDefinition + 'static,
    {
        let workflow_type = WorkflowType::new(workflow.name(), workflow.version());
        let task_list = workflow.task_list().map(str::to_string);
        let description = workflow.description().map(str::to_string);
        let workflow = Arc::new(workflow);

        let execute_fn: BoxedWorkflowFn = Box::new(move |ctx, input| {
            let workflow = Arc::clone(&workflow);
            Box::pin(async move {
                let typed_input: W::Input = serde_json::from_value(input)
                    .map_err(|e| FlowError::InvalidInput(e.to_string()))?;
                let output = workflow.execute(&ctx, typed_input).await?;
                Ok(serde_json::to_value(output)?)
            })
        });

        let mut registered = RegisteredWorkflow::new(workflow_type, execute_fn);
        registered.task_list = task_list;
        registered.description = description;
        self.register_raw(registered)
    }

    /// Register a closure as a workflow
    pub fn register_fn<F, Fut>(&self, name: &str, version: &str, f: F) -> Result<()>
    where
        F: Fn(Arc<WorkflowContext>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register_raw(RegisteredWorkflow::from_fn(name, version, f))
    }

    pub fn get(&self, workflow_type: &WorkflowType) -> Option<Arc<RegisteredWorkflow>> {
        self.workflows.read().get(workflow_type).cloned()
    }

    /// Look up a workflow, failing when the type is unknown
    pub fn dispatch(&self, workflow_type: &WorkflowType) -> Result<Arc<RegisteredWorkflow>> {
        self.get(workflow_type)
            .ok_or_else(|| FlowError::WorkflowNotFound(workflow_type.to_string()))
    }

    pub fn has(&self, workflow_type: &WorkflowType) -> bool {
        self.workflows.read().contains_key(workflow_type)
    }

    pub fn workflow_types(&self) -> Vec<WorkflowType> {
        self.workflows.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.workflows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.read().is_empty()
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflow_types", &self.workflow_types())
            .finish()
    }
}
