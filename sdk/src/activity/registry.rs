//! ActivityRegistry - Registry for activity handlers

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use flowlane_core::ActivityType;
use parking_lot::RwLock;
use serde_json::Value;

use super::command::{run_command, CommandSpec};
use super::context::ActivityContext;
use super::definition::ActivityDefinition;
use super::error::ActivityResult;
use super::input::ActivityInput;
use crate::error::{FlowError, Result};

/// Type alias for boxed activity execution functions
pub type BoxedActivityFn = Box<
    dyn Fn(
            Arc<ActivityContext>,
            ActivityInput,
        ) -> Pin<Box<dyn Future<Output = ActivityResult<Value>> + Send>>
        + Send
        + Sync,
>;

/// A registered activity with its type and handler
pub struct RegisteredActivity {
    activity_type: ActivityType,
    heartbeat_timeout: Option<Duration>,
    description: Option<String>,
    external: bool,
    execute_fn: BoxedActivityFn,
}

impl RegisteredActivity {
    pub fn new(activity_type: ActivityType, execute_fn: BoxedActivityFn) -> Self {
        Self {
            activity_type,
            heartbeat_timeout: None,
            description: None,
            external: false,
            execute_fn,
        }
    }

    pub fn from_fn<F, Fut>(name: &str, version: &str, f: F) -> Self
    where
        F: Fn(Arc<ActivityContext>, ActivityInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActivityResult<Value>> + Send + 'static,
    {
        let execute_fn: BoxedActivityFn = Box::new(move |ctx, input| Box::pin(f(ctx, input)));
        Self::new(ActivityType::new(name, version), execute_fn)
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    pub fn activity_type(&self) -> &ActivityType {
        &self.activity_type
    }

    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        self.heartbeat_timeout
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Whether the handler starts its own OS process, so the worker runs it
    /// directly instead of in a task process
    pub fn is_external(&self) -> bool {
        self.external
    }

    /// Build the future running the handler
    pub fn execute(
        &self,
        ctx: Arc<ActivityContext>,
        input: ActivityInput,
    ) -> Pin<Box<dyn Future<Output = ActivityResult<Value>> + Send>> {
        (self.execute_fn)(ctx, input)
    }
}

impl std::fmt::Debug for RegisteredActivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredActivity")
            .field("activity_type", &self.activity_type)
            .field("heartbeat_timeout", &self.heartbeat_timeout)
            .field("external", &self.external)
            .field("execute_fn", &"<function>")
            .finish()
    }
}

/// Registry of activity handlers, keyed by name and version
#[derive(Default)]
pub struct ActivityRegistry {
    activities: RwLock<HashMap<ActivityType, Arc<RegisteredActivity>>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_raw(&self, activity: RegisteredActivity) -> Result<()> {
        let activity_type = activity.activity_type.clone();
        let mut activities = self.activities.write();

        if activities.contains_key(&activity_type) {
            return Err(FlowError::InvalidConfiguration(format!(
                "Activity '{}' is already registered",
                activity_type
            )));
        }

        activities.insert(activity_type, Arc::new(activity));
        Ok(())
    }

    /// Register an activity definition
    pub fn register<A>(&self, activity: A) -> Result<()>
    where
        A: ActivityDefinition + 'static,
    {
        let activity_type = ActivityType::new(activity.name(), activity.version());
        let heartbeat_timeout = activity.heartbeat_timeout();
        let description = activity.description().map(str::to_string);
        let activity = Arc::new(activity);

        let execute_fn: BoxedActivityFn = Box::new(move |ctx, input| {
            let activity = Arc::clone(&activity);
            Box::pin(async move {
                let output = activity.execute(&ctx, input).await?;
                Ok(serde_json::to_value(output)?)
            })
        });

        let mut registered = RegisteredActivity::new(activity_type, execute_fn);
        registered.heartbeat_timeout = heartbeat_timeout;
        registered.description = description;
        self.register_raw(registered)
    }

    /// Register a closure as an activity
    pub fn register_fn<F, Fut>(&self, name: &str, version: &str, f: F) -> Result<()>
    where
        F: Fn(Arc<ActivityContext>, ActivityInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActivityResult<Value>> + Send + 'static,
    {
        self.register_raw(RegisteredActivity::from_fn(name, version, f))
    }

    /// Register an external command as an activity
    pub fn register_command(&self, name: &str, version: &str, spec: CommandSpec) -> Result<()> {
        let spec = Arc::new(spec);
        let mut activity = RegisteredActivity::from_fn(name, version, move |ctx, input| {
            let spec = Arc::clone(&spec);
            async move { run_command(&spec, &ctx, &input).await }
        });
        activity.external = true;
        self.register_raw(activity)
    }

    pub fn get(&self, activity_type: &ActivityType) -> Option<Arc<RegisteredActivity>> {
        self.activities.read().get(activity_type).cloned()
    }

    /// Look up the handler for a task, failing when the type is unknown
    pub fn dispatch(&self, activity_type: &ActivityType) -> Result<Arc<RegisteredActivity>> {
        self.get(activity_type)
            .ok_or_else(|| FlowError::ActivityNotFound(activity_type.to_string()))
    }

    pub fn has(&self, activity_type: &ActivityType) -> bool {
        self.activities.read().contains_key(activity_type)
    }

    pub fn activity_types(&self) -> Vec<ActivityType> {
        self.activities.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.activities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.read().is_empty()
    }

    /// Check that `interval` is strictly below every declared heartbeat timeout
    pub fn validate_heartbeat(&self, interval: Duration) -> Result<()> {
        for activity in self.activities.read().values() {
            if let Some(timeout) = activity.heartbeat_timeout {
                if interval >= timeout {
                    return Err(FlowError::InvalidConfiguration(format!(
                        "heartbeat interval {:?} must be below the heartbeat timeout {:?} of '{}'",
                        interval, timeout, activity.activity_type
                    )));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityRegistry")
            .field("activity_types", &self.activity_types())
            .finish()
    }
}
