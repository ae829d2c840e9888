//! ActivityWorker - polls for activity tasks and runs them in slots
//!
//! Each accepted task runs in its own slot: a supervised tokio task that
//! resolves the handler, runs it beside a heartbeat loop and sends exactly
//! one response (completed, failed or canceled) through the retry utility.
//! Unless the worker is configured for in-process isolation, the handler
//! itself runs in a task process the slot can kill.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowlane_core::{ActivityTask, NamedIdentity, SwfService};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::actor::{complete_with_retry, Actor, Poller};
use super::heartbeat::Heartbeat;
use super::supervisor::{PidSet, ProcessSupervisor};
use crate::activity::error::encode_result;
use crate::activity::{
    run_in_process, ActivityContext, ActivityError, ActivityInput, ActivityRegistry,
    ActivityResult, RegisteredActivity,
};
use crate::config::{Isolation, ServiceContext, WorkerConfig};
use crate::error::{FlowError, Result};
use crate::telemetry::activity_span;

/// How a slot ended, i.e. which response it owes the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    Completed(Option<String>),
    Failed { reason: String, details: String },
    Canceled(Option<String>),
}

impl SlotOutcome {
    fn failed(error: &ActivityError) -> Self {
        Self::Failed {
            reason: error.reason(),
            details: error.details_string(),
        }
    }
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Polls one task list and executes activity tasks
pub struct ActivityWorker {
    service: Arc<dyn SwfService>,
    context: ServiceContext,
    task_list: String,
    registry: Arc<ActivityRegistry>,
    config: WorkerConfig,
    supervisor: Arc<ProcessSupervisor>,
    program: Option<Arc<PathBuf>>,
}

impl ActivityWorker {
    /// Create a worker. Fails if the configuration is invalid, the heartbeat
    /// interval is not below a registered heartbeat timeout, or the task
    /// process executable cannot be located.
    pub fn new(
        service: Arc<dyn SwfService>,
        context: ServiceContext,
        task_list: impl Into<String>,
        registry: Arc<ActivityRegistry>,
        config: WorkerConfig,
    ) -> Result<Self> {
        config.validate()?;
        registry.validate_heartbeat(config.heartbeat_interval)?;
        let program = match &config.isolation {
            Isolation::Process => {
                let exe = std::env::current_exe().map_err(|e| {
                    FlowError::InvalidConfiguration(format!(
                        "cannot locate the worker executable: {}",
                        e
                    ))
                })?;
                Some(Arc::new(exe))
            }
            Isolation::Program(path) => Some(Arc::new(path.clone())),
            Isolation::InProcess => None,
        };
        Ok(Self {
            service,
            context,
            task_list: task_list.into(),
            registry,
            supervisor: Arc::new(ProcessSupervisor::new(config.nb_processes)),
            config,
            program,
        })
    }

    pub fn task_list(&self) -> &str {
        &self.task_list
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    /// Wrap the worker in an actor identified as `worker:{task_list}`
    pub fn into_actor(self) -> Actor<Self> {
        let mut identity = NamedIdentity::new(format!("worker:{}", self.task_list));
        if let Some(id) = &self.context.identity {
            identity = identity.with_override(id.clone());
        }
        let poll = self.config.poll;
        Actor::new(self, identity, poll)
    }

    /// Start a slot for `task`. Returns `false` when every slot is busy.
    pub fn execute(&self, task: ActivityTask) -> bool {
        let cancel = CancellationToken::new();
        let slot = Slot {
            service: Arc::clone(&self.service),
            registry: Arc::clone(&self.registry),
            task: Arc::new(task),
            cancel: cancel.clone(),
            terminate: self.supervisor.terminate_token(),
            pids: self.supervisor.pids().clone(),
            program: self.program.clone(),
            config: self.config.clone(),
        };
        let span = activity_span(&slot.task);
        let activity_id = slot.task.activity_id.clone();
        let accepted = self
            .supervisor
            .try_spawn(cancel, async move { slot.run().await }.instrument(span))
            .is_some();
        if !accepted {
            warn!(
                activity_id = %activity_id,
                task_list = %self.task_list,
                "No free slot, task not accepted"
            );
        }
        accepted
    }
}

#[async_trait]
impl Poller for ActivityWorker {
    type Task = ActivityTask;

    fn name(&self) -> &str {
        "activity-worker"
    }

    async fn ready(&self) {
        self.supervisor.ready().await
    }

    async fn poll(&self, identity: &str) -> Result<ActivityTask> {
        Ok(self
            .service
            .poll_for_activity_task(&self.context.domain, &self.task_list, identity)
            .await?)
    }

    async fn process(&self, task: ActivityTask) {
        debug!(
            activity_id = %task.activity_id,
            activity_type = %task.activity_type,
            "Received activity task"
        );
        self.execute(task);
    }

    async fn shutdown(&self, graceful: bool, join_timeout: Duration) {
        self.supervisor
            .shutdown(graceful, join_timeout, self.config.cancel_grace)
            .await;
    }
}

impl std::fmt::Debug for ActivityWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityWorker")
            .field("domain", &self.context.domain)
            .field("task_list", &self.task_list)
            .field("program", &self.program)
            .field("supervisor", &self.supervisor)
            .finish()
    }
}

struct Slot {
    service: Arc<dyn SwfService>,
    registry: Arc<ActivityRegistry>,
    task: Arc<ActivityTask>,
    cancel: CancellationToken,
    terminate: CancellationToken,
    pids: PidSet,
    program: Option<Arc<PathBuf>>,
    config: WorkerConfig,
}

impl Slot {
    async fn run(self) {
        let outcome = self.execute().await;
        self.report(outcome).await;
    }

    async fn execute(&self) -> SlotOutcome {
        let activity = match self.registry.dispatch(&self.task.activity_type) {
            Ok(activity) => activity,
            Err(e) => return SlotOutcome::failed(&ActivityError::from(e)),
        };
        let input = match ActivityInput::from_payload(self.task.input.as_deref()) {
            Ok(input) => input,
            Err(e) => return SlotOutcome::failed(&ActivityError::from(e)),
        };

        let details = Arc::new(Mutex::new(None));
        let cancel_requested = Arc::new(AtomicBool::new(false));
        let heartbeat_stop = CancellationToken::new();
        let heartbeat = Heartbeat::new(
            Arc::clone(&self.service),
            self.task.task_token.clone(),
            self.config.heartbeat_interval,
            self.config.heartbeat_retry(),
            Arc::clone(&details),
            self.cancel.clone(),
            Arc::clone(&cancel_requested),
        );
        let _heartbeat = AbortOnDrop(tokio::spawn(
            heartbeat
                .run(heartbeat_stop.clone())
                .instrument(tracing::Span::current()),
        ));

        let ctx = Arc::new(ActivityContext::with_parts(
            Arc::clone(&self.task),
            self.cancel.clone(),
            Arc::clone(&details),
            self.pids.clone(),
        ));
        // Commands already run in their own process.
        let finished = match &self.program {
            Some(program) if !activity.is_external() => {
                run_in_process(
                    program,
                    &self.task,
                    &ctx,
                    &self.terminate,
                    self.config.cancel_grace,
                )
                .await
            }
            _ => self.run_inline(activity, ctx, input).await,
        };
        heartbeat_stop.cancel();

        if cancel_requested.load(Ordering::SeqCst) {
            info!("Activity canceled at the service's request");
            return SlotOutcome::Canceled(details.lock().clone());
        }
        match finished {
            Some(Ok(value)) => match encode_result(&value) {
                Ok(payload) => SlotOutcome::Completed(Some(payload)),
                Err(error) => SlotOutcome::failed(&error),
            },
            Some(Err(error)) => SlotOutcome::failed(&error),
            None => SlotOutcome::failed(&ActivityError::new(
                "WorkerShutdown",
                "activity interrupted by worker shutdown",
            )),
        }
    }

    /// Run the handler on a task of this process. Returns `None` when it had
    /// to be aborted.
    async fn run_inline(
        &self,
        activity: Arc<RegisteredActivity>,
        ctx: Arc<ActivityContext>,
        input: ActivityInput,
    ) -> Option<ActivityResult<Value>> {
        let mut handler = AbortOnDrop(tokio::spawn(
            activity.execute(ctx, input).instrument(tracing::Span::current()),
        ));

        tokio::select! {
            joined = &mut handler.0 => return Some(joined.unwrap_or_else(|e| Err(e.into()))),
            _ = self.cancel.cancelled() => {}
            _ = self.terminate.cancelled() => {}
        }
        // Cancelled handlers get a grace period to stop on their own.
        if !self.terminate.is_cancelled() {
            tokio::select! {
                joined = &mut handler.0 => return Some(joined.unwrap_or_else(|e| Err(e.into()))),
                _ = tokio::time::sleep(self.config.cancel_grace) => {}
                _ = self.terminate.cancelled() => {}
            }
        }

        warn!("Aborting activity handler");
        handler.0.abort();
        // The slot keeps its permit until the handler has really stopped.
        let _ = (&mut handler.0).await;
        None
    }

    async fn report(&self, outcome: SlotOutcome) {
        let policy = self.config.respond_retry();
        let service = &self.service;
        let token = self.task.task_token.as_str();

        let sent = match &outcome {
            SlotOutcome::Completed(result) => {
                let result = result.as_deref();
                complete_with_retry(&policy, "respond_activity_task_completed", || {
                    service.respond_activity_task_completed(token, result)
                })
                .await
            }
            SlotOutcome::Failed { reason, details } => {
                warn!(reason = %reason, "Activity failed");
                complete_with_retry(&policy, "respond_activity_task_failed", || {
                    service.respond_activity_task_failed(token, reason, details)
                })
                .await
            }
            SlotOutcome::Canceled(details) => {
                let details = details.as_deref();
                complete_with_retry(&policy, "respond_activity_task_canceled", || {
                    service.respond_activity_task_canceled(token, details)
                })
                .await
            }
        };

        if sent.is_some() {
            debug!(outcome = ?outcome, "Activity response sent");
        }
    }
}
