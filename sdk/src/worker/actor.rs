//! Poll loop shared by deciders and activity workers

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowlane_core::{with_delay, NamedIdentity, RetryPolicy, Retryable};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PollConfig;
use crate::error::{FlowError, Result};

/// One kind of work an [`Actor`] polls for
#[async_trait]
pub trait Poller: Send + Sync + 'static {
    type Task: Send + 'static;

    /// Short name used in logs
    fn name(&self) -> &str;

    /// Resolves when the poller can accept another task
    async fn ready(&self) {}

    /// Long-poll for one task. `FlowError::PollTimeout` means no task.
    async fn poll(&self, identity: &str) -> Result<Self::Task>;

    async fn process(&self, task: Self::Task);

    /// Stop in-flight work, forcing it after `join_timeout`
    async fn shutdown(&self, _graceful: bool, _join_timeout: Duration) {}
}

/// Drives a [`Poller`] until stopped
pub struct Actor<P: Poller> {
    poller: Arc<P>,
    identity: NamedIdentity,
    poll: PollConfig,
    running: Arc<AtomicBool>,
    stop: CancellationToken,
}

impl<P: Poller> Actor<P> {
    pub fn new(poller: P, identity: NamedIdentity, poll: PollConfig) -> Self {
        Self {
            poller: Arc::new(poller),
            identity,
            poll,
            running: Arc::new(AtomicBool::new(false)),
            stop: CancellationToken::new(),
        }
    }

    pub fn poller(&self) -> &Arc<P> {
        &self.poller
    }

    pub fn identity(&self) -> &NamedIdentity {
        &self.identity
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Handle used to stop the actor from another task
    pub fn handle(&self) -> ActorHandle<P> {
        ActorHandle {
            poller: Arc::clone(&self.poller),
            running: Arc::clone(&self.running),
            stop: self.stop.clone(),
        }
    }

    /// Poll and process until stopped
    pub async fn run(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(actor = %self.poller.name(), "Actor already running");
            return;
        }
        let identity = self.identity.identity();
        info!(actor = %self.poller.name(), identity = %identity, "Starting actor");

        while self.running.load(Ordering::SeqCst) && !self.stop.is_cancelled() {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = self.poller.ready() => {}
            }

            let polled = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                polled = self.poller.poll(&identity) => polled,
            };

            match polled {
                Ok(task) => self.poller.process(task).await,
                Err(FlowError::PollTimeout) => {
                    debug!(actor = %self.poller.name(), "Poll returned without a task");
                }
                Err(e) => {
                    let backoff = if e.is_rate_limited() {
                        self.poll.rate_limit_backoff
                    } else {
                        self.poll.error_backoff
                    };
                    warn!(
                        actor = %self.poller.name(),
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Poll failed"
                    );
                    tokio::select! {
                        _ = self.stop.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!(actor = %self.poller.name(), "Actor stopped");
    }

    /// Run until SIGINT or SIGTERM, then stop
    pub async fn run_until_signal(&self, graceful: bool, join_timeout: Duration) {
        let run = self.run();
        tokio::pin!(run);
        tokio::select! {
            _ = &mut run => return,
            _ = shutdown_signal() => {}
        }
        let handle = self.handle();
        tokio::join!(handle.stop(graceful, join_timeout), run);
    }
}

impl<P: Poller> fmt::Debug for Actor<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("poller", &self.poller.name())
            .field("identity", &self.identity)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Stops an [`Actor`] from outside its run loop
pub struct ActorHandle<P: Poller> {
    poller: Arc<P>,
    running: Arc<AtomicBool>,
    stop: CancellationToken,
}

impl<P: Poller> Clone for ActorHandle<P> {
    fn clone(&self) -> Self {
        Self {
            poller: Arc::clone(&self.poller),
            running: Arc::clone(&self.running),
            stop: self.stop.clone(),
        }
    }
}

impl<P: Poller> ActorHandle<P> {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clear the liveness flag, interrupt the in-flight poll and shut down
    /// the poller's in-flight work
    pub async fn stop(&self, graceful: bool, join_timeout: Duration) {
        self.running.store(false, Ordering::SeqCst);
        self.stop.cancel();
        self.poller.shutdown(graceful, join_timeout).await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}

/// Run a respond/complete call through the retry utility. Exhaustion is
/// logged and swallowed; `None` means the call never succeeded.
pub async fn complete_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    call: &str,
    operation: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Retryable + fmt::Display,
{
    match with_delay(policy, operation).await {
        Ok(value) => Some(value),
        Err(e) => {
            error!(
                call,
                error = %e,
                kind = e.kind(),
                max_attempts = policy.nb_times,
                "Giving up on service call"
            );
            None
        }
    }
}
