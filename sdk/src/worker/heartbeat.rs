//! Heartbeat loop of one running activity
//!
//! Runs on its own task beside the handler and shares nothing with it but
//! the task token, the cancellation token and the latest details.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flowlane_core::{with_delay, RetryPolicy, SwfService};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a heartbeat loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatExit {
    /// Torn down by the slot
    Stopped,
    /// The service asked for the activity to be cancelled
    CancelRequested,
    /// The service no longer knows the task
    TaskGone,
}

pub struct Heartbeat {
    service: Arc<dyn SwfService>,
    task_token: String,
    interval: Duration,
    policy: RetryPolicy,
    details: Arc<Mutex<Option<String>>>,
    cancel: CancellationToken,
    cancel_requested: Arc<AtomicBool>,
}

impl Heartbeat {
    pub fn new(
        service: Arc<dyn SwfService>,
        task_token: impl Into<String>,
        interval: Duration,
        policy: RetryPolicy,
        details: Arc<Mutex<Option<String>>>,
        cancel: CancellationToken,
        cancel_requested: Arc<AtomicBool>,
    ) -> Self {
        Self {
            service,
            task_token: task_token.into(),
            interval,
            policy,
            details,
            cancel,
            cancel_requested,
        }
    }

    /// Heartbeat every interval until `stop` fires, the service requests
    /// cancellation, or the task disappears
    pub async fn run(self, stop: CancellationToken) -> HeartbeatExit {
        let mut beats: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => return HeartbeatExit::Stopped,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let details = self.details.lock().clone();
            let service = &self.service;
            let token = self.task_token.as_str();
            let details = details.as_deref();
            let beat = tokio::select! {
                biased;
                _ = stop.cancelled() => return HeartbeatExit::Stopped,
                beat = with_delay(&self.policy, || service.record_activity_task_heartbeat(token, details)) => beat,
            };
            beats += 1;

            match beat {
                Ok(response) if response.cancel_requested => {
                    info!(beats, "Cancellation requested by the service");
                    self.cancel_requested.store(true, Ordering::SeqCst);
                    self.cancel.cancel();
                    return HeartbeatExit::CancelRequested;
                }
                Ok(_) => debug!(beats, "Heartbeat recorded"),
                Err(e) if e.is_does_not_exist() => {
                    warn!(error = %e, "Task no longer exists, stopping heartbeats");
                    return HeartbeatExit::TaskGone;
                }
                Err(e) => warn!(error = %e, "Heartbeat failed"),
            }
        }
    }
}

impl std::fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heartbeat")
            .field("interval", &self.interval)
            .finish()
    }
}
