//! Bounded set of execution slots
//!
//! A slot holds one semaphore permit for its whole life. The permit is
//! released exactly once, when the slot future completes or is aborted.
//! Stopping goes through three stages: each slot's own cancellation token,
//! then the supervisor-wide terminate token that kills task processes, then
//! aborting the slot tasks.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Time left to aborted slots to drop their permits
const ABORT_WAIT: Duration = Duration::from_millis(250);

/// PIDs of child processes started by running slots
#[derive(Debug, Clone, Default)]
pub struct PidSet {
    inner: Arc<Mutex<HashSet<u32>>>,
}

impl PidSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `pid` until the returned guard is dropped
    pub fn track(&self, pid: u32) -> PidGuard {
        self.inner.lock().insert(pid);
        PidGuard {
            set: self.clone(),
            pid,
        }
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.inner.lock().contains(&pid)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<u32> {
        self.inner.lock().iter().copied().collect()
    }
}

/// Removes its PID from the set on drop
#[derive(Debug)]
pub struct PidGuard {
    set: PidSet,
    pid: u32,
}

impl PidGuard {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        self.set.inner.lock().remove(&self.pid);
    }
}

struct SlotHandle {
    abort: AbortHandle,
    cancel: CancellationToken,
}

type Slots = Arc<Mutex<HashMap<u64, SlotHandle>>>;

struct SlotGuard {
    id: u64,
    slots: Slots,
    _permit: OwnedSemaphorePermit,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.lock().remove(&self.id);
    }
}

/// Runs slot futures on their own tasks, at most `capacity` at a time
pub struct ProcessSupervisor {
    capacity: usize,
    permits: Arc<Semaphore>,
    slots: Slots,
    next_id: AtomicU64,
    peak: AtomicUsize,
    pids: PidSet,
    terminate: CancellationToken,
}

impl ProcessSupervisor {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            peak: AtomicUsize::new(0),
            pids: PidSet::new(),
            terminate: CancellationToken::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently holding a permit
    pub fn live_count(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    /// Highest number of slots observed running at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn pids(&self) -> &PidSet {
        &self.pids
    }

    /// Fires when running slots must stop at once, without waiting out their
    /// cancellation grace
    pub fn terminate_token(&self) -> CancellationToken {
        self.terminate.clone()
    }

    /// Wait until at least one slot is free
    pub async fn ready(&self) {
        if let Ok(permit) = self.permits.acquire().await {
            drop(permit);
        }
    }

    /// Start `slot` if a permit is free. Returns the slot id, or `None` when
    /// every slot is busy.
    pub fn try_spawn<F>(&self, cancel: CancellationToken, slot: F) -> Option<u64>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = Arc::clone(&self.permits).try_acquire_owned().ok()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let guard = SlotGuard {
            id,
            slots: Arc::clone(&self.slots),
            _permit: permit,
        };

        // Held across the spawn so the slot cannot deregister before it is
        // registered.
        let mut slots = self.slots.lock();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            slot.await;
        });
        slots.insert(
            id,
            SlotHandle {
                abort: handle.abort_handle(),
                cancel,
            },
        );
        self.peak.fetch_max(slots.len(), Ordering::SeqCst);
        debug!(slot = id, live = slots.len(), "Slot started");
        Some(id)
    }

    /// Trigger the cancellation token of every running slot
    pub fn cancel_all(&self) {
        for slot in self.slots.lock().values() {
            slot.cancel.cancel();
        }
    }

    fn abort_all(&self) -> usize {
        let handles: Vec<AbortHandle> = self
            .slots
            .lock()
            .values()
            .map(|s| s.abort.clone())
            .collect();
        for handle in &handles {
            handle.abort();
        }
        handles.len()
    }

    /// Wait up to `timeout` for every slot to finish
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let all = self.capacity as u32;
        matches!(
            tokio::time::timeout(timeout, self.permits.acquire_many(all)).await,
            Ok(Ok(_))
        )
    }

    /// Stop every slot within `join_timeout`.
    ///
    /// Graceful: slots get `join_timeout` less a cancellation budget to
    /// finish. The budget is `grace`, capped at half of `join_timeout`.
    /// Otherwise the whole `join_timeout` is the budget. Within the budget
    /// slots are first cancelled, then terminated halfway through, which
    /// kills their task processes. Whatever still runs after that is
    /// aborted.
    ///
    /// Returns `true` when no slot had to be aborted.
    pub async fn shutdown(&self, graceful: bool, join_timeout: Duration, grace: Duration) -> bool {
        info!(
            graceful,
            live = self.live_count(),
            join_timeout_ms = join_timeout.as_millis() as u64,
            "Shutting down execution slots"
        );

        let budget = if graceful {
            let budget = grace.min(join_timeout / 2);
            if self.wait_idle(join_timeout - budget).await {
                return true;
            }
            budget
        } else {
            join_timeout
        };

        info!(live = self.live_count(), "Cancelling slots still running");
        self.cancel_all();
        if self.wait_idle(budget / 2).await {
            return true;
        }
        info!(live = self.live_count(), "Terminating slots still running");
        self.terminate.cancel();
        if self.wait_idle(budget - budget / 2).await {
            return true;
        }

        let aborted = self.abort_all();
        warn!(aborted, "Aborted slots that did not stop in time");
        if !self.wait_idle(ABORT_WAIT).await {
            warn!(live = self.live_count(), "Slots still held after abort");
        }
        if !self.pids.is_empty() {
            warn!(pids = ?self.pids.snapshot(), "Child processes still tracked after abort");
        }
        false
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("capacity", &self.capacity)
            .field("live", &self.live_count())
            .field("peak", &self.peak())
            .finish()
    }
}
