//! Bounded async operation pool with FIFO queueing.
//!
//! At most `max_concurrent` operations run at once; everything beyond that
//! waits in a FIFO queue. There is no reject-on-full mode: submissions
//! always queue. Whenever a task settles, by completing, timing out or
//! being cancelled, the freed slot immediately goes to the oldest queued
//! task.
//!
//! Timeout and cancellation **abandon** the operation rather than killing
//! it: the pool settles the task's public outcome and stops polling the
//! underlying future, which keeps running detached until it finishes on
//! its own. Side effects it has already caused stand.
//!
//! ```text
//! submit ──▶ queued ──▶ running ──▶ settled: success | failure
//!               │          │                 timed_out | cancelled
//!               └──────────┴──▶ cancel(id) / cancel_all()
//! ```

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Identifier assigned to every submitted task, usable with
/// [`OperationPool::cancel`].
pub type TaskId = u64;

/// Terminal outcomes the pool itself produces.
///
/// An operation's own failure travels inside the task's output type; these
/// variants cover what the pool does *around* the operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Invalid configuration parameter (zero concurrency).
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
    /// The task ran longer than the per-task timeout and was abandoned.
    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),
    /// The task was cancelled while queued or running.
    #[error("operation cancelled")]
    Cancelled,
    /// The operation panicked.
    #[error("operation panicked: {0}")]
    Panicked(String),
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStats {
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    /// `active / max_concurrent`.
    pub utilization: f64,
}

type BoxedOperation<T> = Pin<Box<dyn Future<Output = T> + Send>>;

struct QueuedTask<T> {
    id: TaskId,
    name: String,
    operation: BoxedOperation<T>,
    outcome_tx: oneshot::Sender<Result<T, PoolError>>,
}

struct RunningTask {
    /// Consumed by the first cancel; a task can only be cancelled once.
    cancel_tx: Option<oneshot::Sender<()>>,
}

struct PoolState<T> {
    queue: VecDeque<QueuedTask<T>>,
    running: HashMap<TaskId, RunningTask, ahash::RandomState>,
}

/// Handle returned by [`OperationPool::submit`]: the task id for
/// cancellation plus the awaitable outcome.
pub struct SubmittedTask<T> {
    id: TaskId,
    outcome_rx: oneshot::Receiver<Result<T, PoolError>>,
}

impl<T> SubmittedTask<T> {
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Awaits the task's terminal outcome.
    pub async fn outcome(self) -> Result<T, PoolError> {
        // The sender only disappears if the pool itself was torn down
        // with the task still pending.
        self.outcome_rx.await.unwrap_or(Err(PoolError::Cancelled))
    }
}

/// Bounded-concurrency executor with FIFO fairness.
pub struct OperationPool<T> {
    state: Mutex<PoolState<T>>,
    max_concurrent: usize,
    task_timeout: Duration,
    next_id: AtomicU64,
}

impl<T> OperationPool<T>
where
    T: Send + 'static,
{
    /// Creates a pool running at most `max_concurrent` operations, each
    /// bounded by `task_timeout` once it starts.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] if `max_concurrent` is zero.
    pub fn new(max_concurrent: usize, task_timeout: Duration) -> Result<Self, PoolError> {
        if max_concurrent == 0 {
            return Err(PoolError::InvalidConfig("max_concurrent must be non-zero".to_string()));
        }

        Ok(Self {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                running: HashMap::with_hasher(ahash::RandomState::new()),
            }),
            max_concurrent,
            task_timeout,
            next_id: AtomicU64::new(0),
        })
    }

    /// Submits `operation` for execution.
    ///
    /// Starts immediately when a slot is free, otherwise queues. The
    /// returned handle is not required for the task to run; dropping it
    /// just discards the outcome.
    pub fn submit<F>(self: &Arc<Self>, name: impl Into<String>, operation: F) -> SubmittedTask<T>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let task = QueuedTask { id, name: name.into(), operation: Box::pin(operation), outcome_tx };

        let mut state = self.state.lock();
        if state.running.len() < self.max_concurrent {
            self.launch(&mut state, task);
        } else {
            trace!(id, queued = state.queue.len() + 1, "pool saturated, task queued");
            state.queue.push_back(task);
        }
        drop(state);

        SubmittedTask { id, outcome_rx }
    }

    /// Cancels a queued or running task. Returns `false` for ids that are
    /// unknown or already settled.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut state = self.state.lock();

        if let Some(position) = state.queue.iter().position(|task| task.id == id) {
            let task = state.queue.remove(position);
            drop(state);
            if let Some(task) = task {
                let _ = task.outcome_tx.send(Err(PoolError::Cancelled));
            }
            debug!(id, "queued task cancelled");
            return true;
        }

        if let Some(entry) = state.running.get_mut(&id) {
            if let Some(cancel_tx) = entry.cancel_tx.take() {
                let _ = cancel_tx.send(());
            }
            debug!(id, "running task cancelled");
            return true;
        }

        false
    }

    /// Cancels every queued and running task.
    pub fn cancel_all(&self) {
        let (queued, signals) = {
            let mut state = self.state.lock();
            let queued: Vec<QueuedTask<T>> = state.queue.drain(..).collect();
            let signals: Vec<oneshot::Sender<()>> =
                state.running.values_mut().filter_map(|task| task.cancel_tx.take()).collect();
            (queued, signals)
        };

        if queued.is_empty() && signals.is_empty() {
            return;
        }
        debug!(queued = queued.len(), running = signals.len(), "cancelling all tasks");

        for task in queued {
            let _ = task.outcome_tx.send(Err(PoolError::Cancelled));
        }
        for cancel_tx in signals {
            let _ = cancel_tx.send(());
        }
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.lock().running.len()
    }

    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Returns a point-in-time stats snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let active = state.running.len();
        PoolStats {
            active,
            queued: state.queue.len(),
            max_concurrent: self.max_concurrent,
            utilization: active as f64 / self.max_concurrent as f64,
        }
    }

    /// Moves a task into the running set and spawns its runner. Caller
    /// holds the state lock, which is what reserves the slot.
    fn launch(self: &Arc<Self>, state: &mut PoolState<T>, task: QueuedTask<T>) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        state.running.insert(task.id, RunningTask { cancel_tx: Some(cancel_tx) });
        tokio::spawn(Arc::clone(self).run_task(task, cancel_rx));
    }

    async fn run_task(self: Arc<Self>, task: QueuedTask<T>, cancel_rx: oneshot::Receiver<()>) {
        let QueuedTask { id, name, operation, outcome_tx } = task;
        trace!(id, name = %name, "task running");

        // The operation runs in its own tokio task. Dropping the join
        // handle on timeout or cancel detaches it: abandoned, not killed.
        let mut join = tokio::spawn(operation);
        let outcome: Result<T, PoolError> = tokio::select! {
            biased;
            _ = cancel_rx => Err(PoolError::Cancelled),
            () = tokio::time::sleep(self.task_timeout) => Err(PoolError::TimedOut(self.task_timeout)),
            joined = &mut join => match joined {
                Ok(value) => Ok(value),
                Err(join_error) => Err(PoolError::Panicked(join_error.to_string())),
            },
        };

        match &outcome {
            Ok(_) => trace!(id, name = %name, "task completed"),
            Err(PoolError::TimedOut(timeout)) => {
                warn!(id, name = %name, timeout_ms = timeout.as_millis() as u64, "task timed out, operation abandoned");
            }
            Err(PoolError::Cancelled) => debug!(id, name = %name, "task settled cancelled"),
            Err(other) => warn!(id, name = %name, error = %other, "task failed"),
        }

        let _ = outcome_tx.send(outcome);
        self.finish(id);
    }

    /// Removes a settled task and hands freed slots to the queue in FIFO
    /// order.
    fn finish(self: &Arc<Self>, id: TaskId) {
        let mut state = self.state.lock();
        state.running.remove(&id);
        while state.running.len() < self.max_concurrent {
            let Some(task) = state.queue.pop_front() else { break };
            trace!(id = task.id, "starting queued task");
            self.launch(&mut state, task);
        }
    }
}
