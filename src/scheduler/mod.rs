//! Delayed and periodic task scheduling.
//!
//! [`TaskScheduler`] keeps submitted tasks in a time-ordered ready queue and
//! drives a fixed pool of worker threads. Workers sleep on a condvar until
//! the earliest task is due, execute it **outside** the scheduler lock, and
//! re-insert periodic tasks after each run.
//!
//! # Design decisions
//!
//! | Topic | Choice |
//! |---|---|
//! | Waiting | Condvar with a bounded timed wait until the earliest due time — never polling. Every wake re-peeks the queue; a wake does not imply any particular task is ready. |
//! | Execution | The lock is released before an action runs, so a slow task never blocks submission and an action may safely call back into the scheduler. |
//! | Periodic semantics | Fixed delay: the next run is scheduled `period` after the previous run *completes*. A slow action therefore delays subsequent occurrences — a deliberate trade-off (no drift correction). |
//! | Cancellation | Cooperative only. Pending tasks are removed eagerly and will never run; a running action is never interrupted, its task is dropped after the run. |
//! | Shutdown | Intake stops, every still-pending task is cancelled (deterministically "not run"), in-flight actions finish. `Drained` if all workers exit within the timeout, else `Forced` with the threads abandoned. |
//!
//! # Worker loop
//!
//! ```text
//! lock ──► queue empty? ──wait──┐
//!   │                          │ (woken by submit / requeue / shutdown)
//!   ▼                          │
//! earliest due?  ──future──► timed wait ──► re-peek ─┘
//!   │ due now
//!   ▼
//! pop + mark Running ──► unlock ──► run action ──► finalize or requeue
//! ```

pub mod error;
pub mod handle;
mod queue;

pub use error::{AwaitError, SchedulerError};
pub use handle::TaskHandle;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::config::{SchedulerConfig, DEFAULT_DRAIN_TIMEOUT};
use crate::task::{panic_message, TaskCtl, TaskIdAllocator, TaskState};
use queue::{Job, ReadyQueue, TaskEntry};

// ── Shutdown outcome ──────────────────────────────────────────────────────────

/// Terminal status reported by [`TaskScheduler::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStatus {
    /// Every worker exited within the drain timeout.
    Drained,
    /// The drain timeout elapsed with workers still busy; their threads were
    /// abandoned and will exit on their own once the current action returns.
    Forced,
}

// ── Shared scheduler state ────────────────────────────────────────────────────

/// State shared between the scheduler facade, its workers, and task handles.
pub(crate) struct Core {
    inner: Mutex<CoreState>,
    /// Wakes workers: a new (possibly earlier) task, a periodic requeue, or
    /// shutdown.
    available: Condvar,
    /// Wakes `shutdown` when the last worker exits its loop.
    drained: Condvar,
    ids: TaskIdAllocator,
}

/// Everything guarded by the scheduler lock.
struct CoreState {
    queue: ReadyQueue,
    running: bool,
    workers_alive: usize,
}

impl Core {
    fn new() -> Self {
        Self {
            inner: Mutex::new(CoreState {
                queue: ReadyQueue::new(),
                running: true,
                workers_alive: 0,
            }),
            available: Condvar::new(),
            drained: Condvar::new(),
            ids: TaskIdAllocator::default(),
        }
    }

    /// Cancellation arbitration for one task.
    ///
    /// Runs under the scheduler lock so the decision is atomic with respect
    /// to workers popping the queue: a task observed Pending here is
    /// guaranteed to still be in the queue.
    pub(crate) fn cancel(&self, ctl: &TaskCtl) -> bool {
        let mut removed = None;
        let mut state = self.inner.lock();
        let accepted = match ctl.state() {
            TaskState::Pending => match state.queue.remove(ctl.id()) {
                Some(entry) => {
                    ctl.request_cancel();
                    ctl.finalize(TaskState::Cancelled, None);
                    removed = Some(entry);
                    true
                }
                None => false,
            },
            TaskState::Running => {
                // Deferred: the worker checks the flag after the action
                // returns. Only the call that raises the flag reports true.
                let accepted = ctl.request_cancel();
                if accepted {
                    debug!(task = %ctl.id(), "cancellation requested for running task");
                }
                accepted
            }
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed => false,
        };
        drop(state);

        if removed.is_some() {
            debug!(task = %ctl.id(), "cancelled pending task");
        }
        // The entry's closure is dropped outside the lock; user drop code
        // may call back into the scheduler.
        drop(removed);
        accepted
    }

    /// Stop intake, cancel every pending task, and wake all workers.
    ///
    /// Returns the drained entries so the caller can drop their closures
    /// outside the lock.
    fn begin_shutdown(&self) -> Vec<TaskEntry> {
        let mut state = self.inner.lock();
        if !state.running {
            return Vec::new();
        }
        state.running = false;
        let drained = state.queue.drain();
        // Finalizing under the lock keeps "Pending ⇒ queued" atomic for
        // concurrent cancel calls.
        for entry in &drained {
            entry.ctl.request_cancel();
            entry.ctl.finalize(TaskState::Cancelled, None);
        }
        self.available.notify_all();
        drop(state);
        drained
    }

    /// Wait until every worker has exited, bounded by `timeout`.
    fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.lock();
        while state.workers_alive > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.drained.wait_for(&mut state, remaining);
        }
        true
    }
}

// ── TaskScheduler ─────────────────────────────────────────────────────────────

/// Delayed/periodic task scheduler with a fixed worker pool.
///
/// Submission, cancellation, and shutdown are all `&self` and thread-safe;
/// share a scheduler across threads with `Arc` (there is no hidden global
/// instance — construct one and inject it where needed).
///
/// Dropping the scheduler performs the same shutdown with the configured
/// drain timeout, so worker threads are never left parked.
pub struct TaskScheduler {
    core: Arc<Core>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// First terminal status; later shutdown calls return it unchanged.
    terminal: Mutex<Option<ShutdownStatus>>,
    default_drain_timeout: Duration,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("default_drain_timeout", &self.default_drain_timeout)
            .finish_non_exhaustive()
    }
}

impl TaskScheduler {
    /// Start a scheduler with `workers` worker threads.
    ///
    /// # Errors
    /// [`SchedulerError::InvalidWorkerCount`] if `workers` is zero — a
    /// scheduler with no workers could accept tasks but never run them.
    pub fn new(workers: usize) -> Result<Self, SchedulerError> {
        Self::build(workers, DEFAULT_DRAIN_TIMEOUT)
    }

    /// Start a scheduler from a resolved [`SchedulerConfig`].
    pub fn with_config(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::build(config.workers, config.drain_timeout)
    }

    fn build(
        worker_count: usize,
        default_drain_timeout: Duration,
    ) -> Result<Self, SchedulerError> {
        if worker_count < 1 {
            return Err(SchedulerError::InvalidWorkerCount { got: worker_count });
        }

        let core = Arc::new(Core::new());
        let mut handles = Vec::with_capacity(worker_count);
        for worker in 0..worker_count {
            core.inner.lock().workers_alive += 1;
            let spawn = thread::Builder::new()
                .name(format!("metronome-worker-{worker}"))
                .spawn({
                    let core = Arc::clone(&core);
                    move || worker_loop(worker, core)
                });
            match spawn {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    core.inner.lock().workers_alive -= 1;
                    // Construction must not leak the workers already
                    // started; they exit promptly since no task was
                    // accepted yet.
                    drop(core.begin_shutdown());
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(SchedulerError::WorkerSpawn(err));
                }
            }
        }

        info!(workers = worker_count, "task scheduler started");
        Ok(Self {
            core,
            workers: Mutex::new(handles),
            terminal: Mutex::new(None),
            default_drain_timeout,
        })
    }

    /// Schedule a one-shot task to run once `delay` has elapsed.
    ///
    /// A zero `delay` means "as soon as a worker is free". The due time is
    /// taken from a monotonic clock, so wall-clock adjustments never shift
    /// it. The returned handle delivers the action's value through
    /// [`TaskHandle::await_result`].
    ///
    /// # Errors
    /// [`SchedulerError::SchedulerStopped`] after shutdown.
    pub fn schedule<F, T>(&self, action: F, delay: Duration) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let slot = Arc::new(Mutex::new(None));
        let run_slot = Arc::clone(&slot);
        let run = Box::new(move || match catch_unwind(AssertUnwindSafe(action)) {
            Ok(value) => {
                *run_slot.lock() = Some(value);
                Ok(())
            }
            Err(payload) => Err(panic_message(payload)),
        });

        let mut state = self.core.inner.lock();
        if !state.running {
            return Err(SchedulerError::SchedulerStopped);
        }
        let id = self.core.ids.allocate();
        let ctl = Arc::new(TaskCtl::new(id));
        state.queue.insert(TaskEntry {
            id,
            due: Instant::now() + delay,
            job: Job::Once(run),
            ctl: Arc::clone(&ctl),
        });
        let queued = state.queue.len();
        // The new task may be earlier than whatever a worker is waiting for.
        self.core.available.notify_one();
        drop(state);

        debug!(
            task = %id,
            delay_ms = delay.as_millis() as u64,
            queued,
            "scheduled one-shot task"
        );
        Ok(TaskHandle::new(ctl, slot, Arc::clone(&self.core)))
    }

    /// Schedule a task that re-runs forever with a **fixed delay**: each run
    /// starts `period` after the previous run *completes*, the first one
    /// after `initial_delay`.
    ///
    /// A slow action therefore pushes back all later occurrences; there is
    /// no drift correction. A run that panics is logged and does not end the
    /// schedule — only [`TaskHandle::cancel`] or shutdown stops the task, so
    /// its handle never reports `Completed`.
    ///
    /// # Errors
    /// [`SchedulerError::ZeroPeriod`] for a zero `period`;
    /// [`SchedulerError::SchedulerStopped`] after shutdown.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        action: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<TaskHandle<()>, SchedulerError>
    where
        F: FnMut() + Send + 'static,
    {
        if period.is_zero() {
            return Err(SchedulerError::ZeroPeriod);
        }

        let mut action = action;
        let run = Box::new(move || {
            catch_unwind(AssertUnwindSafe(|| action())).map_err(panic_message)
        });

        let slot = Arc::new(Mutex::new(None));
        let mut state = self.core.inner.lock();
        if !state.running {
            return Err(SchedulerError::SchedulerStopped);
        }
        let id = self.core.ids.allocate();
        let ctl = Arc::new(TaskCtl::new(id));
        state.queue.insert(TaskEntry {
            id,
            due: Instant::now() + initial_delay,
            job: Job::Repeating { run, period },
            ctl: Arc::clone(&ctl),
        });
        let queued = state.queue.len();
        self.core.available.notify_one();
        drop(state);

        debug!(
            task = %id,
            initial_delay_ms = initial_delay.as_millis() as u64,
            period_ms = period.as_millis() as u64,
            queued,
            "scheduled fixed-delay periodic task"
        );
        Ok(TaskHandle::new(ctl, slot, Arc::clone(&self.core)))
    }

    /// Shut the scheduler down.
    ///
    /// Stops accepting submissions, cancels every still-pending task (their
    /// handles report Cancelled), and waits up to `drain_timeout` for
    /// workers to finish whatever action is currently running — no action is
    /// ever interrupted. Returns [`ShutdownStatus::Drained`] when all
    /// workers exited, [`ShutdownStatus::Forced`] when the timeout elapsed
    /// first (best effort: the threads are abandoned and exit after their
    /// current action).
    ///
    /// Idempotent — repeat calls return the first terminal status without
    /// waiting again.
    pub fn shutdown(&self, drain_timeout: Duration) -> ShutdownStatus {
        let mut terminal = self.terminal.lock();
        if let Some(status) = *terminal {
            return status;
        }

        let dropped = self.core.begin_shutdown();
        info!(cancelled_pending = dropped.len(), "scheduler shutting down");
        drop(dropped);

        let status = if self.core.wait_drained(drain_timeout) {
            for handle in self.workers.lock().drain(..) {
                let _ = handle.join();
            }
            ShutdownStatus::Drained
        } else {
            warn!(
                drain_timeout_ms = drain_timeout.as_millis() as u64,
                "drain timeout elapsed; abandoning worker threads"
            );
            self.workers.lock().clear();
            ShutdownStatus::Forced
        };

        *terminal = Some(status);
        info!(status = ?status, "scheduler shut down");
        status
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown(self.default_drain_timeout);
    }
}

// ── Worker loop ───────────────────────────────────────────────────────────────

fn worker_loop(worker: usize, core: Arc<Core>) {
    debug!(worker, "worker started");
    loop {
        let mut state = core.inner.lock();

        while state.queue.is_empty() && state.running {
            core.available.wait(&mut state);
        }
        if !state.running {
            break;
        }

        let now = Instant::now();
        match state.queue.pop_due(now) {
            Some(entry) => {
                entry.ctl.mark_running();
                drop(state);
                execute(worker, &core, entry);
            }
            None => {
                // Earliest task is still in the future. Sleep until it is
                // due or something earlier arrives, then re-peek: a wake
                // never implies this exact task is ready.
                if let Some(due) = state.queue.next_due() {
                    core.available
                        .wait_for(&mut state, due.saturating_duration_since(now));
                }
            }
        }
    }

    let mut state = core.inner.lock();
    state.workers_alive -= 1;
    let last = state.workers_alive == 0;
    drop(state);
    if last {
        core.drained.notify_all();
    }
    debug!(worker, "worker exited");
}

/// Run one task outside the scheduler lock, then finalize or requeue it.
fn execute(worker: usize, core: &Arc<Core>, entry: TaskEntry) {
    let TaskEntry { id, job, ctl, .. } = entry;
    match job {
        Job::Once(run) => {
            debug!(worker, task = %id, "executing one-shot task");
            let outcome = run();
            if ctl.cancel_requested() {
                // Cancelled mid-run: the result is discarded even though
                // the action completed.
                debug!(task = %id, "task cancelled during execution");
                ctl.finalize(TaskState::Cancelled, None);
            } else {
                match outcome {
                    Ok(()) => ctl.finalize(TaskState::Completed, None),
                    Err(msg) => {
                        warn!(task = %id, panic = %msg, "task action panicked");
                        ctl.finalize(TaskState::Failed, Some(msg));
                    }
                }
            }
        }
        Job::Repeating { mut run, period } => {
            debug!(worker, task = %id, "executing periodic task");
            if let Err(msg) = run() {
                // A failing run does not end a periodic task; only
                // cancellation or shutdown does.
                warn!(task = %id, panic = %msg, "periodic action panicked, schedule kept");
            }

            let mut state = core.inner.lock();
            if ctl.cancel_requested() {
                debug!(task = %id, "periodic task cancelled");
                ctl.finalize(TaskState::Cancelled, None);
            } else if !state.running {
                debug!(task = %id, "periodic task stopped by shutdown");
                ctl.finalize(TaskState::Cancelled, None);
            } else {
                // Fixed delay: measured from completion, not from the
                // previous due time.
                ctl.mark_pending();
                state.queue.insert(TaskEntry {
                    id,
                    due: Instant::now() + period,
                    job: Job::Repeating { run, period },
                    ctl: Arc::clone(&ctl),
                });
                // A worker may be asleep waiting for a later due time.
                core.available.notify_all();
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
