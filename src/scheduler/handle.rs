//! Caller-visible task proxy.
//!
//! A [`TaskHandle`] is the only object a caller holds after submitting a
//! task: it can cancel, query lifecycle state, and block for the outcome.
//! The handle never exposes the task entry itself — the queue and the
//! workers own that — so callers cannot race the scheduler on internal
//! fields. Handles stay valid after the task reaches a terminal state and
//! after scheduler shutdown.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::error::AwaitError;
use super::Core;
use crate::task::{TaskCtl, TaskId, TaskState};

/// Handle to a scheduled task.
///
/// `T` is the action's result type; periodic tasks use `TaskHandle<()>` and
/// only ever finish as cancelled.
pub struct TaskHandle<T> {
    ctl: Arc<TaskCtl>,
    /// Typed result slot, filled by the worker on successful completion.
    slot: Arc<Mutex<Option<T>>>,
    core: Arc<Core>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(ctl: Arc<TaskCtl>, slot: Arc<Mutex<Option<T>>>, core: Arc<Core>) -> Self {
        Self { ctl, slot, core }
    }

    /// This task's scheduler-unique id.
    pub fn id(&self) -> TaskId {
        self.ctl.id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.ctl.state()
    }

    /// `true` once the task can no longer run: completed, cancelled, or
    /// failed.
    pub fn is_done(&self) -> bool {
        self.ctl.state().is_terminal()
    }

    /// `true` once cancellation has been accepted — immediately for a
    /// Pending task, and already during the final run for a Running one.
    pub fn is_cancelled(&self) -> bool {
        self.ctl.cancel_requested() || self.ctl.state() == TaskState::Cancelled
    }

    /// Request cancellation.
    ///
    /// * Pending task: removed from the queue, will never run. Returns
    ///   `true`.
    /// * Running task: the current run finishes undisturbed (cooperative
    ///   cancellation — the action is never interrupted); the worker
    ///   observes the flag afterwards and drops the task. Returns `true`
    ///   for the call that raised the flag.
    /// * Already terminal, or flag already raised: returns `false`.
    pub fn cancel(&self) -> bool {
        self.core.cancel(&self.ctl)
    }

    /// Block until the task finishes and claim its outcome.
    ///
    /// The wait uses the handle's own condvar and never touches the
    /// scheduler's worker coordination.
    pub fn await_result(&self) -> Result<T, AwaitError> {
        match self.ctl.wait_terminal(None) {
            Some(state) => self.claim(state),
            // Without a timeout the wait only ends on a terminal state.
            None => Err(AwaitError::Timeout),
        }
    }

    /// Like [`Self::await_result`], but give up after `timeout`.
    ///
    /// A timeout leaves the task untouched; a later await can still succeed.
    pub fn await_result_timeout(&self, timeout: Duration) -> Result<T, AwaitError> {
        match self.ctl.wait_terminal(Some(timeout)) {
            Some(state) => self.claim(state),
            None => Err(AwaitError::Timeout),
        }
    }

    fn claim(&self, state: TaskState) -> Result<T, AwaitError> {
        match state {
            TaskState::Completed => self.slot.lock().take().ok_or(AwaitError::ResultConsumed),
            TaskState::Cancelled => Err(AwaitError::Cancelled),
            TaskState::Failed => Err(AwaitError::Panicked(
                self.ctl
                    .panic_message()
                    .unwrap_or_else(|| String::from("task action panicked")),
            )),
            TaskState::Pending | TaskState::Running => {
                unreachable!("wait_terminal returned a non-terminal state")
            }
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.ctl.id())
            .field("state", &self.ctl.state())
            .field("cancel_requested", &self.ctl.cancel_requested())
            .finish()
    }
}
