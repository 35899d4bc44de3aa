/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Task identity and lifecycle primitives shared between the scheduler and
//! task handles.
//!
//! Two views exist of every submitted task:
//!
//! ```text
//! caller ──(schedule)──►  TaskEntry  ──(worker)──►  action runs
//!            │               ↑ queue-owned, closure + due time
//!            └───────────►  TaskHandle ──► TaskCtl
//!                            ↑ caller-owned   ↑ shared control block
//! ```
//!
//! The [`TaskCtl`] control block is the only state shared across that split:
//! the scheduler flips its lifecycle state, workers finalize it, and handle
//! waiters block on its condvar. Callers never see the queue-owned entry.
//!
//! # Ownership model
//! While a task is Pending, its entry (and therefore its action closure) is
//! owned by the scheduler's ready queue. A worker takes exclusive ownership
//! for the duration of a run. The caller's handle holds only `Arc`s to the
//! control block and the typed result slot, so no caller can race a worker
//! on internal fields.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

// ── Task identity ─────────────────────────────────────────────────────────────

/// Unique, monotonically increasing task identifier.
///
/// Allocated from a per-scheduler counter (see [`TaskIdAllocator`]) — there
/// is no process-global state, so ids are only meaningful within the
/// scheduler that issued them. Besides identifying tasks in logs and the
/// queue index, the id breaks ordering ties: two tasks due at the same
/// instant run in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Raw id value.
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Per-scheduler id source.
#[derive(Debug, Default)]
pub(crate) struct TaskIdAllocator {
    next: AtomicU64,
}

impl TaskIdAllocator {
    pub(crate) fn allocate(&self) -> TaskId {
        TaskId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

// ── Lifecycle state ───────────────────────────────────────────────────────────

/// Lifecycle state of a scheduled task.
///
/// ```text
/// Pending ──► Running ──► Completed
///    │           │    └──► Failed     (one-shot action panicked)
///    │           ├──► Cancelled       (flag observed after the run)
///    │           └──► Pending         (periodic requeue)
///    └──► Cancelled                   (cancelled before becoming due)
/// ```
///
/// `Pending → Running` happens under the scheduler lock; terminal
/// transitions happen under the control block's own lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting in the ready queue for its due time.
    Pending,
    /// A worker is currently executing the action.
    Running,
    /// One-shot action finished and its result is available.
    Completed,
    /// Cancelled before running, cancelled during a run, or dropped by
    /// scheduler shutdown.
    Cancelled,
    /// One-shot action panicked; the panic message is recorded.
    Failed,
}

impl TaskState {
    /// Returns `true` for states a task can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed
        )
    }
}

// ── Control block ─────────────────────────────────────────────────────────────

/// Shared control block for one task.
///
/// Lock order: the scheduler lock is always taken before `state` when both
/// are needed (cancellation arbitration, the `Pending → Running` flip);
/// handle waiters take `state` alone.
#[derive(Debug)]
pub(crate) struct TaskCtl {
    id: TaskId,
    state: Mutex<TaskState>,
    /// Signals handle waiters; deliberately separate from the scheduler's
    /// condvar so `await_result` traffic never wakes workers.
    done: Condvar,
    cancel_requested: AtomicBool,
    panic_msg: Mutex<Option<String>>,
}

impl TaskCtl {
    pub(crate) fn new(id: TaskId) -> Self {
        Self {
            id,
            state: Mutex::new(TaskState::Pending),
            done: Condvar::new(),
            cancel_requested: AtomicBool::new(false),
            panic_msg: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Raise the cooperative cancellation flag.
    ///
    /// Returns `true` if this call set it, `false` if it was already raised
    /// — the caller uses that to keep `cancel` idempotent.
    pub(crate) fn request_cancel(&self) -> bool {
        !self.cancel_requested.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// `Pending → Running`. Called by a worker under the scheduler lock,
    /// immediately after removing the entry from the queue.
    pub(crate) fn mark_running(&self) {
        *self.state.lock() = TaskState::Running;
    }

    /// `Running → Pending` for a periodic requeue. Called under the
    /// scheduler lock together with the queue re-insert.
    pub(crate) fn mark_pending(&self) {
        *self.state.lock() = TaskState::Pending;
    }

    /// Move to a terminal state and wake every handle waiter.
    pub(crate) fn finalize(&self, state: TaskState, panic_msg: Option<String>) {
        debug_assert!(state.is_terminal(), "finalize called with {state:?}");
        if let Some(msg) = panic_msg {
            *self.panic_msg.lock() = Some(msg);
        }
        *self.state.lock() = state;
        self.done.notify_all();
    }

    pub(crate) fn panic_message(&self) -> Option<String> {
        self.panic_msg.lock().clone()
    }

    /// Block until the task reaches a terminal state.
    ///
    /// With a timeout, returns `None` if the deadline passes first; the task
    /// itself is unaffected (the wait is bounded, the task is not).
    pub(crate) fn wait_terminal(&self, timeout: Option<Duration>) -> Option<TaskState> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        while !state.is_terminal() {
            match deadline {
                None => self.done.wait(&mut state),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    self.done.wait_for(&mut state, remaining);
                }
            }
        }
        Some(*state)
    }
}

// ── Panic payload handling ────────────────────────────────────────────────────

/// Render a `catch_unwind` payload into a loggable message.
///
/// Panics raised via `panic!("...")` carry `&str` or `String`; anything else
/// is opaque and mapped to a fixed placeholder.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        String::from("opaque panic payload")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    // ── TaskId / allocator ────────────────────────────────────────────────────

    #[test]
    fn allocator_ids_are_monotonic() {
        let alloc = TaskIdAllocator::default();
        let a = alloc.allocate();
        let b = alloc.allocate();
        let c = alloc.allocate();
        assert!(a < b && b < c);
        assert_eq!(a.raw() + 1, b.raw());
    }

    #[test]
    fn task_id_display_is_stable() {
        let alloc = TaskIdAllocator::default();
        assert_eq!(alloc.allocate().to_string(), "task-0");
        assert_eq!(alloc.allocate().to_string(), "task-1");
    }

    // ── TaskState ─────────────────────────────────────────────────────────────

    #[test]
    fn terminal_states_are_exactly_completed_cancelled_failed() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(TaskState::Failed.is_terminal());
    }

    // ── TaskCtl ───────────────────────────────────────────────────────────────

    fn ctl() -> TaskCtl {
        TaskCtl::new(TaskIdAllocator::default().allocate())
    }

    #[test]
    fn new_ctl_starts_pending_and_uncancelled() {
        let c = ctl();
        assert_eq!(c.state(), TaskState::Pending);
        assert!(!c.cancel_requested());
    }

    #[test]
    fn request_cancel_reports_only_the_first_call() {
        let c = ctl();
        assert!(c.request_cancel(), "first call raises the flag");
        assert!(!c.request_cancel(), "second call finds it already raised");
        assert!(c.cancel_requested());
    }

    #[test]
    fn finalize_wakes_wait_terminal() {
        let c = std::sync::Arc::new(ctl());
        let waiter = {
            let c = std::sync::Arc::clone(&c);
            std::thread::spawn(move || c.wait_terminal(None))
        };
        // Give the waiter a moment to park, then finalize.
        std::thread::sleep(Duration::from_millis(20));
        c.finalize(TaskState::Completed, None);
        assert_eq!(waiter.join().unwrap(), Some(TaskState::Completed));
    }

    #[test]
    fn wait_terminal_times_out_on_pending_task() {
        let c = ctl();
        let started = Instant::now();
        assert_eq!(c.wait_terminal(Some(Duration::from_millis(30))), None);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wait_terminal_returns_immediately_when_already_terminal() {
        let c = ctl();
        c.finalize(TaskState::Cancelled, None);
        assert_eq!(
            c.wait_terminal(Some(Duration::from_secs(5))),
            Some(TaskState::Cancelled)
        );
    }

    #[test]
    fn finalize_records_panic_message() {
        let c = ctl();
        c.finalize(TaskState::Failed, Some("boom".to_string()));
        assert_eq!(c.panic_message().as_deref(), Some("boom"));
        assert_eq!(c.state(), TaskState::Failed);
    }

    // ── panic_message ─────────────────────────────────────────────────────────

    #[test]
    fn panic_message_extracts_str_and_string_payloads() {
        let p1 = catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(p1), "static message");

        let detail = 7;
        let p2 = catch_unwind(AssertUnwindSafe(|| panic!("value was {detail}"))).unwrap_err();
        assert_eq!(panic_message(p2), "value was 7");
    }

    #[test]
    fn panic_message_maps_unknown_payloads_to_placeholder() {
        let p = catch_unwind(|| std::panic::panic_any(42_u32)).unwrap_err();
        assert_eq!(panic_message(p), "opaque panic payload");
    }
}
