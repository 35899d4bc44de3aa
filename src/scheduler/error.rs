/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the task scheduler.
//!
//! Two error enums model the two failure surfaces:
//!
//! * [`SchedulerError`] — submission-side failures, returned from
//!   construction and the `schedule` family before a task ever enters the
//!   queue.
//! * [`AwaitError`] — handle-side outcomes, returned from
//!   [`TaskHandle::await_result`](super::handle::TaskHandle::await_result)
//!   when there is no value to hand out.
//!
//! Every variant carries enough structured data to emit a fully-qualified
//! `tracing` event without further parsing. **Do not** replace these with
//! `anyhow::Error` — the structured variants are intentional; `anyhow` is
//! reserved for the configuration-file boundary.

use thiserror::Error;

// ── Submission-side errors ────────────────────────────────────────────────────

/// Failures raised by scheduler construction and task submission.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler needs at least one worker to make progress.
    #[error("worker count must be at least 1 (got {got})")]
    InvalidWorkerCount { got: usize },

    /// A periodic submission carried a zero period, which would respawn the
    /// task immediately after every run.
    #[error("period must be greater than zero")]
    ZeroPeriod,

    /// The scheduler has been shut down; submissions are rejected rather
    /// than silently dropped.
    #[error("scheduler is stopped and no longer accepts tasks")]
    SchedulerStopped,

    /// A worker thread could not be spawned at construction time. Workers
    /// already started are shut down before this is returned.
    #[error("failed to spawn worker thread")]
    WorkerSpawn(#[source] std::io::Error),
}

// ── Handle-side errors ────────────────────────────────────────────────────────

/// Outcomes of waiting on a [`TaskHandle`](super::handle::TaskHandle) that
/// do not produce a value.
#[derive(Debug, Error)]
pub enum AwaitError {
    /// The wait's own timeout elapsed; the task is unaffected and can still
    /// complete later.
    #[error("timed out waiting for task completion")]
    Timeout,

    /// The task was cancelled — before running, during its final run, or by
    /// scheduler shutdown.
    #[error("task was cancelled")]
    Cancelled,

    /// The action panicked; the captured message is recorded on the handle
    /// and repeated on every await.
    #[error("task action panicked: {0}")]
    Panicked(String),

    /// The one-shot value was already claimed by an earlier successful
    /// await on this handle.
    #[error("task result was already claimed")]
    ResultConsumed,
}
