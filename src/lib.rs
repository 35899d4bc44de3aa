/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Metronome – delayed and periodic task scheduler.
//!
//! A [`TaskScheduler`](scheduler::TaskScheduler) accepts one-shot and
//! periodic task submissions with delays, keeps them in a time-ordered
//! pending set, and drives a fixed pool of worker threads that sleep until
//! the next task is due, execute it outside the scheduler lock, and requeue
//! periodic tasks. Callers interact with submitted tasks only through
//! [`TaskHandle`](scheduler::handle::TaskHandle)s: cancellation, status
//! queries, and blocking result retrieval.
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── config/         – YAML scheduler configuration
//! ├── task.rs         – task identity, lifecycle state, shared control block
//! └── scheduler/      – TaskScheduler, worker loops, handles, errors
//!     ├── queue.rs    – deterministic (due, id)-ordered pending set
//!     ├── handle.rs   – caller-visible task proxy
//!     └── error.rs    – structured error types
//! ```

pub mod config;
pub mod scheduler;
pub mod task;
