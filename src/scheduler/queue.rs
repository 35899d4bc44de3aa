/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The ready queue: every Pending task, ordered by due time.
//!
//! Backed by a `BTreeMap` keyed on `(due, id)` — not a binary heap — so
//! iteration order is total and deterministic: earliest due time first, ties
//! broken by task id, i.e. submission order. A secondary id index supports
//! the eager removal that cancellation requires (a cancelled task must leave
//! the queue immediately; the queue never holds tombstones).
//!
//! All access happens under the scheduler lock; nothing here synchronizes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::task::{TaskCtl, TaskId};

// ── Work items ────────────────────────────────────────────────────────────────

/// The unit of work carried by a queue entry.
///
/// Closures return `Err(message)` when the underlying action panicked; the
/// `catch_unwind` lives inside the closure so a worker can never be unwound
/// by a task.
pub(crate) enum Job {
    /// Runs exactly once; the closure delivers its value into the handle's
    /// typed result slot.
    Once(Box<dyn FnOnce() -> Result<(), String> + Send>),

    /// Re-runs forever, `period` after each completion, until cancelled.
    Repeating {
        run: Box<dyn FnMut() -> Result<(), String> + Send>,
        period: Duration,
    },
}

/// A Pending task as owned by the queue.
pub(crate) struct TaskEntry {
    pub(crate) id: TaskId,
    pub(crate) due: Instant,
    pub(crate) job: Job,
    pub(crate) ctl: Arc<TaskCtl>,
}

// ── ReadyQueue ────────────────────────────────────────────────────────────────

/// Time-ordered set of Pending tasks.
#[derive(Default)]
pub(crate) struct ReadyQueue {
    entries: BTreeMap<(Instant, TaskId), TaskEntry>,
    /// id → current due time, so cancellation can find an entry without
    /// knowing when it is due.
    index: HashMap<TaskId, Instant>,
}

impl ReadyQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn insert(&mut self, entry: TaskEntry) {
        debug_assert!(
            !self.index.contains_key(&entry.id),
            "{} inserted twice",
            entry.id
        );
        self.index.insert(entry.id, entry.due);
        self.entries.insert((entry.due, entry.id), entry);
    }

    /// Due time of the earliest entry, if any.
    pub(crate) fn next_due(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(due, _)| *due)
    }

    /// Remove and return the earliest entry if it is due at `now`.
    ///
    /// Returns `None` both for an empty queue and when the earliest entry is
    /// still in the future — callers distinguish via [`Self::next_due`].
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<TaskEntry> {
        let (due, _) = self.entries.keys().next()?;
        if *due > now {
            return None;
        }
        let (_, entry) = self.entries.pop_first()?;
        self.index.remove(&entry.id);
        Some(entry)
    }

    /// Eagerly remove the entry for `id`, if still queued.
    pub(crate) fn remove(&mut self, id: TaskId) -> Option<TaskEntry> {
        let due = self.index.remove(&id)?;
        self.entries.remove(&(due, id))
    }

    /// Take every entry out of the queue (shutdown drain).
    pub(crate) fn drain(&mut self) -> Vec<TaskEntry> {
        self.index.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskIdAllocator;

    fn entry(alloc: &TaskIdAllocator, due: Instant) -> TaskEntry {
        let id = alloc.allocate();
        TaskEntry {
            id,
            due,
            job: Job::Once(Box::new(|| Ok(()))),
            ctl: Arc::new(TaskCtl::new(id)),
        }
    }

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn pop_due_yields_earliest_first_regardless_of_insert_order() {
        let alloc = TaskIdAllocator::default();
        let base = Instant::now();
        let mut q = ReadyQueue::new();

        q.insert(entry(&alloc, at(base, 30)));
        q.insert(entry(&alloc, at(base, 10)));
        q.insert(entry(&alloc, at(base, 20)));

        let far_future = at(base, 1_000);
        let order: Vec<Instant> = std::iter::from_fn(|| q.pop_due(far_future))
            .map(|e| e.due)
            .collect();
        assert_eq!(order, vec![at(base, 10), at(base, 20), at(base, 30)]);
        assert!(q.is_empty());
    }

    #[test]
    fn identical_due_times_pop_in_submission_order() {
        let alloc = TaskIdAllocator::default();
        let due = Instant::now();
        let mut q = ReadyQueue::new();

        let first = entry(&alloc, due);
        let second = entry(&alloc, due);
        let third = entry(&alloc, due);
        let expected = vec![first.id, second.id, third.id];

        // Insert out of submission order; the id tie-break restores it.
        q.insert(second);
        q.insert(third);
        q.insert(first);

        let order: Vec<TaskId> = std::iter::from_fn(|| q.pop_due(due)).map(|e| e.id).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn pop_due_leaves_future_entries_queued() {
        let alloc = TaskIdAllocator::default();
        let base = Instant::now();
        let mut q = ReadyQueue::new();
        q.insert(entry(&alloc, at(base, 500)));

        assert!(q.pop_due(base).is_none());
        assert_eq!(q.len(), 1, "future entry must stay queued");
        assert_eq!(q.next_due(), Some(at(base, 500)));
    }

    #[test]
    fn remove_takes_out_exactly_the_requested_entry() {
        let alloc = TaskIdAllocator::default();
        let base = Instant::now();
        let mut q = ReadyQueue::new();

        let keep_early = entry(&alloc, at(base, 10));
        let victim = entry(&alloc, at(base, 20));
        let keep_late = entry(&alloc, at(base, 30));
        let victim_id = victim.id;
        let survivors = vec![keep_early.id, keep_late.id];

        q.insert(keep_early);
        q.insert(victim);
        q.insert(keep_late);

        assert_eq!(q.remove(victim_id).map(|e| e.id), Some(victim_id));
        assert!(q.remove(victim_id).is_none(), "second remove finds nothing");

        let rest: Vec<TaskId> = std::iter::from_fn(|| q.pop_due(at(base, 1_000)))
            .map(|e| e.id)
            .collect();
        assert_eq!(rest, survivors);
    }

    #[test]
    fn next_due_tracks_the_minimum() {
        let alloc = TaskIdAllocator::default();
        let base = Instant::now();
        let mut q = ReadyQueue::new();

        assert_eq!(q.next_due(), None);
        q.insert(entry(&alloc, at(base, 40)));
        assert_eq!(q.next_due(), Some(at(base, 40)));
        q.insert(entry(&alloc, at(base, 15)));
        assert_eq!(q.next_due(), Some(at(base, 15)));
    }

    #[test]
    fn drain_empties_the_queue() {
        let alloc = TaskIdAllocator::default();
        let base = Instant::now();
        let mut q = ReadyQueue::new();
        q.insert(entry(&alloc, at(base, 1)));
        q.insert(entry(&alloc, at(base, 2)));

        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert!(q.is_empty());
        assert_eq!(q.next_due(), None);
    }
}
