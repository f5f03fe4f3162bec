//! The priority-ordered queue of waiting jobs.

use std::time::Instant;

use crate::jobs::{JobHandle, JobPriority};

/// Jobs waiting to be processed, ordered by [`JobPriority`].
///
/// Kept sorted descending so the best (smallest) priority sits at the tail
/// and popping is O(1); insertion is a binary search plus a shift. On a
/// player-tile change the whole queue is re-keyed and re-sorted at once
/// via [`Self::rebuild`].
#[derive(Debug, Default)]
pub(crate) struct WaitingQueue {
    /// Invariant: sorted by priority, descending.
    entries: Vec<(JobPriority, JobHandle)>,
}

impl WaitingQueue {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts at the sorted position. Among equal priorities, earlier
    /// pushes pop first.
    pub fn push(&mut self, priority: JobPriority, handle: JobHandle) {
        let at = self.entries.partition_point(|&(p, _)| p > priority);
        self.entries.insert(at, (priority, handle));
    }

    /// Whether the best waiting job may be processed at `now`.
    ///
    /// Only the tail needs checking: every other entry in the same state
    /// rank has a process time at least as late.
    pub fn has_ready(&self, now: Instant) -> bool {
        matches!(self.entries.last(), Some(&(p, _)) if p.process_time <= now)
    }

    /// Pops the best job if it is ready at `now`.
    pub fn pop_ready(&mut self, now: Instant) -> Option<JobHandle> {
        if self.has_ready(now) {
            self.entries.pop().map(|(_, handle)| handle)
        } else {
            None
        }
    }

    /// Re-keys every entry and restores the sort order. Used when the
    /// player tile changes and all distances must be recomputed.
    pub fn rebuild(&mut self, mut key: impl FnMut(JobHandle) -> JobPriority) {
        for (priority, handle) in &mut self.entries {
            *priority = key(*handle);
        }
        self.entries.sort_by(|a, b| b.0.cmp(&a.0));
    }

    /// Empties the queue, yielding the handles that were waiting.
    pub fn clear(&mut self) -> Vec<JobHandle> {
        self.entries.drain(..).map(|(_, handle)| handle).collect()
    }
}
