//! Queue counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the queue and its workers.
#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    enqueued: AtomicU64,
    applied: AtomicU64,
    retried: AtomicU64,
    timed_out: AtomicU64,
    dead_lettered: AtomicU64,
    rejected: AtomicU64,
}

impl QueueCounters {
    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Undoes `record_enqueued` for an operation the channel refused.
    pub(crate) fn record_refused(&self) {
        self.enqueued.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dead_letter(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> QueueStats {
        let enqueued = self.enqueued.load(Ordering::Relaxed);
        let applied = self.applied.load(Ordering::Relaxed);
        let dead_lettered = self.dead_lettered.load(Ordering::Relaxed);
        QueueStats {
            enqueued,
            applied,
            retried: self.retried.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            dead_lettered,
            rejected: self.rejected.load(Ordering::Relaxed),
            in_flight: enqueued.saturating_sub(applied + dead_lettered),
        }
    }
}

/// A point-in-time snapshot of queue statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    /// Operations accepted by `enqueue` or `enqueue_wait`.
    pub enqueued: u64,
    /// Operations settled without error. Skipped and stale ones count here.
    pub applied: u64,
    /// Attempts that were retried.
    pub retried: u64,
    /// Attempts that exceeded the apply timeout.
    pub timed_out: u64,
    /// Operations a worker handed to the dead-letter log.
    pub dead_lettered: u64,
    /// Operations a commit hook could not enqueue. These are dead-lettered
    /// without being attempted.
    pub rejected: u64,
    /// Operations accepted but not yet settled.
    pub in_flight: u64,
}

impl QueueStats {
    /// Returns the number of settled operations.
    pub fn settled(&self) -> u64 {
        self.applied + self.dead_lettered
    }
}
