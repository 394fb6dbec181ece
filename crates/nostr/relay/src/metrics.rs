//! Dispatch metrics
//!
//! Lock-free counters updated by the [`Dispatcher`](crate::Dispatcher):
//! - Events by storage outcome (saved, replaced, unchanged, broadcast only, failed)
//! - REQ queries and COUNT requests, with their failures
//! - Deadline and cancellation errors across every store call

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug)]
pub struct DispatchMetrics {
    start_time: Instant,

    pub events_received: AtomicU64,
    /// Regular events newly stored by `save`
    pub events_saved: AtomicU64,
    /// Replaceable/addressable events that became the stored version
    pub events_replaced: AtomicU64,
    /// Duplicates and older or equal versions the store left alone
    pub events_unchanged: AtomicU64,
    /// Events that were never sent to the store
    pub events_broadcast_only: AtomicU64,
    pub events_failed: AtomicU64,

    pub queries: AtomicU64,
    pub query_failures: AtomicU64,

    pub counts: AtomicU64,
    pub count_failures: AtomicU64,

    pub deadline_exceeded: AtomicU64,
    pub cancelled: AtomicU64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            events_received: AtomicU64::new(0),
            events_saved: AtomicU64::new(0),
            events_replaced: AtomicU64::new(0),
            events_unchanged: AtomicU64::new(0),
            events_broadcast_only: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            queries: AtomicU64::new(0),
            query_failures: AtomicU64::new(0),
            counts: AtomicU64::new(0),
            count_failures: AtomicU64::new(0),
            deadline_exceeded: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_saved(&self) {
        self.events_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_replaced(&self) {
        self.events_replaced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_unchanged(&self) {
        self.events_unchanged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_broadcast_only(&self) {
        self.events_broadcast_only.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_failed(&self, err: &StorageError) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
        self.context_error(err);
    }

    pub fn query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn query_failed(&self, err: &StorageError) {
        self.query_failures.fetch_add(1, Ordering::Relaxed);
        self.context_error(err);
    }

    pub fn count(&self) {
        self.counts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_failed(&self, err: &StorageError) {
        self.count_failures.fetch_add(1, Ordering::Relaxed);
        self.context_error(err);
    }

    fn context_error(&self, err: &StorageError) {
        match err {
            StorageError::DeadlineExceeded => {
                self.deadline_exceeded.fetch_add(1, Ordering::Relaxed);
            }
            StorageError::Cancelled => {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            uptime_secs: self.uptime_secs(),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_saved: self.events_saved.load(Ordering::Relaxed),
            events_replaced: self.events_replaced.load(Ordering::Relaxed),
            events_unchanged: self.events_unchanged.load(Ordering::Relaxed),
            events_broadcast_only: self.events_broadcast_only.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            query_failures: self.query_failures.load(Ordering::Relaxed),
            counts: self.counts.load(Ordering::Relaxed),
            count_failures: self.count_failures.load(Ordering::Relaxed),
            deadline_exceeded: self.deadline_exceeded.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Unix timestamp when snapshot was taken
    pub timestamp: u64,
    pub uptime_secs: u64,
    pub events_received: u64,
    pub events_saved: u64,
    pub events_replaced: u64,
    pub events_unchanged: u64,
    pub events_broadcast_only: u64,
    pub events_failed: u64,
    pub queries: u64,
    pub query_failures: u64,
    pub counts: u64,
    pub count_failures: u64,
    pub deadline_exceeded: u64,
    pub cancelled: u64,
}

impl MetricsSnapshot {
    /// Share of store calls (events, queries, counts) that failed, in percent
    pub fn failure_rate(&self) -> f64 {
        let calls = self.events_saved
            + self.events_replaced
            + self.events_unchanged
            + self.events_failed
            + self.queries
            + self.counts;
        if calls == 0 {
            0.0
        } else {
            let failures = self.events_failed + self.query_failures + self.count_failures;
            (failures as f64 / calls as f64) * 100.0
        }
    }
}
