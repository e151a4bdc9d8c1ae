//! Time-ordered, deduplicating ACLK query queue.
//!
//! Records are kept sorted by `run_after`, FIFO among equal times. A new
//! query with the same key as a queued one either no-ops (same schedule) or
//! replaces it. Cancelled records stay in place as tombstones and are purged
//! when a pop reaches them.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::record::{QueryRecord, QueryRequest};
use crate::stats::QueryStats;
use crate::wake::WakeChannel;

/// Result of [`QueryQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new record was added.
    Queued,
    /// An equivalent record with the same schedule is already queued.
    Duplicate,
    /// An equivalent record was removed and re-queued at the new time.
    Replaced,
    /// The link is not connected; nothing was queued.
    NotConnected,
}

impl EnqueueOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, EnqueueOutcome::NotConnected)
    }
}

/// Result of [`QueryQueue::pop`].
#[derive(Debug)]
pub enum Pop {
    Ready(QueryRecord),
    /// The head is scheduled later; nothing behind it can be due either.
    NotYet { wait_secs: i64 },
    Empty,
}

pub struct QueryQueue {
    records: Mutex<VecDeque<QueryRecord>>,
    connected: AtomicBool,
    wake: Arc<WakeChannel>,
    stats: Arc<QueryStats>,
}

impl QueryQueue {
    pub fn new(wake: Arc<WakeChannel>, stats: Arc<QueryStats>) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(false),
            wake,
            stats,
        }
    }

    /// Flipped under the records lock so no enqueue lands after a disconnect.
    pub fn set_connected(&self, connected: bool) {
        let _records = self.records.lock();
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Records currently linked, tombstones included until purged.
    pub fn size(&self) -> usize {
        self.records.lock().len()
    }

    pub fn enqueue(&self, request: QueryRequest) -> EnqueueOutcome {
        self.enqueue_at(Utc::now().timestamp(), request)
    }

    pub fn enqueue_at(&self, now: i64, request: QueryRequest) -> EnqueueOutcome {
        let mut records = self.records.lock();
        // Ignore all commands while we wait for the link to come up
        if !self.is_connected() {
            return EnqueueOutcome::NotConnected;
        }

        let run_after = now + i64::from(request.delay_secs);

        let mut outcome = EnqueueOutcome::Queued;
        if let Some(pos) = records.iter().position(|r| !r.deleted && r.matches(&request)) {
            if records[pos].run_after == run_after {
                drop(records);
                self.wake.signal();
                return EnqueueOutcome::Duplicate;
            }
            debug!("Removing double entry");
            records.remove(pos);
            outcome = EnqueueOutcome::Replaced;
        }

        self.stats.query_queued();

        let record = QueryRecord::from_request(request, now);
        debug!(
            "Added query ({}) ({})",
            record.topic,
            record.query.as_deref().unwrap_or("")
        );

        let tail_fits = records.back().map_or(true, |tail| tail.run_after <= run_after);
        if tail_fits {
            records.push_back(record);
        } else {
            let pos = records.partition_point(|r| r.run_after <= run_after);
            records.insert(pos, record);
        }

        drop(records);
        self.wake.signal();
        outcome
    }

    pub fn pop(&self) -> Pop {
        self.pop_at(Utc::now().timestamp())
    }

    /// Take the head record if it is due at `now`, purging tombstones first.
    pub fn pop_at(&self, now: i64) -> Pop {
        let mut records = self.records.lock();

        while records.front().is_some_and(|r| r.deleted) {
            if let Some(purged) = records.pop_front() {
                debug!("Garbage collect query {}:{}", purged.topic, purged.query.as_deref().unwrap_or(""));
            }
        }

        let Some(head) = records.front() else {
            return Pop::Empty;
        };

        if head.run_after > now {
            let wait_secs = head.run_after - now;
            debug!(
                "Query {} will run in {} seconds",
                head.query.as_deref().unwrap_or(&head.topic),
                wait_secs
            );
            return Pop::NotYet { wait_secs };
        }

        match records.pop_front() {
            Some(record) => Pop::Ready(record),
            None => Pop::Empty,
        }
    }

    /// Tombstone every live record accepted by `predicate`; returns how many.
    pub fn cancel<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&QueryRecord) -> bool,
    {
        let mut records = self.records.lock();
        let mut cancelled = 0;
        for record in records.iter_mut().filter(|r| !r.deleted) {
            if predicate(record) {
                record.deleted = true;
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Free every record regardless of schedule. Shutdown only.
    pub fn drain_and_free_all(&self) -> usize {
        let drained: Vec<QueryRecord> = self.records.lock().drain(..).collect();
        if !drained.is_empty() {
            info!("Dropped {} pending ACLK queries", drained.len());
        }
        drained.len()
    }
}
