//! Delay-capable work queue with at-least-once delivery.
//!
//! `enqueue(job, delay)` makes a job visible no earlier than now+delay;
//! [`DelayedJobQueue::recv`] blocks until the earliest visible job. The
//! queue performs no automatic retry and no deduplication — retry,
//! backoff, and duplicate suppression are explicit application logic
//! layered on top, so every state transition stays observable.
//!
//! The reference deployment runs one serialized consumer; the queue
//! itself only promises "not visible before T".

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

struct Scheduled<T> {
    visible_at: Instant,
    /// Tie-break so equal deadlines dequeue in enqueue order.
    seq: u64,
    job: T,
}

impl<T> PartialEq for Scheduled<T> {
    fn eq(&self, other: &Self) -> bool {
        self.visible_at == other.visible_at && self.seq == other.seq
    }
}

impl<T> Eq for Scheduled<T> {}

impl<T> PartialOrd for Scheduled<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Scheduled<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest
        // deadline (then lowest seq) on top.
        other
            .visible_at
            .cmp(&self.visible_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// In-process delayed job queue. Shared via `Arc` between producers and
/// the single consumer.
pub struct DelayedJobQueue<T> {
    heap: Mutex<BinaryHeap<Scheduled<T>>>,
    notify: Notify,
    seq: AtomicU64,
}

impl<T> Default for DelayedJobQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DelayedJobQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Add a job that becomes visible no earlier than now + `delay`.
    pub fn enqueue(&self, job: T, delay: Duration) {
        let entry = Scheduled {
            visible_at: Instant::now() + delay,
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
            job,
        };
        let depth = {
            let mut heap = self.heap.lock();
            heap.push(entry);
            heap.len()
        };
        tracing::debug!(delay_ms = delay.as_millis() as u64, depth, "job enqueued");
        self.notify.notify_one();
    }

    /// Jobs currently held, visible or not.
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Pop the earliest job if it is already visible.
    pub fn try_recv(&self) -> Option<T> {
        let mut heap = self.heap.lock();
        if heap
            .peek()
            .is_some_and(|entry| entry.visible_at <= Instant::now())
        {
            return heap.pop().map(|entry| entry.job);
        }
        None
    }

    /// Wait until the earliest job becomes visible and pop it.
    pub async fn recv(&self) -> T {
        loop {
            // Register interest before inspecting the heap so an enqueue
            // between the check and the await is not missed.
            let notified = self.notify.notified();

            let next_deadline = {
                let heap = self.heap.lock();
                heap.peek().map(|entry| entry.visible_at)
            };

            match next_deadline {
                Some(deadline) if deadline <= Instant::now() => {
                    if let Some(job) = self.try_recv() {
                        return job;
                    }
                }
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = notified => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}
