//! Strict-priority FIFO queue feeding the worker pool.
//!
//! Four bounded-by-memory buckets, one per [`TaskPriority`]. Dequeue always
//! drains the most urgent non-empty bucket; within a bucket order is FIFO.
//! Wakeups go through `tokio::sync::Notify` so idle workers park without
//! polling.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::scheduler::task::{TaskId, TaskPriority};

/// Queue depths per priority, surfaced in scheduler stats.
pub type QueueDepths = [(TaskPriority, usize); 4];

#[derive(Default)]
pub struct PriorityQueue {
    buckets: Mutex<[VecDeque<TaskId>; 4]>,
    notify: Notify,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task and wake one parked worker.
    pub fn push(&self, priority: TaskPriority, id: TaskId) {
        self.buckets.lock()[priority.bucket()].push_back(id);
        self.notify.notify_one();
    }

    /// Non-blocking dequeue from the most urgent non-empty bucket.
    pub fn pop(&self) -> Option<TaskId> {
        let mut buckets = self.buckets.lock();
        buckets.iter_mut().find_map(|bucket| bucket.pop_front())
    }

    /// Await the next task. Parks on the notifier when all buckets are empty.
    pub async fn next(&self) -> TaskId {
        loop {
            // Register for notification before checking, so a push between the
            // check and the await is not lost.
            let notified = self.notify.notified();
            if let Some(id) = self.pop() {
                return id;
            }
            notified.await;
        }
    }

    /// Current depth of each bucket, most urgent first.
    pub fn depths(&self) -> QueueDepths {
        let buckets = self.buckets.lock();
        [
            (TaskPriority::Urgent, buckets[0].len()),
            (TaskPriority::High, buckets[1].len()),
            (TaskPriority::Normal, buckets[2].len()),
            (TaskPriority::Low, buckets[3].len()),
        ]
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
