use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::codec::LogEvent;

/// Default retry queue capacity
pub const MAX_FAILED: usize = 1000;

/// Bounded FIFO of log events whose first write failed
///
/// Shared between the batch consumer (producer) and the drain scheduler
/// (consumer). The lock is never held across an `.await`.
#[derive(Debug)]
pub struct RetryQueue {
    items: Mutex<VecDeque<LogEvent>>,
    capacity: usize,
}

impl RetryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(MAX_FAILED))),
            capacity,
        }
    }

    /// Append an event at the tail.
    ///
    /// Returns `false` and drops the event when the queue is full.
    pub fn enqueue(&self, event: LogEvent) -> bool {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return false;
        }
        items.push_back(event);
        true
    }

    /// Remove up to `max` events from the head, oldest first.
    pub fn drain_batch(&self, max: usize) -> Vec<LogEvent> {
        let mut items = self.items.lock();
        let take = max.min(items.len());
        items.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new(MAX_FAILED)
    }
}
