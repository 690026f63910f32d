//! A bounded, drop-oldest queue: when full, the newest push evicts the
//! oldest entry rather than blocking or rejecting. Shared by the ingest
//! input channel (spec §4.8) and the per-stream output channels (spec
//! §4.9), the latter layering key-frame preservation on top of `push`.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

pub struct DropOldestQueue<T> {
    capacity: usize,
    inner: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            notify: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pushes `item` at the back, evicting and returning the front entry
    /// first if the queue is already at capacity.
    pub fn push(&self, item: T) -> Option<T> {
        let evicted = {
            let mut guard = self.inner.lock().expect("queue mutex poisoned");
            let evicted = if guard.len() >= self.capacity {
                guard.pop_front()
            } else {
                None
            };
            guard.push_back(item);
            evicted
        };
        self.notify.notify_one();
        evicted
    }

    /// Removes and returns the front entry without waiting.
    pub fn try_pop_front(&self) -> Option<T> {
        self.inner.lock().expect("queue mutex poisoned").pop_front()
    }

    /// Re-inserts `item` at the front — used to put back a peeked entry.
    pub fn push_front(&self, item: T) {
        self.inner.lock().expect("queue mutex poisoned").push_front(item);
    }

    /// Waits until an entry is available, then removes and returns it.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.try_pop_front() {
                return item;
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_past_capacity_evicts_the_oldest() {
        let queue = DropOldestQueue::new(2);
        assert_eq!(queue.push(1), None);
        assert_eq!(queue.push(2), None);
        assert_eq!(queue.push(3), Some(1));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn pop_waits_for_a_push() {
        let queue = std::sync::Arc::new(DropOldestQueue::new(4));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(42);
        assert_eq!(consumer.await.unwrap(), 42);
    }

    #[test]
    fn push_front_reinserts_at_the_head() {
        let queue = DropOldestQueue::new(4);
        queue.push(2);
        queue.push_front(1);
        assert_eq!(queue.try_pop_front(), Some(1));
        assert_eq!(queue.try_pop_front(), Some(2));
    }
}
