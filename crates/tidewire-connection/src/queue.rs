//! FIFO packet queues shared between the owner and the workers.
//!
//! Each queue has any number of producers but exactly one consumer role:
//! the writer task for outbound queues, the service call for inbound
//! queues. The lock is only held to push or pop, never across an
//! `.await`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// Unbounded FIFO queue with a wake-up for its single consumer.
#[derive(Debug)]
pub(crate) struct PacketQueue<P> {
    items: Mutex<VecDeque<P>>,
    ready: Notify,
}

impl<P> PacketQueue<P> {
    pub(crate) fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<P>> {
        // A panic while holding the lock can only happen inside
        // VecDeque itself; the contents are still a valid queue.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends at the back and wakes the consumer.
    pub(crate) fn push(&self, item: P) {
        self.lock().push_back(item);
        // `notify_one` stores a permit when nobody is waiting yet, so a
        // push between the consumer's drain and its next wait is not lost.
        self.ready.notify_one();
    }

    /// Removes the front item, if any.
    pub(crate) fn pop(&self) -> Option<P> {
        self.lock().pop_front()
    }

    /// Takes everything currently queued, oldest first.
    pub(crate) fn take_all(&self) -> VecDeque<P> {
        std::mem::take(&mut *self.lock())
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Completes after the next `push` (or immediately if one happened
    /// since the last wait).
    pub(crate) fn notified(&self) -> Notified<'_> {
        self.ready.notified()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_push_pop_is_fifo() {
        let q = PacketQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_take_all_empties_queue_in_order() {
        let q = PacketQueue::new();
        for i in 0..5 {
            q.push(i);
        }
        let all: Vec<_> = q.take_all().into_iter().collect();
        assert_eq!(all, vec![0, 1, 2, 3, 4]);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        let q = Arc::new(PacketQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|producer| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for seq in 0..500 {
                        q.push((producer, seq));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let all = q.take_all();
        assert_eq!(all.len(), 2000);
        for producer in 0..4 {
            let seqs: Vec<_> = all
                .iter()
                .filter(|(p, _)| *p == producer)
                .map(|(_, s)| *s)
                .collect();
            assert_eq!(seqs, (0..500).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_push_before_wait_is_not_lost() {
        let q = PacketQueue::new();
        q.push("early");
        tokio::time::timeout(Duration::from_secs(1), q.notified())
            .await
            .expect("stored permit should complete the wait");
        assert_eq!(q.pop(), Some("early"));
    }
}
