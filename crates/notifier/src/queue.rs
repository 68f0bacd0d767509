//! In-memory FIFO queue decoupling webhook receipt from delivery.
//!
//! Producers are the ingress handlers; the single consumer is the delivery
//! worker. Nothing is persisted: queued events are lost on restart.

use std::collections::VecDeque;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, Notify};

use whitenight_common::types::NotificationEvent;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue is full (capacity {0})")]
    Full(usize),
}

/// Shared handle to the event queue. Cloning yields another handle to the
/// same buffer.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<Inner>,
}

struct Inner {
    items: Mutex<VecDeque<NotificationEvent>>,
    available: Notify,
    capacity: Option<usize>,
}

impl EventQueue {
    /// Create an unbounded queue.
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Create a queue with an optional depth bound. `None` is unbounded.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::new()),
                available: Notify::new(),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.inner.capacity
    }

    /// Append an event to the tail. Never fails on an unbounded queue.
    ///
    /// Returns the queue depth after the append.
    pub async fn enqueue(&self, event: NotificationEvent) -> Result<usize, QueueError> {
        let depth = {
            let mut items = self.inner.items.lock().await;
            if let Some(capacity) = self.inner.capacity
                && items.len() >= capacity
            {
                return Err(QueueError::Full(capacity));
            }
            items.push_back(event);
            items.len()
        };

        self.inner.available.notify_one();
        Ok(depth)
    }

    /// Remove and return the head event, waiting until one is available.
    pub async fn dequeue(&self) -> NotificationEvent {
        loop {
            if let Some(event) = self.inner.items.lock().await.pop_front() {
                return event;
            }
            // notify_one stores a permit when nobody is waiting, so an enqueue
            // landing between the check and this await is not lost.
            self.inner.available.notified().await;
        }
    }

    /// Current number of pending events.
    pub async fn len(&self) -> usize {
        self.inner.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_round_trip_preserves_fields() {
        let queue = EventQueue::new();
        let event = NotificationEvent::new(123456789012345678, "sikeres");
        queue.enqueue(event.clone()).await.unwrap();

        let popped = queue.dequeue().await;
        assert_eq!(popped, event);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = EventQueue::new();
        for id in 1..=5 {
            queue
                .enqueue(NotificationEvent::new(id, "ok"))
                .await
                .unwrap();
        }
        assert_eq!(queue.len().await, 5);

        for id in 1..=5 {
            assert_eq!(queue.dequeue().await.subject_id, id);
        }
    }

    #[tokio::test]
    async fn test_duplicates_are_kept() {
        let queue = EventQueue::new();
        queue.enqueue(NotificationEvent::new(7, "ok")).await.unwrap();
        queue.enqueue(NotificationEvent::new(7, "ok")).await.unwrap();
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_enqueue_reports_depth() {
        let queue = EventQueue::new();
        assert_eq!(queue.enqueue(NotificationEvent::new(1, "a")).await, Ok(1));
        assert_eq!(queue.enqueue(NotificationEvent::new(2, "b")).await, Ok(2));
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = EventQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.enqueue(NotificationEvent::new(9, "ok")).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake")
            .unwrap();
        assert_eq!(event.subject_id, 9);
    }

    #[tokio::test]
    async fn test_bounded_queue_rejects_when_full() {
        let queue = EventQueue::with_capacity(Some(1));
        queue.enqueue(NotificationEvent::new(1, "ok")).await.unwrap();
        assert_eq!(
            queue.enqueue(NotificationEvent::new(2, "ok")).await,
            Err(QueueError::Full(1))
        );
        assert_eq!(queue.len().await, 1);

        queue.dequeue().await;
        assert!(queue.enqueue(NotificationEvent::new(3, "ok")).await.is_ok());
    }
}
