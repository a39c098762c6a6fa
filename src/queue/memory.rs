//! In-process command queue
//!
//! FIFO queue implementing all three queue traits. Used when the gateway runs
//! without NATS and by the test suite. Contents are lost on restart.
//!
//! Every message keeps the sequence number it was published with, and a
//! nak'ed message goes back into the ready queue at its sequence position.
//! Handing back a whole batch therefore restores the original order no
//! matter which order the naks arrive in.

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use super::{Acker, CommandQueue, CommandSource, DeadLetter, DeadLetterSink, Delivery};
use crate::types::{GatewayError, Result};

struct QueuedMessage {
    seq: u64,
    payload: Bytes,
    delivery_count: u64,
}

struct Shared {
    ready: Mutex<VecDeque<QueuedMessage>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    notify: Notify,
    in_flight: AtomicU64,
    next_seq: AtomicU64,
    published: AtomicU64,
    acked: AtomicU64,
    reject_publish: AtomicBool,
}

impl Shared {
    async fn requeue(&self, message: QueuedMessage) {
        let mut ready = self.ready.lock().await;
        let at = ready.partition_point(|queued| queued.seq < message.seq);
        ready.insert(at, message);
        drop(ready);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.notify.notify_one();
    }
}

/// In-memory FIFO queue
#[derive(Clone)]
pub struct MemoryQueue {
    shared: Arc<Shared>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                ready: Mutex::new(VecDeque::new()),
                dead_letters: Mutex::new(Vec::new()),
                notify: Notify::new(),
                in_flight: AtomicU64::new(0),
                next_seq: AtomicU64::new(0),
                published: AtomicU64::new(0),
                acked: AtomicU64::new(0),
                reject_publish: AtomicBool::new(false),
            }),
        }
    }

    /// Messages waiting to be fetched
    pub async fn pending(&self) -> usize {
        self.shared.ready.lock().await.len()
    }

    /// Messages fetched but not yet settled
    pub fn in_flight(&self) -> u64 {
        self.shared.in_flight.load(Ordering::Relaxed)
    }

    /// Total messages accepted by `publish`
    pub fn published(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }

    /// Total messages acknowledged
    pub fn acked(&self) -> u64 {
        self.shared.acked.load(Ordering::Relaxed)
    }

    /// Snapshot of the dead-letter list
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.dead_letters.lock().await.clone()
    }

    /// Make `publish` fail, simulating an unreachable broker
    pub fn set_reject_publish(&self, reject: bool) {
        self.shared.reject_publish.store(reject, Ordering::Relaxed);
    }

    async fn take_batch(&self, max: usize) -> Vec<Delivery> {
        let mut ready = self.shared.ready.lock().await;
        let count = max.min(ready.len());

        ready
            .drain(..count)
            .map(|mut message| {
                message.delivery_count += 1;
                self.shared.in_flight.fetch_add(1, Ordering::Relaxed);
                Delivery::new(
                    message.payload.clone(),
                    message.delivery_count,
                    Box::new(MemoryAcker {
                        shared: Arc::clone(&self.shared),
                        message: Some(message),
                    }),
                )
            })
            .collect()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CommandQueue for MemoryQueue {
    async fn publish(&self, payload: Bytes) -> Result<()> {
        if self.shared.reject_publish.load(Ordering::Relaxed) {
            return Err(GatewayError::Queue("memory queue rejecting publishes".into()));
        }

        let mut ready = self.shared.ready.lock().await;
        ready.push_back(QueuedMessage {
            seq: self.shared.next_seq.fetch_add(1, Ordering::Relaxed),
            payload,
            delivery_count: 0,
        });
        drop(ready);
        self.shared.published.fetch_add(1, Ordering::Relaxed);
        self.shared.notify.notify_one();
        Ok(())
    }
}

#[async_trait::async_trait]
impl CommandSource for MemoryQueue {
    async fn fetch(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>> {
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.shared.notify.notified();

            let batch = self.take_batch(max).await;
            if !batch.is_empty() {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }
}

#[async_trait::async_trait]
impl DeadLetterSink for MemoryQueue {
    async fn dead_letter(&self, letter: DeadLetter) -> Result<()> {
        self.shared.dead_letters.lock().await.push(letter);
        Ok(())
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    message: Option<QueuedMessage>,
}

impl MemoryAcker {
    fn settle(&mut self) -> Option<QueuedMessage> {
        let message = self.message.take();
        if message.is_some() {
            self.shared.in_flight.fetch_sub(1, Ordering::Relaxed);
        }
        message
    }
}

#[async_trait::async_trait]
impl Acker for MemoryAcker {
    async fn ack(&mut self) -> Result<()> {
        if self.settle().is_some() {
            self.shared.acked.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn nak(&mut self, delay: Option<Duration>) -> Result<()> {
        let Some(message) = self.message.take() else {
            return Ok(());
        };

        match delay.filter(|d| !d.is_zero()) {
            Some(delay) => {
                debug!(delay_ms = delay.as_millis() as u64, "Scheduling redelivery");
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    shared.requeue(message).await;
                });
            }
            None => self.shared.requeue(message).await,
        }
        Ok(())
    }

    async fn term(&mut self) -> Result<()> {
        self.settle();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::DeadLetterReason;

    const WAIT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryQueue::new();
        for n in ["a", "b", "c"] {
            queue.publish(Bytes::from(n)).await.unwrap();
        }

        let batch = queue.fetch(10, WAIT).await.unwrap();
        let payloads: Vec<_> = batch.iter().map(|d| d.payload.clone()).collect();
        assert_eq!(payloads, vec!["a", "b", "c"]);
        assert!(batch.iter().all(|d| d.delivery_count == 1));
        assert_eq!(queue.in_flight(), 3);
    }

    #[tokio::test]
    async fn test_fetch_respects_max() {
        let queue = MemoryQueue::new();
        for n in ["a", "b", "c"] {
            queue.publish(Bytes::from(n)).await.unwrap();
        }

        assert_eq!(queue.fetch(2, WAIT).await.unwrap().len(), 2);
        assert_eq!(queue.pending().await, 1);
    }

    #[tokio::test]
    async fn test_fetch_empty_times_out() {
        let queue = MemoryQueue::new();
        let batch = queue.fetch(10, WAIT).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_wakes_on_publish() {
        let queue = MemoryQueue::new();
        let producer = queue.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.publish(Bytes::from("late")).await.unwrap();
        });

        let batch = queue.fetch(1, Duration::from_secs(2)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, "late");
    }

    #[tokio::test]
    async fn test_nak_redelivers_at_head() {
        let queue = MemoryQueue::new();
        queue.publish(Bytes::from("first")).await.unwrap();
        queue.publish(Bytes::from("second")).await.unwrap();

        let mut batch = queue.fetch(1, WAIT).await.unwrap();
        batch.remove(0).nak(None).await.unwrap();

        let batch = queue.fetch(1, WAIT).await.unwrap();
        assert_eq!(batch[0].payload, "first");
        assert_eq!(batch[0].delivery_count, 2);
    }

    #[tokio::test]
    async fn test_batch_handed_back_keeps_order() {
        let queue = MemoryQueue::new();
        for n in ["a", "b", "c", "d"] {
            queue.publish(Bytes::from(n)).await.unwrap();
        }

        let batch = queue.fetch(3, WAIT).await.unwrap();
        for delivery in batch.into_iter().rev() {
            delivery.nak(None).await.unwrap();
        }

        let batch = queue.fetch(10, WAIT).await.unwrap();
        let payloads: Vec<_> = batch.iter().map(|d| d.payload.clone()).collect();
        assert_eq!(payloads, vec!["a", "b", "c", "d"]);
        assert_eq!(batch[2].delivery_count, 2);
        assert_eq!(batch[3].delivery_count, 1);
    }

    #[tokio::test]
    async fn test_nak_with_delay() {
        let queue = MemoryQueue::new();
        queue.publish(Bytes::from("later")).await.unwrap();

        let mut batch = queue.fetch(1, WAIT).await.unwrap();
        batch
            .remove(0)
            .nak(Some(Duration::from_millis(30)))
            .await
            .unwrap();

        assert_eq!(queue.pending().await, 0);
        let batch = queue.fetch(1, Duration::from_secs(2)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].delivery_count, 2);
    }

    #[tokio::test]
    async fn test_ack_and_term_settle() {
        let queue = MemoryQueue::new();
        queue.publish(Bytes::from("a")).await.unwrap();
        queue.publish(Bytes::from("b")).await.unwrap();

        let mut batch = queue.fetch(2, WAIT).await.unwrap();
        tokio_test::assert_ok!(batch.remove(0).ack().await);
        tokio_test::assert_ok!(batch.remove(0).term().await);

        assert_eq!(queue.in_flight(), 0);
        assert_eq!(queue.acked(), 1);
        assert_eq!(queue.pending().await, 0);
    }

    #[tokio::test]
    async fn test_reject_publish() {
        let queue = MemoryQueue::new();
        queue.set_reject_publish(true);

        let err = queue.publish(Bytes::from("x")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Queue(_)));
        assert_eq!(queue.published(), 0);
    }

    #[tokio::test]
    async fn test_dead_letters_are_kept() {
        let queue = MemoryQueue::new();
        queue
            .dead_letter(DeadLetter::new(
                b"garbage",
                DeadLetterReason::Validation,
                "unknown operation",
                1,
                "w1",
            ))
            .await
            .unwrap();

        let letters = queue.dead_letters().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].payload, "garbage");
    }
}
