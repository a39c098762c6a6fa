//! Command processor - applies queued review commands
//!
//! Per delivery: decode, wait out the apply delay, apply to the store, then
//! invalidate and acknowledge. Undecodable payloads are dead-lettered at once.
//! A store failure ends the batch: the failed delivery and everything fetched
//! after it are handed back to the queue in order, and the processor pauses
//! for the backoff before fetching again. After `max_deliver` deliveries a
//! failing command is dead-lettered. No single message can stop the loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::cache::CacheInvalidator;
use crate::command::{decode, Command, CommandEnvelope};
use crate::queue::{CommandSource, DeadLetter, DeadLetterReason, DeadLetterSink, Delivery};
use crate::store::ReviewStore;
use crate::types::{GatewayError, Result, ReviewInput};

/// Longest pause between redeliveries of a failing command
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// Processor configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker ID, recorded on dead letters
    pub worker_id: String,
    /// Pause between dequeue and apply
    pub apply_delay: Duration,
    /// Deliveries after which a failing command is dead-lettered
    pub max_deliver: u64,
    /// Base delay before a failed command is redelivered
    pub retry_backoff: Duration,
    /// Deliveries fetched per batch
    pub batch_size: usize,
    /// How long an empty fetch waits for messages
    pub fetch_wait: Duration,
    /// Upper bound on a single store mutation
    pub store_timeout: Duration,
    /// Server-side redelivery timer for unacknowledged messages
    pub ack_wait: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            apply_delay: Duration::ZERO,
            max_deliver: 5,
            retry_backoff: Duration::from_secs(1),
            batch_size: 10,
            fetch_wait: Duration::from_secs(5),
            store_timeout: Duration::from_secs(5),
            ack_wait: Duration::from_secs(60),
        }
    }
}

impl WorkerConfig {
    /// Check settings that would otherwise fail at runtime
    pub fn validate(&self) -> Result<()> {
        if self.max_deliver == 0 {
            return Err(GatewayError::Config("max_deliver must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(GatewayError::Config("batch_size must be at least 1".into()));
        }
        // The last delivery of a batch waits for every earlier one. If that
        // outlasts ack_wait the server redelivers it while it is still held.
        let hold = self.max_batch_hold();
        if self.ack_wait <= hold {
            return Err(GatewayError::Config(format!(
                "ack_wait ({}ms) must exceed batch_size x (apply_delay + store_timeout) ({}ms); \
                 lower BATCH_SIZE or raise ACK_WAIT_SECS",
                self.ack_wait.as_millis(),
                hold.as_millis()
            )));
        }
        Ok(())
    }

    /// Longest time a fetched delivery can stay unsettled
    pub fn max_batch_hold(&self) -> Duration {
        let per_delivery = self.apply_delay.saturating_add(self.store_timeout);
        let batch = u32::try_from(self.batch_size).unwrap_or(u32::MAX);
        per_delivery.saturating_mul(batch)
    }

    /// Redelivery delay after the given failed delivery
    fn backoff_for(&self, delivery_count: u64) -> Duration {
        let factor = u32::try_from(delivery_count.max(1)).unwrap_or(u32::MAX);
        self.retry_backoff
            .saturating_mul(factor)
            .min(MAX_RETRY_BACKOFF)
    }
}

/// Result of one attempt at a delivery
enum Attempt {
    /// Acked or terminated
    Settled,
    /// Still held; must be handed back before anything fetched after it
    Failed { delivery: Delivery, backoff: Duration },
}

/// Counters since start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ProcessorStats {
    pub applied: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

#[derive(Default)]
struct Counters {
    applied: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Consumer loop applying commands to the store
pub struct CommandProcessor {
    config: WorkerConfig,
    source: Arc<dyn CommandSource>,
    store: Arc<dyn ReviewStore>,
    invalidator: Arc<dyn CacheInvalidator>,
    dead_letters: Arc<dyn DeadLetterSink>,
    running: Arc<RwLock<bool>>,
    counters: Counters,
}

impl CommandProcessor {
    pub fn new(
        config: WorkerConfig,
        source: Arc<dyn CommandSource>,
        store: Arc<dyn ReviewStore>,
        invalidator: Arc<dyn CacheInvalidator>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            config,
            source,
            store,
            invalidator,
            dead_letters,
            running: Arc::new(RwLock::new(false)),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run the processing loop until [`stop`](Self::stop) is called
    pub async fn run(&self) -> Result<()> {
        *self.running.write().await = true;

        info!(
            "Worker {} starting command processing loop",
            self.config.worker_id
        );

        while *self.running.read().await {
            match self.run_once().await {
                Ok(count) => {
                    if count > 0 {
                        debug!("Processed {} commands", count);
                    }
                }
                Err(e) => {
                    error!("Error processing batch: {}", e);
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
            }
        }

        info!("Worker {} stopped", self.config.worker_id);
        Ok(())
    }

    /// Stop the loop after the current batch
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Fetch one batch and process it in dequeue order. Returns the batch size.
    ///
    /// Stops at the first failed apply: that delivery and the rest of the
    /// batch are nak'ed without delay, oldest first, and the processor sleeps
    /// out the backoff before returning. Later commands never overtake an
    /// earlier one for the same review.
    pub async fn run_once(&self) -> Result<usize> {
        let batch = self
            .source
            .fetch(self.config.batch_size, self.config.fetch_wait)
            .await?;
        let count = batch.len();

        let mut remaining = batch.into_iter();
        while let Some(delivery) = remaining.next() {
            let Attempt::Failed { delivery, backoff } = self.attempt(delivery).await else {
                continue;
            };

            self.counters.retried.fetch_add(1, Ordering::Relaxed);
            let held: Vec<Delivery> = std::iter::once(delivery).chain(remaining.by_ref()).collect();
            debug!(returned = held.len(), "Returning unapplied deliveries to the queue");
            for delivery in held {
                if let Err(e) = delivery.nak(None).await {
                    // The server redelivers after ack_wait anyway
                    warn!("Failed to nak command: {}", e);
                }
            }

            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }
            break;
        }

        Ok(count)
    }

    async fn attempt(&self, delivery: Delivery) -> Attempt {
        let envelope = match decode(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    delivery_count = delivery.delivery_count,
                    error = %e,
                    "Undecodable command"
                );
                return self
                    .give_up(delivery, DeadLetterReason::Validation, e.to_string())
                    .await;
            }
        };

        if !self.config.apply_delay.is_zero() {
            tokio::time::sleep(self.config.apply_delay).await;
        }

        let applied = tokio::time::timeout(self.config.store_timeout, self.apply(&envelope))
            .await
            .unwrap_or_else(|_| {
                Err(GatewayError::Timeout(format!(
                    "store call exceeded {}ms",
                    self.config.store_timeout.as_millis()
                )))
            });

        match applied {
            Ok(()) => {
                self.invalidator
                    .invalidate_applied(envelope.command.review_id(), envelope.command_id)
                    .await;

                if let Err(e) = delivery.ack().await {
                    // Redelivery re-applies an idempotent command
                    warn!(command_id = ?envelope.command_id, "Failed to ack applied command: {}", e);
                }
                self.counters.applied.fetch_add(1, Ordering::Relaxed);
                Attempt::Settled
            }
            Err(e) if delivery.delivery_count >= self.config.max_deliver => {
                self.give_up(delivery, DeadLetterReason::RetriesExhausted, e.to_string())
                    .await
            }
            Err(e) => {
                let backoff = self.config.backoff_for(delivery.delivery_count);
                warn!(
                    command_id = ?envelope.command_id,
                    delivery_count = delivery.delivery_count,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Apply failed, scheduling redelivery"
                );
                Attempt::Failed { delivery, backoff }
            }
        }
    }

    async fn apply(&self, envelope: &CommandEnvelope) -> Result<()> {
        let command_id = envelope.command_id;

        match &envelope.command {
            Command::Create {
                client,
                rating,
                comment,
            } => {
                let correlation = envelope.correlation();
                let id = self
                    .store
                    .create_review(
                        correlation.as_deref(),
                        ReviewInput::new(client.as_str(), *rating, comment.as_str()),
                    )
                    .await?;
                info!(review_id = %id, command_id = ?command_id, "Applied CREATE");
            }
            Command::Update {
                id,
                client,
                rating,
                comment,
            } => {
                let found = self
                    .store
                    .update_review(
                        id,
                        ReviewInput::new(client.as_str(), *rating, comment.as_str()),
                    )
                    .await?;
                if found {
                    info!(review_id = %id, command_id = ?command_id, "Applied UPDATE");
                } else {
                    info!(review_id = %id, command_id = ?command_id, "UPDATE for missing review ignored");
                }
            }
            Command::Delete { id } => {
                let found = self.store.delete_review(id).await?;
                if found {
                    info!(review_id = %id, command_id = ?command_id, "Applied DELETE");
                } else {
                    info!(review_id = %id, command_id = ?command_id, "DELETE for missing review ignored");
                }
            }
        }

        Ok(())
    }

    async fn give_up(&self, delivery: Delivery, reason: DeadLetterReason, error: String) -> Attempt {
        let letter = DeadLetter::new(
            &delivery.payload,
            reason,
            error,
            delivery.delivery_count,
            self.config.worker_id.as_str(),
        );

        error!(
            reason = %reason,
            delivery_count = delivery.delivery_count,
            error = %letter.error,
            payload = %letter.payload,
            "Dead-lettering command"
        );

        if let Err(e) = self.dead_letters.dead_letter(letter).await {
            // Keep the message rather than lose it
            error!("Failed to dead-letter command: {}", e);
            return Attempt::Failed {
                delivery,
                backoff: self.config.retry_backoff,
            };
        }

        if let Err(e) = delivery.term().await {
            warn!("Failed to terminate dead-lettered command: {}", e);
        }
        self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
        Attempt::Settled
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            applied: self.counters.applied.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{encode, WireFormat};
    use crate::queue::{CommandQueue, MemoryQueue};
    use crate::store::MemoryReviewStore;
    use bytes::Bytes;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingInvalidator {
        calls: Mutex<Vec<Option<String>>>,
    }

    #[async_trait::async_trait]
    impl CacheInvalidator for RecordingInvalidator {
        async fn invalidate_applied(&self, review_id: Option<&str>, _: Option<uuid::Uuid>) {
            self.calls.lock().await.push(review_id.map(str::to_string));
        }
    }

    struct Fixture {
        processor: CommandProcessor,
        queue: MemoryQueue,
        store: Arc<MemoryReviewStore>,
        invalidator: Arc<RecordingInvalidator>,
    }

    fn fixture(config: WorkerConfig) -> Fixture {
        let queue = MemoryQueue::new();
        let store = Arc::new(MemoryReviewStore::new());
        let invalidator = Arc::new(RecordingInvalidator::default());
        let processor = CommandProcessor::new(
            config,
            Arc::new(queue.clone()),
            store.clone(),
            invalidator.clone(),
            Arc::new(queue.clone()),
        );
        Fixture {
            processor,
            queue,
            store,
            invalidator,
        }
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            worker_id: "test-worker".into(),
            retry_backoff: Duration::ZERO,
            fetch_wait: Duration::from_millis(20),
            ..Default::default()
        }
    }

    async fn publish(queue: &MemoryQueue, command: Command) {
        let payload = encode(&CommandEnvelope::new(command), WireFormat::Json).unwrap();
        queue.publish(payload).await.unwrap();
    }

    #[test]
    fn test_validate() {
        assert!(WorkerConfig::default().validate().is_ok());

        let config = WorkerConfig {
            apply_delay: Duration::from_secs(20),
            ack_wait: Duration::from_secs(20),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(GatewayError::Config(_))));

        let config = WorkerConfig {
            max_deliver: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_counts_whole_batch_against_ack_wait() {
        let slow = WorkerConfig {
            apply_delay: Duration::from_secs(20),
            ack_wait: Duration::from_secs(60),
            batch_size: 10,
            ..Default::default()
        };
        assert_eq!(slow.max_batch_hold(), Duration::from_secs(250));
        assert!(matches!(slow.validate(), Err(GatewayError::Config(_))));

        let one_at_a_time = WorkerConfig {
            batch_size: 1,
            ..slow
        };
        tokio_test::assert_ok!(one_at_a_time.validate());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = WorkerConfig::default();
        assert_eq!(config.backoff_for(1), Duration::from_secs(1));
        assert_eq!(config.backoff_for(3), Duration::from_secs(3));
        assert_eq!(config.backoff_for(1000), MAX_RETRY_BACKOFF);
    }

    #[tokio::test]
    async fn test_applies_create_and_invalidates() {
        let f = fixture(fast_config());
        publish(
            &f.queue,
            Command::create(ReviewInput::new("alice", 5, "great")),
        )
        .await;

        assert_eq!(f.processor.run_once().await.unwrap(), 1);

        let reviews = f.store.list_reviews().await.unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].client, "alice");
        assert_eq!(*f.invalidator.calls.lock().await, vec![None]);
        assert_eq!(f.queue.acked(), 1);
        assert_eq!(f.processor.stats().applied, 1);
    }

    #[tokio::test]
    async fn test_legacy_text_line_is_applied() {
        let f = fixture(fast_config());
        f.queue
            .publish(Bytes::from("CREATE:bob,4,solid"))
            .await
            .unwrap();

        f.processor.run_once().await.unwrap();

        let reviews = f.store.list_reviews().await.unwrap();
        assert_eq!(reviews[0].rating, 4);
    }

    #[tokio::test]
    async fn test_malformed_is_dead_lettered_and_loop_continues() {
        let f = fixture(fast_config());
        f.queue
            .publish(Bytes::from("CREATE:alice,five,great"))
            .await
            .unwrap();
        for n in 0..3 {
            publish(
                &f.queue,
                Command::create(ReviewInput::new(format!("c{}", n), 3, "ok")),
            )
            .await;
        }

        assert_eq!(f.processor.run_once().await.unwrap(), 4);

        assert_eq!(f.store.len().await, 3);
        let letters = f.queue.dead_letters().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].reason, DeadLetterReason::Validation);
        assert_eq!(letters[0].worker_id, "test-worker");
        assert_eq!(f.queue.pending().await, 0);
    }

    #[tokio::test]
    async fn test_update_missing_is_acked() {
        let f = fixture(fast_config());
        publish(
            &f.queue,
            Command::update("missing", ReviewInput::new("a", 1, "b")),
        )
        .await;

        f.processor.run_once().await.unwrap();

        assert!(f.store.is_empty().await);
        assert_eq!(f.queue.acked(), 1);
        assert!(f.queue.dead_letters().await.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_retries_then_dead_letters() {
        let config = WorkerConfig {
            max_deliver: 3,
            ..fast_config()
        };
        let f = fixture(config);
        f.store.set_unavailable(true);
        publish(&f.queue, Command::delete("r1")).await;

        for _ in 0..3 {
            assert_eq!(f.processor.run_once().await.unwrap(), 1);
        }

        let stats = f.processor.stats();
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.dead_lettered, 1);

        let letters = f.queue.dead_letters().await;
        assert_eq!(letters[0].reason, DeadLetterReason::RetriesExhausted);
        assert_eq!(letters[0].delivery_count, 3);
        assert!(f.invalidator.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let f = fixture(fast_config());
        f.store.fail_next(1);
        publish(&f.queue, Command::create(ReviewInput::new("a", 2, "b"))).await;

        f.processor.run_once().await.unwrap();
        assert!(f.store.is_empty().await);

        f.processor.run_once().await.unwrap();
        assert_eq!(f.store.len().await, 1);
        assert_eq!(f.processor.stats().retried, 1);
    }

    #[tokio::test]
    async fn test_failed_apply_does_not_let_later_update_overtake() {
        let f = fixture(fast_config());
        let id = f
            .store
            .create_review(None, ReviewInput::new("alice", 3, "original"))
            .await
            .unwrap();

        publish(&f.queue, Command::update(id.as_str(), ReviewInput::new("alice", 4, "first"))).await;
        publish(&f.queue, Command::update(id.as_str(), ReviewInput::new("alice", 5, "second"))).await;
        f.store.fail_next(1);

        assert_eq!(f.processor.run_once().await.unwrap(), 2);
        assert_eq!(f.queue.pending().await, 2);
        assert_eq!(f.queue.in_flight(), 0);
        let review = f.store.get_review(&id).await.unwrap().unwrap();
        assert_eq!(review.comment, "original");

        assert_eq!(f.processor.run_once().await.unwrap(), 2);
        let review = f.store.get_review(&id).await.unwrap().unwrap();
        assert_eq!(review.comment, "second");
        assert_eq!(review.rating, 5);

        let stats = f.processor.stats();
        assert_eq!((stats.applied, stats.retried), (2, 1));
    }

    #[tokio::test]
    async fn test_redelivered_create_is_applied_once() {
        let f = fixture(fast_config());
        let envelope = CommandEnvelope::new(Command::create(ReviewInput::new("a", 5, "x")));
        let payload = encode(&envelope, WireFormat::Json).unwrap();

        f.queue.publish(payload.clone()).await.unwrap();
        f.queue.publish(payload).await.unwrap();
        f.processor.run_once().await.unwrap();

        assert_eq!(f.store.len().await, 1);
        assert_eq!(f.processor.stats().applied, 2);
    }

    #[tokio::test]
    async fn test_stop_ends_run() {
        let f = Arc::new(fixture(fast_config()));
        let runner = {
            let f = Arc::clone(&f);
            tokio::spawn(async move { f.processor.run().await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(f.processor.is_running().await);
        f.processor.stop().await;

        let result = tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .unwrap()
            .unwrap();
        tokio_test::assert_ok!(result);
    }
}
