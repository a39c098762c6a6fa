//! JetStream command queue
//!
//! Commands are published to a work-queue stream on file storage and pulled by
//! a single shared durable consumer, so competing worker instances split the
//! messages between them. Dead letters go to a second stream.

use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, PullConsumer},
    stream::{RetentionPolicy, StorageType, Stream},
    AckKind,
};
use bytes::Bytes;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Acker, CommandQueue, CommandSource, DeadLetter, DeadLetterSink, Delivery};
use crate::nats::NatsClient;
use crate::types::{GatewayError, Result};

/// Stream holding pending commands
pub const STREAM_NAME: &str = "REVIEW_COMMANDS";
/// Subject commands are published on
pub const SUBJECT: &str = "review.command";
/// Stream capturing dead letters
pub const DEAD_LETTER_STREAM: &str = "REVIEW_DEAD_LETTERS";
/// Subject dead letters are published on
pub const DEAD_LETTER_SUBJECT: &str = "review.deadletter";
/// Durable consumer shared by all processors
pub const CONSUMER_NAME: &str = "review_processor";

/// Ensure the command stream exists
pub async fn ensure_command_stream(jetstream: &jetstream::Context) -> Result<Stream> {
    let stream = jetstream
        .get_or_create_stream(jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![SUBJECT.to_string()],
            retention: RetentionPolicy::WorkQueue,
            storage: StorageType::File,
            max_age: Duration::from_secs(7 * 24 * 3600), // 7 days
            ..Default::default()
        })
        .await
        .map_err(|e| GatewayError::Nats(format!("Failed to create stream: {}", e)))?;

    info!("Using stream {} with subject {}", STREAM_NAME, SUBJECT);
    Ok(stream)
}

/// Ensure the dead-letter stream exists
pub async fn ensure_dead_letter_stream(jetstream: &jetstream::Context) -> Result<Stream> {
    let stream = jetstream
        .get_or_create_stream(jetstream::stream::Config {
            name: DEAD_LETTER_STREAM.to_string(),
            subjects: vec![DEAD_LETTER_SUBJECT.to_string()],
            storage: StorageType::File,
            max_age: Duration::from_secs(30 * 24 * 3600), // 30 days
            ..Default::default()
        })
        .await
        .map_err(|e| GatewayError::Nats(format!("Failed to create dead-letter stream: {}", e)))?;

    info!(
        "Using stream {} with subject {}",
        DEAD_LETTER_STREAM, DEAD_LETTER_SUBJECT
    );
    Ok(stream)
}

/// Publishing side of the JetStream queue (also the dead-letter sink)
#[derive(Clone)]
pub struct JetStreamQueue {
    jetstream: jetstream::Context,
    publish_timeout: Duration,
}

impl JetStreamQueue {
    /// Connect to JetStream and make sure both streams exist
    pub async fn new(nats: &NatsClient, publish_timeout: Duration) -> Result<Self> {
        let jetstream = jetstream::new(nats.inner().clone());
        ensure_command_stream(&jetstream).await?;
        ensure_dead_letter_stream(&jetstream).await?;

        Ok(Self {
            jetstream,
            publish_timeout,
        })
    }

    /// Publish and wait for the server's PublishAck
    async fn publish_acked(&self, subject: &'static str, payload: Bytes) -> Result<()> {
        let publish = async {
            let ack = self
                .jetstream
                .publish(subject, payload)
                .await
                .map_err(|e| GatewayError::Queue(format!("Failed to publish: {}", e)))?
                .await
                .map_err(|e| GatewayError::Queue(format!("Failed to confirm publish: {}", e)))?;
            Ok::<_, GatewayError>(ack)
        };

        let ack = tokio::time::timeout(self.publish_timeout, publish)
            .await
            .map_err(|_| {
                GatewayError::Queue(format!(
                    "Publish to {} not confirmed within {}ms",
                    subject,
                    self.publish_timeout.as_millis()
                ))
            })??;

        debug!(subject, stream = %ack.stream, sequence = ack.sequence, "Publish confirmed");
        Ok(())
    }
}

#[async_trait::async_trait]
impl CommandQueue for JetStreamQueue {
    async fn publish(&self, payload: Bytes) -> Result<()> {
        self.publish_acked(SUBJECT, payload).await
    }
}

#[async_trait::async_trait]
impl DeadLetterSink for JetStreamQueue {
    async fn dead_letter(&self, letter: DeadLetter) -> Result<()> {
        let payload = serde_json::to_vec(&letter)
            .map_err(|e| GatewayError::Internal(format!("Failed to serialize dead letter: {}", e)))?;
        self.publish_acked(DEAD_LETTER_SUBJECT, payload.into()).await
    }
}

/// Consumer settings for the shared durable consumer
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Deliveries after which the processor dead-letters a message
    pub max_deliver: u64,
    /// Time the server waits for an ack before redelivering
    pub ack_wait: Duration,
    /// Upper bound on unacknowledged messages across all processors
    pub max_ack_pending: i64,
}

/// Pulling side of the JetStream queue
pub struct JetStreamSource {
    consumer: PullConsumer,
}

impl JetStreamSource {
    /// Bind to (or create) the shared durable consumer
    pub async fn new(nats: &NatsClient, settings: &ConsumerSettings) -> Result<Self> {
        let jetstream = jetstream::new(nats.inner().clone());
        let stream = ensure_command_stream(&jetstream).await?;

        let consumer = stream
            .get_or_create_consumer(
                CONSUMER_NAME,
                pull::Config {
                    durable_name: Some(CONSUMER_NAME.to_string()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: settings.ack_wait,
                    // The processor dead-letters at max_deliver; the server
                    // limit sits one above so that final delivery is observed.
                    max_deliver: settings.max_deliver as i64 + 1,
                    max_ack_pending: settings.max_ack_pending,
                    filter_subject: SUBJECT.to_string(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| GatewayError::Nats(format!("Failed to create consumer: {}", e)))?;

        info!("Using consumer {}", CONSUMER_NAME);
        Ok(Self { consumer })
    }
}

#[async_trait::async_trait]
impl CommandSource for JetStreamSource {
    async fn fetch(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(max)
            .expires(wait)
            .messages()
            .await
            .map_err(|e| GatewayError::Nats(format!("Failed to fetch messages: {}", e)))?;

        let mut batch = Vec::new();

        while let Some(msg_result) = messages.next().await {
            match msg_result {
                Ok(msg) => {
                    let delivery_count = msg
                        .info()
                        .map(|info| info.delivered.max(1) as u64)
                        .unwrap_or(1);
                    batch.push(Delivery::new(
                        msg.payload.clone(),
                        delivery_count,
                        Box::new(JetStreamAcker { msg }),
                    ));
                }
                Err(e) => {
                    warn!("Error receiving message: {}", e);
                }
            }
        }

        Ok(batch)
    }
}

struct JetStreamAcker {
    msg: jetstream::Message,
}

#[async_trait::async_trait]
impl Acker for JetStreamAcker {
    async fn ack(&mut self) -> Result<()> {
        self.msg
            .ack()
            .await
            .map_err(|e| GatewayError::Nats(format!("Failed to ack: {}", e)))
    }

    async fn nak(&mut self, delay: Option<Duration>) -> Result<()> {
        self.msg
            .ack_with(AckKind::Nak(delay))
            .await
            .map_err(|e| GatewayError::Nats(format!("Failed to nak: {}", e)))
    }

    async fn term(&mut self) -> Result<()> {
        self.msg
            .ack_with(AckKind::Term)
            .await
            .map_err(|e| GatewayError::Nats(format!("Failed to term: {}", e)))
    }
}
