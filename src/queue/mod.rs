//! Command queue
//!
//! Writes leave the gateway as queued commands and are applied later by a
//! command processor. Delivery is at-least-once: a delivery stays pending
//! until it is acknowledged, negatively acknowledged (redelivered) or
//! terminated.
//!
//! Two implementations:
//! - **JetStream** ([`jetstream`]): durable, shared between processes
//! - **Memory** ([`memory`]): in-process, used in dev mode and tests

pub mod jetstream;
pub mod memory;

pub use self::jetstream::{
    JetStreamQueue, JetStreamSource, CONSUMER_NAME, DEAD_LETTER_STREAM, DEAD_LETTER_SUBJECT,
    STREAM_NAME, SUBJECT,
};
pub use memory::MemoryQueue;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::types::Result;

/// Producer side: enqueue an encoded command
#[async_trait::async_trait]
pub trait CommandQueue: Send + Sync {
    /// Returns once the queue has accepted the message
    async fn publish(&self, payload: Bytes) -> Result<()>;
}

/// Consumer side: pull deliveries
#[async_trait::async_trait]
pub trait CommandSource: Send + Sync {
    /// Fetch up to `max` deliveries, waiting at most `wait` for the first one.
    /// An empty batch is not an error.
    async fn fetch(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>>;
}

/// Destination for messages that cannot be applied
#[async_trait::async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, letter: DeadLetter) -> Result<()>;
}

/// Settles a single delivery
#[async_trait::async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&mut self) -> Result<()>;
    async fn nak(&mut self, delay: Option<Duration>) -> Result<()>;
    async fn term(&mut self) -> Result<()>;
}

/// A message handed to a consumer
pub struct Delivery {
    /// Encoded command
    pub payload: Bytes,
    /// 1 on first delivery, incremented on every redelivery
    pub delivery_count: u64,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(payload: Bytes, delivery_count: u64, acker: Box<dyn Acker>) -> Self {
        Self {
            payload,
            delivery_count,
            acker,
        }
    }

    /// Message was applied; never deliver it again
    pub async fn ack(mut self) -> Result<()> {
        self.acker.ack().await
    }

    /// Message failed; deliver it again after `delay`
    pub async fn nak(mut self, delay: Option<Duration>) -> Result<()> {
        self.acker.nak(delay).await
    }

    /// Message can never succeed; drop it without redelivery
    pub async fn term(mut self) -> Result<()> {
        self.acker.term().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("payload", &String::from_utf8_lossy(&self.payload))
            .field("delivery_count", &self.delivery_count)
            .finish()
    }
}

/// Why a message was dead-lettered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Payload could not be decoded into a command
    Validation,
    /// Store kept failing until the delivery limit
    RetriesExhausted,
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::RetriesExhausted => write!(f, "retries_exhausted"),
        }
    }
}

/// Record kept for a message that was given up on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Original payload, lossy UTF-8
    pub payload: String,
    pub reason: DeadLetterReason,
    pub error: String,
    pub delivery_count: u64,
    pub worker_id: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        payload: &[u8],
        reason: DeadLetterReason,
        error: impl Into<String>,
        delivery_count: u64,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            payload: String::from_utf8_lossy(payload).into_owned(),
            reason,
            error: error.into(),
            delivery_count,
            worker_id: worker_id.into(),
            dead_lettered_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_serialization() {
        let letter = DeadLetter::new(
            b"CREATE:alice,five,great",
            DeadLetterReason::Validation,
            "invalid rating",
            1,
            "worker-1",
        );

        let json = serde_json::to_value(&letter).unwrap();
        assert_eq!(json["reason"], "validation");
        assert_eq!(json["payload"], "CREATE:alice,five,great");
        assert_eq!(json["delivery_count"], 1);
    }

    #[test]
    fn test_dead_letter_lossy_payload() {
        let letter = DeadLetter::new(
            &[0xff, b'x'],
            DeadLetterReason::RetriesExhausted,
            "store down",
            5,
            "w",
        );
        assert!(letter.payload.ends_with('x'));
        assert_eq!(letter.reason.to_string(), "retries_exhausted");
    }
}
