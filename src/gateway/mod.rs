//! Gateway orchestrator
//!
//! Reads are served cache-aside: the cache first, the read service on a miss,
//! and the result written back. Writes are never applied here. They are
//! encoded as commands, published to the queue and acknowledged immediately;
//! the cache entries they make stale are invalidated at acceptance and again
//! by the processor once the command is applied.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{CacheKey, ReviewCache};
use crate::command::{encode, Command, CommandEnvelope, WireFormat};
use crate::queue::CommandQueue;
use crate::read::ReadService;
use crate::types::{GatewayError, Result, Review, ReviewInput};

/// Result of listing reviews
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewList {
    Reviews(Vec<Review>),
    /// The store holds no reviews (HTTP 204)
    Empty,
}

/// Acknowledgement that a write was queued (not applied)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accepted {
    /// Correlation id of the queued command; absent for the text wire format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<Uuid>,
    pub operation: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_id: Option<String>,
    pub status: &'static str,
}

/// Front door for review reads and writes
pub struct ReviewGateway {
    cache: Arc<ReviewCache>,
    reads: Arc<dyn ReadService>,
    queue: Arc<dyn CommandQueue>,
    wire: WireFormat,
}

impl ReviewGateway {
    pub fn new(
        cache: Arc<ReviewCache>,
        reads: Arc<dyn ReadService>,
        queue: Arc<dyn CommandQueue>,
        wire: WireFormat,
    ) -> Self {
        Self {
            cache,
            reads,
            queue,
            wire,
        }
    }

    pub fn cache(&self) -> &Arc<ReviewCache> {
        &self.cache
    }

    pub fn wire_format(&self) -> WireFormat {
        self.wire
    }

    /// Review by id. Not-found answers are never cached.
    pub async fn get(&self, id: &str) -> Result<Review> {
        if let Some(review) = self.cache.get_review(id).await {
            debug!(review_id = id, "Cache hit");
            return Ok(review);
        }

        debug!(review_id = id, "Cache miss");
        let ticket = self.cache.ticket(CacheKey::review(id));

        match self.reads.get_by_id(id).await? {
            Some(review) => {
                self.cache.put_review(ticket, &review).await;
                Ok(review)
            }
            None => Err(GatewayError::NotFound(format!("review {}", id))),
        }
    }

    /// All reviews. Empty collections are reported as such and never cached.
    pub async fn list(&self) -> Result<ReviewList> {
        if let Some(reviews) = self.cache.get_all().await {
            debug!(count = reviews.len(), "Cache hit for review collection");
            return Ok(ReviewList::Reviews(reviews));
        }

        debug!("Cache miss for review collection");
        let ticket = self.cache.ticket(CacheKey::AllReviews);
        let reviews = self.reads.get_all().await?;

        if reviews.is_empty() {
            return Ok(ReviewList::Empty);
        }

        self.cache.put_all(ticket, &reviews).await;
        Ok(ReviewList::Reviews(reviews))
    }

    /// Queue a create. `command_id` is the caller's idempotency key, if any.
    pub async fn create(&self, input: ReviewInput, command_id: Option<Uuid>) -> Result<Accepted> {
        let envelope = CommandEnvelope::with_id(
            Command::create(input),
            command_id.unwrap_or_else(Uuid::new_v4),
        );
        self.submit(envelope).await
    }

    /// Queue an update. Existence is not checked; updating a missing id is a
    /// no-op when applied.
    pub async fn update(&self, id: &str, input: ReviewInput) -> Result<Accepted> {
        self.submit(CommandEnvelope::new(Command::update(id, input)))
            .await
    }

    /// Queue a delete
    pub async fn delete(&self, id: &str) -> Result<Accepted> {
        self.submit(CommandEnvelope::new(Command::delete(id))).await
    }

    async fn submit(&self, envelope: CommandEnvelope) -> Result<Accepted> {
        let payload = encode(&envelope, self.wire)
            .map_err(|e| GatewayError::BadRequest(e.to_string()))?;

        self.queue.publish(payload).await.map_err(|e| match e {
            GatewayError::Queue(_) => e,
            other => GatewayError::Queue(other.to_string()),
        })?;

        let review_id = envelope.command.review_id().map(str::to_string);
        self.cache.invalidate_for(review_id.as_deref()).await;

        // The text line has no slot for the correlation id
        let command_id = match self.wire {
            WireFormat::Json => envelope.command_id,
            WireFormat::Text => None,
        };

        info!(
            operation = envelope.command.operation(),
            review_id = review_id.as_deref(),
            command_id = ?command_id,
            "Command accepted"
        );

        Ok(Accepted {
            command_id,
            operation: envelope.command.operation(),
            review_id,
            status: "accepted",
        })
    }
}
