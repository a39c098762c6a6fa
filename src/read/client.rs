//! Read service over NATS request/reply

use tracing::debug;

use super::messages::{ReadReply, ReadRequest};
use super::ReadService;
use crate::nats::NatsClient;
use crate::types::{GatewayError, Result, Review};

/// Calls the worker's read responder; the request timeout is the client's
pub struct NatsReadClient {
    nats: NatsClient,
}

impl NatsReadClient {
    pub fn new(nats: NatsClient) -> Self {
        Self { nats }
    }

    async fn call(&self, request: ReadRequest) -> Result<ReadReply> {
        let payload = serde_json::to_vec(&request)
            .map_err(|e| GatewayError::Internal(format!("Failed to encode read request: {}", e)))?;

        let msg = self.nats.request(request.subject(), payload.into()).await?;

        let reply: ReadReply = serde_json::from_slice(&msg.payload).map_err(|e| {
            GatewayError::Unavailable(format!("Malformed reply on {}: {}", request.subject(), e))
        })?;

        match reply {
            ReadReply::Failed { error } => {
                debug!(error = %error, "Read responder reported failure");
                Err(GatewayError::Unavailable(error))
            }
            reply => Ok(reply),
        }
    }
}

#[async_trait::async_trait]
impl ReadService for NatsReadClient {
    async fn get_by_id(&self, id: &str) -> Result<Option<Review>> {
        match self.call(ReadRequest::Get { id: id.to_string() }).await? {
            ReadReply::Found { review } => Ok(Some(review)),
            ReadReply::NotFound => Ok(None),
            other => Err(GatewayError::Unavailable(format!(
                "Unexpected reply to get: {:?}",
                other
            ))),
        }
    }

    async fn get_all(&self) -> Result<Vec<Review>> {
        match self.call(ReadRequest::List).await? {
            ReadReply::Reviews { reviews } => Ok(reviews),
            other => Err(GatewayError::Unavailable(format!(
                "Unexpected reply to list: {:?}",
                other
            ))),
        }
    }
}
