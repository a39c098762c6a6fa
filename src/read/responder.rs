//! Worker-side read responder
//!
//! Answers `review.read.*` requests from the store. Responders join a queue
//! group so each request is handled by exactly one worker.

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::{
    ReadReply, ReadRequest, READ_GET_SUBJECT, READ_LIST_SUBJECT, READ_QUEUE_GROUP,
};
use crate::nats::NatsClient;
use crate::store::ReviewStore;
use crate::types::Result;

/// Answer one request
pub async fn handle(store: &dyn ReviewStore, request: ReadRequest, timeout: Duration) -> ReadReply {
    let result = match request {
        ReadRequest::Get { id } => tokio::time::timeout(timeout, store.get_review(&id))
            .await
            .map(|r| {
                r.map(|found| match found {
                    Some(review) => ReadReply::Found { review },
                    None => ReadReply::NotFound,
                })
            }),
        ReadRequest::List => tokio::time::timeout(timeout, store.list_reviews())
            .await
            .map(|r| r.map(|reviews| ReadReply::Reviews { reviews })),
    };

    match result {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => ReadReply::Failed {
            error: e.to_string(),
        },
        Err(_) => ReadReply::Failed {
            error: format!("store read exceeded {}ms", timeout.as_millis()),
        },
    }
}

/// Subscribe to both read subjects and answer from `store`
pub async fn serve(
    nats: NatsClient,
    store: Arc<dyn ReviewStore>,
    timeout: Duration,
) -> Result<JoinHandle<()>> {
    let gets = nats.queue_subscribe(READ_GET_SUBJECT, READ_QUEUE_GROUP).await?;
    let lists = nats
        .queue_subscribe(READ_LIST_SUBJECT, READ_QUEUE_GROUP)
        .await?;
    let mut requests = futures::stream::select(gets, lists);

    info!(
        "Serving reads on {} and {} (group {})",
        READ_GET_SUBJECT, READ_LIST_SUBJECT, READ_QUEUE_GROUP
    );

    Ok(tokio::spawn(async move {
        while let Some(msg) = requests.next().await {
            let Some(reply_to) = msg.reply.clone() else {
                debug!(subject = %msg.subject, "Read request without reply subject");
                continue;
            };

            let nats = nats.clone();
            let store = Arc::clone(&store);

            tokio::spawn(async move {
                let reply = match serde_json::from_slice::<ReadRequest>(&msg.payload) {
                    Ok(request) => handle(store.as_ref(), request, timeout).await,
                    Err(e) => ReadReply::Failed {
                        error: format!("malformed read request: {}", e),
                    },
                };

                let payload = match serde_json::to_vec(&reply) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Failed to serialize read reply: {}", e);
                        return;
                    }
                };

                if let Err(e) = nats.inner().publish(reply_to, payload.into()).await {
                    warn!("Failed to publish read reply: {}", e);
                }
            });
        }
        warn!("Read subscriptions closed");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryReviewStore;
    use crate::types::ReviewInput;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_handle_get_and_list() {
        let store = MemoryReviewStore::new();
        let id = store
            .create_review(None, ReviewInput::new("bob", 3, "ok"))
            .await
            .unwrap();

        match handle(&store, ReadRequest::Get { id: id.clone() }, TIMEOUT).await {
            ReadReply::Found { review } => assert_eq!(review.id, id),
            other => panic!("unexpected reply: {:?}", other),
        }

        assert_eq!(
            handle(&store, ReadRequest::Get { id: "nope".into() }, TIMEOUT).await,
            ReadReply::NotFound
        );

        match handle(&store, ReadRequest::List, TIMEOUT).await {
            ReadReply::Reviews { reviews } => assert_eq!(reviews.len(), 1),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handle_store_failure() {
        let store = MemoryReviewStore::new();
        store.set_unavailable(true);

        let reply = handle(&store, ReadRequest::List, TIMEOUT).await;
        assert!(matches!(reply, ReadReply::Failed { .. }));
    }
}
