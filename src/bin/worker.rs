//! Review worker - applies queued review commands
//!
//! Run one or more instances next to the store. Instances share a durable
//! JetStream consumer and split the commands between them. Each instance also
//! answers read requests from gateways unless SERVE_READS=false.
//!
//! Usage:
//!   review-worker --nats-url nats://localhost:4222 --mongodb-uri mongodb://localhost:27017
//!
//! Environment variables:
//!   NATS_URL - NATS server URL (default: nats://127.0.0.1:4222)
//!   MONGODB_URI - MongoDB connection URI (default: mongodb://localhost:27017)
//!   MONGODB_DB - Database name (default: reviewsdb)
//!   WORKER_ID - Unique worker identifier (default: auto-generated UUID)
//!   APPLY_DELAY_MS - Pause between dequeue and apply (default: 0)
//!   MAX_DELIVER - Deliveries before a failing command is dead-lettered (default: 5)

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use review_gateway::{
    cache::NatsInvalidator,
    config::NatsArgs,
    db::MongoClient,
    logging::{self, LogFormat},
    nats::NatsClient,
    queue::{jetstream::ConsumerSettings, JetStreamQueue, JetStreamSource},
    read::responder,
    store::{MemoryReviewStore, MongoReviewStore, ReviewStore},
    worker::{CommandProcessor, WorkerConfig},
};

#[derive(Parser, Debug)]
#[command(name = "review-worker")]
#[command(about = "Command processor and read responder for the review gateway")]
#[command(version)]
struct Args {
    /// Unique worker ID (auto-generated if not provided)
    #[arg(long, env = "WORKER_ID")]
    worker_id: Option<String>,

    /// NATS configuration
    #[command(flatten)]
    nats: NatsArgs,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "reviewsdb")]
    mongodb_db: String,

    /// MongoDB collection name
    #[arg(long, env = "MONGODB_COLLECTION", default_value = "reviews")]
    mongodb_collection: String,

    /// Keep reviews in memory instead of MongoDB (development only)
    #[arg(long, env = "MEMORY_STORE", default_value = "false")]
    memory_store: bool,

    /// Pause between dequeue and apply in milliseconds
    #[arg(long, env = "APPLY_DELAY_MS", default_value = "0")]
    apply_delay_ms: u64,

    /// Deliveries before a failing command is dead-lettered
    #[arg(long, env = "MAX_DELIVER", default_value = "5")]
    max_deliver: u64,

    /// Seconds the server waits for an ack before redelivering
    #[arg(long, env = "ACK_WAIT_SECS", default_value = "60")]
    ack_wait_secs: u64,

    /// Base redelivery backoff in milliseconds
    #[arg(long, env = "RETRY_BACKOFF_MS", default_value = "1000")]
    retry_backoff_ms: u64,

    /// Commands fetched per batch
    #[arg(long, env = "BATCH_SIZE", default_value = "10")]
    batch_size: usize,

    /// Upper bound on a single store call in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "5000")]
    store_timeout_ms: u64,

    /// Answer read requests from gateways
    #[arg(long, env = "SERVE_READS", default_value_t = true, action = clap::ArgAction::Set)]
    serve_reads: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Args {
    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            worker_id: self
                .worker_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            apply_delay: Duration::from_millis(self.apply_delay_ms),
            max_deliver: self.max_deliver,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            batch_size: self.batch_size,
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            ack_wait: Duration::from_secs(self.ack_wait_secs),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_format);

    let config = args.worker_config();
    config.validate().context("Invalid worker configuration")?;

    info!(
        "Starting review worker {} (NATS: {}, store: {})",
        config.worker_id,
        args.nats.nats_url,
        if args.memory_store {
            "memory".to_string()
        } else {
            format!("{}/{}", args.mongodb_db, args.mongodb_collection)
        }
    );

    let store: Arc<dyn ReviewStore> = if args.memory_store {
        warn!("Using in-memory store; reviews are lost on restart");
        Arc::new(MemoryReviewStore::new())
    } else {
        let mongo = MongoClient::new(&args.mongodb_uri, &args.mongodb_db)
            .await
            .context("Failed to connect to MongoDB")?;
        Arc::new(
            MongoReviewStore::new(&mongo, &args.mongodb_collection)
                .await
                .context("Failed to open review collection")?,
        )
    };

    let nats = NatsClient::new(&args.nats, &format!("review-worker-{}", config.worker_id))
        .await
        .context("Failed to connect to NATS")?;

    let dead_letters = JetStreamQueue::new(&nats, config.store_timeout)
        .await
        .context("Failed to set up command streams")?;

    let source = JetStreamSource::new(
        &nats,
        &ConsumerSettings {
            max_deliver: config.max_deliver,
            ack_wait: config.ack_wait,
            max_ack_pending: (config.batch_size * 2) as i64,
        },
    )
    .await
    .context("Failed to set up command consumer")?;

    if args.serve_reads {
        responder::serve(nats.clone(), Arc::clone(&store), config.store_timeout)
            .await
            .context("Failed to start read responder")?;
    }

    let invalidator = Arc::new(NatsInvalidator::new(nats.clone(), config.worker_id.clone()));

    let processor = Arc::new(CommandProcessor::new(
        config,
        Arc::new(source),
        store,
        invalidator,
        Arc::new(dead_letters),
    ));

    let mut worker_handle = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            if let Err(e) = processor.run().await {
                error!("Worker error: {}", e);
            }
        })
    };

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            processor.stop().await;
            // Let the current batch finish; unacked messages are redelivered
            if tokio::time::timeout(Duration::from_secs(30), &mut worker_handle).await.is_err() {
                warn!("Worker did not stop in time");
            }
        }
        result = &mut worker_handle => {
            if let Err(e) = result {
                error!("Worker task error: {}", e);
            }
        }
    }

    let stats = processor.stats();
    info!(
        applied = stats.applied,
        retried = stats.retried,
        dead_lettered = stats.dead_lettered,
        "Worker shutting down"
    );
    Ok(())
}
