//! Review gateway - HTTP front door for reviews

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use review_gateway::{config::Args, logging, nats::NatsClient, server, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Review Gateway");
    info!("  cache-aside reads, queued writes");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("NATS: {}", args.nats.nats_url);
    info!("Command wire format: {:?}", args.command_wire_format);
    info!(
        "Version: {} ({})",
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown")
    );
    info!("======================================");

    // Connect to NATS (optional in dev mode)
    let nats = match NatsClient::new(&args.nats, &format!("review-gateway-{}", args.node_id)).await
    {
        Ok(client) => {
            info!("NATS connected successfully");
            Some(client)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("NATS connection failed (dev mode, using embedded processor): {}", e);
                None
            } else {
                error!("NATS connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let state = match nats {
        Some(nats) => AppState::distributed(args, nats)
            .await
            .context("Failed to set up command queue and read client")?,
        None => {
            let state = AppState::embedded(args);
            if let Some(processor) = state.processor.clone() {
                info!(
                    "Embedded processor enabled (apply delay {}ms)",
                    processor.config().apply_delay.as_millis()
                );
                tokio::spawn(async move {
                    if let Err(e) = processor.run().await {
                        error!("Embedded processor error: {}", e);
                    }
                });
            }
            state
        }
    };

    let state = Arc::new(state);

    tokio::select! {
        result = server::run(Arc::clone(&state)) => {
            result.context("HTTP server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    if let Some(processor) = &state.processor {
        processor.stop().await;
    }
    if let Some(nats) = &state.nats {
        if let Err(e) = nats.flush().await {
            warn!("Failed to flush NATS on shutdown: {}", e);
        }
    }

    info!("Review gateway shut down");
    Ok(())
}
