//! NATS client wrapper
//!
//! Provides connection management with reconnection, credentials and
//! request/response calls bounded by a timeout.

use async_nats::client::RequestErrorKind;
use async_nats::connection::State;
use async_nats::{Client, ConnectOptions};
use bytes::Bytes;
use std::time::Duration;
use tracing::info;

use crate::config::NatsArgs;
use crate::types::GatewayError;

/// Default request timeout for RPC-style calls
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// NATS client wrapper shared by the gateway and the worker
#[derive(Clone)]
pub struct NatsClient {
    /// Underlying NATS client
    client: Client,
    /// Request timeout for RPC calls
    request_timeout: Duration,
    /// Client name for logging
    name: String,
}

impl NatsClient {
    /// Connect to NATS
    pub async fn new(args: &NatsArgs, name: &str) -> Result<Self, GatewayError> {
        info!("Connecting to NATS at {}", args.nats_url);

        // No retry_on_initial_connect(): fail fast so dev mode can fall back.
        // Reconnection still applies after the first successful connect.
        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| GatewayError::Nats(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);

        Ok(Self {
            client,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            name: name.to_string(),
        })
    }

    /// Set the request timeout for RPC calls
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Get the underlying NATS client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Publish a message to a subject (fire-and-forget, core NATS)
    pub async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), GatewayError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| GatewayError::Nats(format!("Publish failed: {}", e)))
    }

    /// Request/response with timeout
    ///
    /// A missing responder is reported as `Unavailable`, an expired deadline as
    /// `Timeout`, so callers can tell both apart from an empty answer.
    pub async fn request(
        &self,
        subject: &str,
        payload: Bytes,
    ) -> Result<async_nats::Message, GatewayError> {
        let response = tokio::time::timeout(
            self.request_timeout,
            self.client.request(subject.to_string(), payload),
        )
        .await
        .map_err(|_| GatewayError::Timeout(format!("Request to {} timed out", subject)))?;

        response.map_err(|e| match e.kind() {
            RequestErrorKind::NoResponders => {
                GatewayError::Unavailable(format!("No responders on {}", subject))
            }
            RequestErrorKind::TimedOut => {
                GatewayError::Timeout(format!("Request to {} timed out", subject))
            }
            RequestErrorKind::Other => GatewayError::Unavailable(format!("Request failed: {}", e)),
        })
    }

    /// Subscribe to a subject
    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber, GatewayError> {
        self.client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| GatewayError::Nats(format!("Subscribe failed: {}", e)))
    }

    /// Subscribe as part of a queue group (load-balanced between members)
    pub async fn queue_subscribe(
        &self,
        subject: &str,
        group: &str,
    ) -> Result<async_nats::Subscriber, GatewayError> {
        self.client
            .queue_subscribe(subject.to_string(), group.to_string())
            .await
            .map_err(|e| GatewayError::Nats(format!("Queue subscribe failed: {}", e)))
    }

    /// Flush pending messages
    pub async fn flush(&self) -> Result<(), GatewayError> {
        self.client
            .flush()
            .await
            .map_err(|e| GatewayError::Nats(format!("Flush failed: {}", e)))
    }

    /// Whether the connection is currently up
    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == State::Connected
    }

    /// Get the client name
    pub fn name(&self) -> &str {
        &self.name
    }
}
