//! NATS messaging layer
//!
//! Carries the command queue (JetStream), the read RPC and cache
//! invalidation notices between gateway and worker.

pub mod client;

pub use client::NatsClient;
