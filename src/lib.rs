//! Review gateway - cache-aside reads and queued writes for reviews
//!
//! Reads are answered from a cache and fall back to an authoritative read
//! service. Writes are queued as commands and applied asynchronously by a
//! command processor, which makes the system eventually consistent.
//!
//! ## Components
//!
//! - **Gateway**: HTTP API, cache-aside reads, command publishing
//! - **Cache**: TTL cache with invalidation-guarded population
//! - **Queue**: JetStream (durable) or in-memory command queue
//! - **Worker**: command processor with retries and dead-lettering
//! - **Read**: read service over NATS request/reply or in-process
//! - **Store**: MongoDB or in-memory review storage

pub mod cache;
pub mod command;
pub mod config;
pub mod db;
pub mod gateway;
pub mod logging;
pub mod nats;
pub mod queue;
pub mod read;
pub mod routes;
pub mod server;
pub mod store;
pub mod types;
pub mod worker;

pub use config::Args;
pub use gateway::{Accepted, ReviewGateway, ReviewList};
pub use server::{run, serve, AppState};
pub use types::{GatewayError, Result, Review, ReviewInput};
