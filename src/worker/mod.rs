//! Command processing
//!
//! A processor pulls queued commands, applies them to the store and
//! invalidates the cache entries they made stale. It runs either as the
//! standalone `review-worker` binary (JetStream, MongoDB) or embedded in the
//! gateway in dev mode (memory queue and store).

pub mod processor;

pub use processor::{CommandProcessor, ProcessorStats, WorkerConfig};
