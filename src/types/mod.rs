//! Shared types for the review gateway

pub mod error;
pub mod review;

pub use error::{GatewayError, Result};
pub use review::{Review, ReviewInput};
