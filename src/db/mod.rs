//! MongoDB access
//!
//! Typed collection wrapper plus document schemas.

pub mod mongo;
pub mod schemas;

pub use mongo::{IntoIndexes, MongoClient, MongoCollection};
