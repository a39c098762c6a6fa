//! Database schemas

mod review;

pub use review::{ReviewDoc, REVIEW_COLLECTION};
