//! Read RPC message types

use serde::{Deserialize, Serialize};

use crate::types::Review;

/// Subject for single-review lookups
pub const READ_GET_SUBJECT: &str = "review.read.get";
/// Subject for listing all reviews
pub const READ_LIST_SUBJECT: &str = "review.read.list";
/// Queue group shared by responders
pub const READ_QUEUE_GROUP: &str = "review-readers";

/// Request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadRequest {
    Get { id: String },
    List,
}

impl ReadRequest {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Get { .. } => READ_GET_SUBJECT,
            Self::List => READ_LIST_SUBJECT,
        }
    }
}

/// Reply body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReadReply {
    Found { review: Review },
    NotFound,
    Reviews { reviews: Vec<Review> },
    /// The responder could not reach its store
    Failed { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_wire_shape() {
        let json = serde_json::to_string(&ReadReply::NotFound).unwrap();
        assert_eq!(json, r#"{"status":"not_found"}"#);

        let json = serde_json::to_string(&ReadReply::Failed {
            error: "down".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"failed","error":"down"}"#);
    }

    #[test]
    fn test_request_subjects() {
        assert_eq!(ReadRequest::List.subject(), READ_LIST_SUBJECT);
        assert_eq!(
            ReadRequest::Get { id: "1".into() }.subject(),
            READ_GET_SUBJECT
        );
    }
}
