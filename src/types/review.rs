//! Review entity and request payloads

use serde::{Deserialize, Serialize};

/// A review as stored by the authoritative store
///
/// Every component outside the store holds a copy, never a reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Store-assigned identifier, immutable after creation
    pub id: String,
    pub client: String,
    pub rating: i32,
    pub comment: String,
}

impl Review {
    /// Build a review from an assigned id and the submitted fields
    pub fn from_input(id: impl Into<String>, input: ReviewInput) -> Self {
        Self {
            id: id.into(),
            client: input.client,
            rating: input.rating,
            comment: input.comment,
        }
    }
}

/// Body of create and update requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewInput {
    pub client: String,
    pub rating: i32,
    pub comment: String,
}

impl ReviewInput {
    pub fn new(client: impl Into<String>, rating: i32, comment: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            rating,
            comment: comment.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_must_be_integer() {
        let ok: ReviewInput =
            serde_json::from_str(r#"{"client":"alice","rating":5,"comment":"great"}"#).unwrap();
        assert_eq!(ok.rating, 5);

        let bad = serde_json::from_str::<ReviewInput>(
            r#"{"client":"alice","rating":"five","comment":"great"}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_from_input() {
        let review = Review::from_input("abc", ReviewInput::new("bob", 3, "ok"));
        assert_eq!(review.id, "abc");
        assert_eq!(review.client, "bob");
        assert_eq!(review.rating, 3);
    }
}
