//! Write intents carried through the command queue
//!
//! A [`Command`] never carries enough information to detect conflicting
//! concurrent commands on the same review id. Ordering comes from the queue.

pub mod codec;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ReviewInput;

pub use codec::{decode, encode, CommandError, WireFormat};

/// A write intent for the review store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Create {
        client: String,
        rating: i32,
        comment: String,
    },
    Update {
        id: String,
        client: String,
        rating: i32,
        comment: String,
    },
    Delete {
        id: String,
    },
}

impl Command {
    pub fn create(input: ReviewInput) -> Self {
        Self::Create {
            client: input.client,
            rating: input.rating,
            comment: input.comment,
        }
    }

    pub fn update(id: impl Into<String>, input: ReviewInput) -> Self {
        Self::Update {
            id: id.into(),
            client: input.client,
            rating: input.rating,
            comment: input.comment,
        }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Self::Delete { id: id.into() }
    }

    /// Operation name as it appears on the wire
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Create { .. } => "CREATE",
            Self::Update { .. } => "UPDATE",
            Self::Delete { .. } => "DELETE",
        }
    }

    /// Review id targeted by this command (None for creates)
    pub fn review_id(&self) -> Option<&str> {
        match self {
            Self::Create { .. } => None,
            Self::Update { id, .. } | Self::Delete { id } => Some(id),
        }
    }
}

/// Command plus delivery-independent metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Correlation token, used by stores to deduplicate redelivered creates.
    /// Absent for commands decoded from the legacy text line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub command: Command,
}

impl CommandEnvelope {
    /// Wrap a command with a fresh correlation id
    pub fn new(command: Command) -> Self {
        Self::with_id(command, Uuid::new_v4())
    }

    /// Wrap a command with a caller-chosen correlation id
    pub fn with_id(command: Command, command_id: Uuid) -> Self {
        Self {
            command_id: Some(command_id),
            issued_at: Some(Utc::now()),
            command,
        }
    }

    /// Envelope for a command that arrived without metadata
    pub fn bare(command: Command) -> Self {
        Self {
            command_id: None,
            issued_at: None,
            command,
        }
    }

    /// Correlation id as a string, for stores and logs
    pub fn correlation(&self) -> Option<String> {
        self.command_id.map(|id| id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_id() {
        let input = ReviewInput::new("alice", 5, "great");
        assert_eq!(Command::create(input.clone()).review_id(), None);
        assert_eq!(Command::update("r1", input).review_id(), Some("r1"));
        assert_eq!(Command::delete("r2").review_id(), Some("r2"));
    }

    #[test]
    fn test_envelope_json_shape() {
        let id = Uuid::new_v4();
        let envelope = CommandEnvelope::with_id(Command::delete("r9"), id);
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["op"], "DELETE");
        assert_eq!(value["id"], "r9");
        assert_eq!(value["command_id"], id.to_string());
    }

    #[test]
    fn test_bare_envelope_has_no_correlation() {
        let envelope = CommandEnvelope::bare(Command::delete("r1"));
        assert!(envelope.correlation().is_none());
    }
}
