//! Queue wire format for commands
//!
//! Two encodings are understood:
//!
//! - **JSON** (default): tagged envelope, e.g.
//!   `{"command_id":"..","op":"CREATE","client":"alice","rating":5,"comment":"great"}`.
//!   Delimiters inside `comment` are harmless.
//! - **Text**: the legacy line `OPERATION:PAYLOAD` with comma separated fields
//!   (`CREATE:client,rating,comment`, `UPDATE:id,client,rating,comment`,
//!   `DELETE:id`). There is no escaping, so the encoder refuses any field that
//!   contains a delimiter rather than emit a line that would parse differently.

use bytes::Bytes;

use super::{Command, CommandEnvelope};

/// Decode failures. All of them are terminal for the message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("empty payload")]
    Empty,

    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("malformed JSON command: {0}")]
    Json(String),

    #[error("missing ':' between operation and payload")]
    MissingSeparator,

    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("{operation} expects {expected} fields, got {actual}")]
    FieldCount {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("rating '{0}' is not an integer")]
    InvalidRating(String),

    #[error("field '{field}' is empty")]
    EmptyField { field: &'static str },

    #[error("field '{field}' contains a reserved delimiter and cannot use the text format")]
    ReservedDelimiter { field: &'static str },
}

/// Encoding used when publishing commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WireFormat {
    #[default]
    Json,
    Text,
}

/// Encode an envelope for the queue
pub fn encode(envelope: &CommandEnvelope, format: WireFormat) -> Result<Bytes, CommandError> {
    match format {
        WireFormat::Json => serde_json::to_vec(envelope)
            .map(Bytes::from)
            .map_err(|e| CommandError::Json(e.to_string())),
        WireFormat::Text => encode_text(&envelope.command).map(Bytes::from),
    }
}

/// Decode a queue payload, accepting either encoding
pub fn decode(payload: &[u8]) -> Result<CommandEnvelope, CommandError> {
    let text = std::str::from_utf8(payload).map_err(|_| CommandError::NotUtf8)?;
    // Only the line terminator is framing; spaces belong to the fields
    let line = text.trim_end_matches(['\r', '\n']);

    if line.trim().is_empty() {
        return Err(CommandError::Empty);
    }

    let envelope = if line.trim_start().starts_with('{') {
        serde_json::from_str::<CommandEnvelope>(line)
            .map_err(|e| CommandError::Json(e.to_string()))?
    } else {
        CommandEnvelope::bare(decode_text(line)?)
    };

    validate(&envelope.command)?;
    Ok(envelope)
}

fn encode_text(command: &Command) -> Result<String, CommandError> {
    match command {
        Command::Create {
            client,
            rating,
            comment,
        } => {
            check_text_field("client", client)?;
            check_text_field("comment", comment)?;
            Ok(format!("CREATE:{},{},{}", client, rating, comment))
        }
        Command::Update {
            id,
            client,
            rating,
            comment,
        } => {
            check_text_field("id", id)?;
            check_text_field("client", client)?;
            check_text_field("comment", comment)?;
            Ok(format!("UPDATE:{},{},{},{}", id, client, rating, comment))
        }
        Command::Delete { id } => {
            check_text_field("id", id)?;
            Ok(format!("DELETE:{}", id))
        }
    }
}

fn check_text_field(field: &'static str, value: &str) -> Result<(), CommandError> {
    if value.contains([',', ':', '\n', '\r']) {
        return Err(CommandError::ReservedDelimiter { field });
    }
    Ok(())
}

fn decode_text(line: &str) -> Result<Command, CommandError> {
    let (operation, payload) = line
        .split_once(':')
        .ok_or(CommandError::MissingSeparator)?;
    let fields: Vec<&str> = payload.split(',').collect();

    match operation {
        "CREATE" => {
            expect_fields("CREATE", &fields, 3)?;
            Ok(Command::Create {
                client: fields[0].to_string(),
                rating: parse_rating(fields[1])?,
                comment: fields[2].to_string(),
            })
        }
        "UPDATE" => {
            expect_fields("UPDATE", &fields, 4)?;
            Ok(Command::Update {
                id: fields[0].to_string(),
                client: fields[1].to_string(),
                rating: parse_rating(fields[2])?,
                comment: fields[3].to_string(),
            })
        }
        "DELETE" => {
            expect_fields("DELETE", &fields, 1)?;
            Ok(Command::Delete {
                id: fields[0].to_string(),
            })
        }
        other => Err(CommandError::UnknownOperation(other.to_string())),
    }
}

fn expect_fields(
    operation: &'static str,
    fields: &[&str],
    expected: usize,
) -> Result<(), CommandError> {
    if fields.len() != expected {
        return Err(CommandError::FieldCount {
            operation,
            expected,
            actual: fields.len(),
        });
    }
    Ok(())
}

fn parse_rating(raw: &str) -> Result<i32, CommandError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| CommandError::InvalidRating(raw.to_string()))
}

/// Reject commands that would target no review
fn validate(command: &Command) -> Result<(), CommandError> {
    match command.review_id() {
        Some(id) if id.trim().is_empty() => Err(CommandError::EmptyField { field: "id" }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReviewInput;

    #[test]
    fn test_decode_legacy_create() {
        let envelope = decode(b"CREATE:alice,5,great").unwrap();
        assert_eq!(
            envelope.command,
            Command::Create {
                client: "alice".into(),
                rating: 5,
                comment: "great".into(),
            }
        );
        assert!(envelope.command_id.is_none());
    }

    #[test]
    fn test_decode_legacy_update_and_delete() {
        let update = decode(b"UPDATE:r1,bob,3,fine").unwrap();
        assert_eq!(update.command.review_id(), Some("r1"));

        let delete = decode(b"DELETE:r2\n").unwrap();
        assert_eq!(delete.command, Command::delete("r2"));
    }

    #[test]
    fn test_decode_rejects_non_numeric_rating() {
        let err = decode(b"CREATE:alice,five,great").unwrap_err();
        assert_eq!(err, CommandError::InvalidRating("five".into()));
    }

    #[test]
    fn test_decode_rejects_wrong_field_count() {
        // A comma inside the comment corrupts the legacy line
        let err = decode(b"CREATE:alice,5,great, really").unwrap_err();
        assert!(matches!(
            err,
            CommandError::FieldCount {
                operation: "CREATE",
                expected: 3,
                actual: 4
            }
        ));

        assert!(matches!(
            decode(b"UPDATE:r1,bob,3").unwrap_err(),
            CommandError::FieldCount { .. }
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode(b"").unwrap_err(), CommandError::Empty);
        assert_eq!(decode(b"hello").unwrap_err(), CommandError::MissingSeparator);
        assert_eq!(
            decode(b"UPSERT:x").unwrap_err(),
            CommandError::UnknownOperation("UPSERT".into())
        );
        assert_eq!(decode(&[0xff, 0xfe]).unwrap_err(), CommandError::NotUtf8);
        assert!(matches!(decode(b"{\"op\":\"CREATE\"}").unwrap_err(), CommandError::Json(_)));
        assert_eq!(
            decode(b"DELETE:").unwrap_err(),
            CommandError::EmptyField { field: "id" }
        );
    }

    #[test]
    fn test_json_preserves_delimiters_in_comment() {
        let input = ReviewInput::new("carol", 4, "good, but: slow\nshipping");
        let envelope = CommandEnvelope::new(Command::create(input.clone()));

        let bytes = encode(&envelope, WireFormat::Json).unwrap();
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded, envelope);
        assert_eq!(decoded.command, Command::create(input));
    }

    #[test]
    fn test_json_rejects_string_rating() {
        let payload = br#"{"op":"CREATE","client":"a","rating":"5","comment":"c"}"#;
        assert!(matches!(decode(payload).unwrap_err(), CommandError::Json(_)));
    }

    #[test]
    fn test_text_encoding_matches_legacy_line() {
        let envelope = CommandEnvelope::new(Command::update("r1", ReviewInput::new("bob", 2, "meh")));
        let bytes = encode(&envelope, WireFormat::Text).unwrap();
        assert_eq!(&bytes[..], b"UPDATE:r1,bob,2,meh");
    }

    #[test]
    fn test_text_encoding_refuses_delimiters() {
        let envelope = CommandEnvelope::new(Command::create(ReviewInput::new("dave", 1, "bad, awful")));
        let err = encode(&envelope, WireFormat::Text).unwrap_err();
        assert_eq!(err, CommandError::ReservedDelimiter { field: "comment" });
    }

    #[test]
    fn test_decode_legacy_keeps_field_whitespace() {
        let envelope = decode(b"CREATE:alice,5,  spaced out  \r\n").unwrap();
        assert_eq!(
            envelope.command,
            Command::Create {
                client: "alice".into(),
                rating: 5,
                comment: "  spaced out  ".into(),
            }
        );
    }
}
