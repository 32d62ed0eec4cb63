//! JSON envelopes exchanged over the persistent chat channel.
//!
//! Outbound: `{ "type": "user_message", "text": ..., ...metadata }`.
//! Inbound: one of the [`InboundEnvelope`] shapes, or a bare string which the
//! client treats as a complete assistant reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{Metadata, UserMessage};

/// Discriminator of the outbound user message envelope.
pub const USER_MESSAGE_TYPE: &str = "user_message";

/// Metadata key carrying the send time when the caller did not provide one.
pub const TIMESTAMP_KEY: &str = "ts";

/// Error type for envelope encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// The payload parsed but does not have the expected envelope shape.
    #[error("unexpected envelope: {0}")]
    UnexpectedShape(String),
}

/// Structured messages the server pushes to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEnvelope {
    /// A complete assistant reply.
    AssistantMessage {
        /// Reply text (missing or null decodes as empty).
        #[serde(default, deserialize_with = "lenient_text")]
        text: String,
    },
    /// A chunk of a streamed assistant reply.
    AssistantDelta {
        /// Chunk text (missing or null decodes as empty).
        #[serde(default, deserialize_with = "lenient_text")]
        text: String,
    },
    /// End of a streamed reply.
    AssistantDone,
    /// A server-side failure.
    Error {
        /// Optional human-readable description.
        #[serde(
            default,
            deserialize_with = "lenient_message",
            skip_serializing_if = "Option::is_none"
        )]
        message: Option<String>,
    },
}

/// Renders a non-null JSON value as text: strings as-is, anything else as
/// its JSON form.
fn value_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(value_text(Value::deserialize(deserializer)?).unwrap_or_default())
}

fn lenient_message<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(value_text(Value::deserialize(deserializer)?))
}

/// Builds the outbound JSON object for a user message.
///
/// Metadata keys are copied first so that `type` and `text` always carry the
/// envelope values. A `ts` entry with the message timestamp is added when the
/// caller did not supply one.
#[must_use]
pub fn user_message_value(msg: &UserMessage) -> Value {
    let mut object = msg.metadata.clone();
    object
        .entry(TIMESTAMP_KEY)
        .or_insert_with(|| Value::from(msg.timestamp.as_millis()));
    object.insert("type".into(), Value::from(USER_MESSAGE_TYPE));
    object.insert("text".into(), Value::from(msg.text.clone()));
    Value::Object(object)
}

/// Encodes a user message as envelope text.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode_user_message(msg: &UserMessage) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&user_message_value(msg))?)
}

/// Decodes an outbound user message envelope, returning its text and the
/// remaining metadata. Used by servers speaking the protocol.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for invalid JSON, or
/// [`CodecError::UnexpectedShape`] if the object is not a `user_message`
/// with a string `text`.
pub fn decode_user_message(raw: &str) -> Result<(String, Metadata), CodecError> {
    let Value::Object(mut object) = serde_json::from_str::<Value>(raw)? else {
        return Err(CodecError::UnexpectedShape("not a JSON object".into()));
    };
    match object.remove("type") {
        Some(Value::String(kind)) if kind == USER_MESSAGE_TYPE => {}
        other => {
            return Err(CodecError::UnexpectedShape(format!(
                "expected type {USER_MESSAGE_TYPE}, got {other:?}"
            )));
        }
    }
    let Some(Value::String(text)) = object.remove("text") else {
        return Err(CodecError::UnexpectedShape("missing string text".into()));
    };
    Ok((text, object))
}

/// Encodes an inbound envelope as text.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode_inbound(envelope: &InboundEnvelope) -> Result<String, CodecError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decodes an inbound envelope from a JSON value.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the value is not one of the known envelopes.
pub fn decode_inbound(value: Value) -> Result<InboundEnvelope, CodecError> {
    Ok(serde_json::from_value(value)?)
}
