//! Turns inbound payloads into canonical [`ChatMessage`] values.
//!
//! The server may push a structured envelope, a bare JSON string, or
//! something else entirely. Unknown or malformed input is never an error:
//! it degrades to a plain assistant reply carrying whatever text was received.

use serde_json::Value;

use recipechat_proto::envelope::{InboundEnvelope, decode_inbound};
use recipechat_proto::message::ChatMessage;

/// Text shown when an `error` envelope carries no message.
pub const DEFAULT_ERROR_TEXT: &str = "Chat error";

/// One inbound payload as delivered by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Raw frame text, possibly JSON.
    Text(String),
    /// An already-parsed JSON value.
    Value(Value),
}

impl From<String> for Inbound {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Inbound {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Value> for Inbound {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Text accumulated for the reply currently being streamed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamBuffer {
    text: String,
}

impl StreamBuffer {
    /// Accumulated text so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Stateful normalizer. Tracks at most one in-progress delta stream.
#[derive(Debug, Default)]
pub struct Normalizer {
    active_stream: Option<StreamBuffer>,
}

impl Normalizer {
    /// Creates a normalizer with no active stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interprets one inbound payload.
    ///
    /// Anything that is not a known envelope becomes a complete assistant
    /// reply and ends the stream in progress.
    pub fn normalize(&mut self, inbound: Inbound) -> ChatMessage {
        let value = match inbound {
            Inbound::Text(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => value,
                Err(_) => return self.whole(text),
            },
            Inbound::Value(value) => value,
        };

        match value {
            Value::String(text) => self.whole(text),
            Value::Object(ref object) if object.contains_key("type") => {
                match decode_inbound(value.clone()) {
                    Ok(envelope) => self.apply(envelope),
                    Err(e) => {
                        tracing::debug!(err = %e, "unrecognized envelope, passing through as text");
                        self.whole(value.to_string())
                    }
                }
            }
            other => self.whole(other.to_string()),
        }
    }

    fn whole(&mut self, text: String) -> ChatMessage {
        self.active_stream = None;
        ChatMessage::assistant(text)
    }

    /// Applies a decoded envelope, updating the stream buffer.
    pub fn apply(&mut self, envelope: InboundEnvelope) -> ChatMessage {
        match envelope {
            InboundEnvelope::AssistantMessage { text } => {
                self.active_stream = None;
                ChatMessage::assistant(text)
            }
            InboundEnvelope::AssistantDelta { text } => {
                self.active_stream
                    .get_or_insert_with(StreamBuffer::default)
                    .text
                    .push_str(&text);
                ChatMessage::delta(text)
            }
            InboundEnvelope::AssistantDone => {
                self.active_stream = None;
                ChatMessage::AssistantDone
            }
            InboundEnvelope::Error { message } => {
                self.active_stream = None;
                let text = message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_ERROR_TEXT.to_string());
                ChatMessage::error(text)
            }
        }
    }

    /// Text of the reply currently streaming, if any.
    #[must_use]
    pub fn stream_text(&self) -> Option<&str> {
        self.active_stream.as_ref().map(StreamBuffer::text)
    }

    /// Whether a delta stream is in progress.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.active_stream.is_some()
    }
}
