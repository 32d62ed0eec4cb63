//! Canonical chat message types for the `RecipeChat` protocol.
//!
//! Every inbound payload, whatever its wire shape, is decoded into one of the
//! closed [`ChatMessage`] variants before it reaches a subscriber. Outbound
//! user prompts are represented by [`UserMessage`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form key/value metadata attached to an outbound user message.
///
/// Keys are merged into the outbound envelope next to `type` and `text`.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a user message, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new time-ordered message identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `MessageId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Milliseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A prompt typed by the local user. Outbound only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMessage {
    /// Local identifier, never sent on the wire.
    pub id: MessageId,
    /// The prompt text, already trimmed by the caller.
    pub text: String,
    /// Caller-supplied metadata merged into the outbound envelope.
    pub metadata: Metadata,
    /// When the message was created.
    pub timestamp: Timestamp,
}

impl UserMessage {
    /// Creates a user message stamped with the current time.
    #[must_use]
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: MessageId::new(),
            text: text.into(),
            metadata,
            timestamp: Timestamp::now(),
        }
    }

    /// Looks up a string-valued metadata entry.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(serde_json::Value::as_str)
    }
}

/// The canonical, discriminated chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    /// A prompt from the local user.
    User(UserMessage),
    /// A complete assistant reply.
    Assistant {
        /// Reply text.
        text: String,
    },
    /// An incremental chunk of an in-progress assistant reply.
    AssistantDelta {
        /// The chunk to append to the reply in progress.
        text: String,
    },
    /// End of a delta stream.
    AssistantDone,
    /// A server- or transport-reported failure surfaced as a chat entry.
    Error {
        /// Human-readable failure description.
        text: String,
    },
}

impl ChatMessage {
    /// Convenience constructor for a complete assistant reply.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant { text: text.into() }
    }

    /// Convenience constructor for a streaming chunk.
    #[must_use]
    pub fn delta(text: impl Into<String>) -> Self {
        Self::AssistantDelta { text: text.into() }
    }

    /// Convenience constructor for an error entry.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self::Error { text: text.into() }
    }

    /// Returns the text carried by this message, if any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::User(user) => Some(&user.text),
            Self::Assistant { text } | Self::AssistantDelta { text } | Self::Error { text } => {
                Some(text)
            }
            Self::AssistantDone => None,
        }
    }

    /// Short name of the variant, used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Assistant { .. } => "assistant",
            Self::AssistantDelta { .. } => "assistant_delta",
            Self::AssistantDone => "assistant_done",
            Self::Error { .. } => "error",
        }
    }
}
