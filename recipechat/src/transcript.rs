//! The ordered chat log a UI renders.
//!
//! Streaming is tracked with an explicit index of the entry currently being
//! extended rather than a flag on the entry itself.

use recipechat_proto::message::{ChatMessage, MessageId};

/// Who an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Typed by the local user.
    User,
    /// Produced by the assistant.
    Assistant,
    /// A failure surfaced in the conversation.
    Error,
}

/// One rendered line of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Stable identifier for UI keys.
    pub id: MessageId,
    /// Author.
    pub role: Role,
    /// Text so far.
    pub text: String,
}

impl Entry {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            text: text.into(),
        }
    }
}

/// Folds canonical messages into a list of entries.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<Entry>,
    active_stream: Option<usize>,
}

impl Transcript {
    /// Creates an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one message. Returns the index of the entry that was appended
    /// or extended, if any.
    pub fn apply(&mut self, message: &ChatMessage) -> Option<usize> {
        match message {
            ChatMessage::User(user) => {
                self.active_stream = None;
                Some(self.push(Entry {
                    id: user.id,
                    role: Role::User,
                    text: user.text.clone(),
                }))
            }
            ChatMessage::Assistant { text } => {
                self.active_stream = None;
                Some(self.push(Entry::new(Role::Assistant, text.as_str())))
            }
            ChatMessage::AssistantDelta { text } => {
                let last = self.entries.len().checked_sub(1);
                match self.active_stream {
                    Some(idx) if Some(idx) == last => {
                        self.entries[idx].text.push_str(text);
                        Some(idx)
                    }
                    _ => {
                        let idx = self.push(Entry::new(Role::Assistant, text.as_str()));
                        self.active_stream = Some(idx);
                        Some(idx)
                    }
                }
            }
            ChatMessage::AssistantDone => {
                self.active_stream = None;
                None
            }
            ChatMessage::Error { text } => {
                self.active_stream = None;
                Some(self.push(Entry::new(Role::Error, text.as_str())))
            }
        }
    }

    fn push(&mut self, entry: Entry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    /// All entries in order.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Whether the entry at `index` is still receiving deltas.
    #[must_use]
    pub fn is_streaming(&self, index: usize) -> bool {
        self.active_stream == Some(index)
    }

    /// Index of the entry receiving deltas, if any.
    #[must_use]
    pub const fn active_stream(&self) -> Option<usize> {
        self.active_stream
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry has been appended yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
