//! Request/response shapes for the stateless AI proxy endpoint.
//!
//! The fallback transport posts one [`ProxyRequest`] per user prompt and reads
//! the reply text with [`extract_answer`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Model requested when the caller does not name one.
pub const DEFAULT_MODEL: &str = "llama-3.1-sonar-small-128k-chat";

/// System prompt used when the caller does not supply one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful cooking assistant.";

/// Body of the proxy `POST` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRequest {
    /// The user's prompt.
    pub prompt: String,
    /// Model name forwarded to the upstream service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// System prompt forwarded to the upstream service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Always `false`: the proxy answers with one complete body.
    #[serde(default)]
    pub stream: bool,
}

impl ProxyRequest {
    /// Creates a non-streaming request for `prompt`.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            system: None,
            stream: false,
        }
    }

    /// Sets the model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Pulls the answer text out of a proxy response body.
///
/// Tries, in order, `text`, `answer`, `choices[0].text` and
/// `choices[0].message.content`; the first non-null candidate wins. Non-string
/// scalars are rendered as JSON text. Anything else yields an empty string.
#[must_use]
pub fn extract_answer(body: &Value) -> String {
    let first_choice = body.get("choices").and_then(|c| c.get(0));
    let candidates = [
        body.get("text"),
        body.get("answer"),
        first_choice.and_then(|c| c.get("text")),
        first_choice
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content")),
    ];

    candidates
        .into_iter()
        .flatten()
        .find(|v| !v.is_null())
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default()
}
