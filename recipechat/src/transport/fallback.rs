//! Stateless HTTP fallback transport.
//!
//! There is no persistent channel: each user message becomes one `POST` to
//! the AI proxy and produces one assistant reply. `connect` and `disconnect`
//! only walk the status machine so that callers observe the same lifecycle as
//! with the socket transport.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde_json::Value;
use url::Url;

use recipechat_proto::envelope::InboundEnvelope;
use recipechat_proto::message::{ChatMessage, UserMessage};
use recipechat_proto::proxy::{DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT, ProxyRequest, extract_answer};

use super::{ChatTransport, ClientCore, CloseInfo, RawPayload, TransportError, TransportKind};
use crate::status::ConnectionStatus;

/// Chat entry shown when the proxy request fails.
pub const FAILURE_TEXT: &str = "Sorry, I couldn't reach the AI service. Please try again in a moment.";

/// Tunables for [`FallbackTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackOptions {
    /// Model used when the message metadata does not name one.
    pub model: String,
    /// System prompt used when the message metadata does not supply one.
    pub system: String,
    /// Bound on one proxy round trip.
    pub request_timeout: Duration,
    /// Delay after a failure before the status reverts from `error` to
    /// `open`. `None` leaves the client in `error` until the next connect.
    pub error_recovery: Option<Duration>,
    /// Replay each answer as deltas of this many characters instead of one
    /// whole message.
    pub chunk_chars: Option<usize>,
    /// Sent as `Authorization: Bearer <token>`.
    pub token: Option<String>,
}

impl Default for FallbackOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            request_timeout: Duration::from_secs(60),
            error_recovery: Some(Duration::from_millis(500)),
            chunk_chars: None,
            token: None,
        }
    }
}

struct FallbackInner {
    core: Arc<ClientCore>,
    http: reqwest::Client,
    endpoint: Url,
    options: FallbackOptions,
}

/// HTTP request/response strategy for [`ChatTransport`].
pub struct FallbackTransport {
    inner: Arc<FallbackInner>,
}

impl FallbackTransport {
    /// Creates a transport posting to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidAddress`] unless `endpoint` is an
    /// `http`/`https` URL, or [`TransportError::Request`] if the HTTP client
    /// cannot be built.
    pub fn new(endpoint: Url, options: FallbackOptions) -> Result<Self, TransportError> {
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(TransportError::InvalidAddress(format!(
                "expected an http:// or https:// URL, got {endpoint}"
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(FallbackInner {
                core: Arc::new(ClientCore::new()),
                http,
                endpoint,
                options,
            }),
        })
    }

    /// The proxy endpoint requests are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }
}

impl ChatTransport for FallbackTransport {
    fn connect(&self) {
        self.inner.begin_connect();
    }

    fn disconnect(&self) {
        let core = &self.inner.core;
        if matches!(
            core.status(),
            ConnectionStatus::Closing | ConnectionStatus::Closed
        ) {
            return;
        }
        if !core.set_status(ConnectionStatus::Closing) {
            return;
        }
        let core = Arc::clone(core);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            finish_close(&core);
        });
    }

    fn send_raw(&self, payload: RawPayload) {
        tracing::debug!(
            bytes = payload.into_text().len(),
            "send_raw has no channel in fallback mode, ignoring"
        );
    }

    async fn send_user_message(&self, message: UserMessage) {
        let inner = &self.inner;
        if matches!(
            inner.core.status(),
            ConnectionStatus::Idle | ConnectionStatus::Closed
        ) {
            inner.begin_connect();
        }

        match inner.post(&message).await {
            Ok(answer) => inner.deliver(answer),
            Err(err) => inner.fail(&err),
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Fallback
    }

    fn core(&self) -> &Arc<ClientCore> {
        &self.inner.core
    }
}

/// Completes a pending close if nothing superseded it.
fn finish_close(core: &ClientCore) {
    if core.transition_from(ConnectionStatus::Closing, ConnectionStatus::Closed) {
        core.events().close.publish(&CloseInfo::local());
    }
}

impl FallbackInner {
    fn begin_connect(&self) {
        let core = &self.core;
        match core.status() {
            ConnectionStatus::Open | ConnectionStatus::Connecting => return,
            ConnectionStatus::Closing => finish_close(core),
            _ => {}
        }
        if !core.set_status(ConnectionStatus::Connecting) {
            return;
        }
        let core = Arc::clone(core);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            if core.transition_from(ConnectionStatus::Connecting, ConnectionStatus::Open) {
                core.events().open.publish(&());
            }
        });
    }

    fn request_for(&self, message: &UserMessage) -> ProxyRequest {
        let model = message
            .metadata_str("model")
            .unwrap_or(self.options.model.as_str());
        let system = message
            .metadata_str("system")
            .unwrap_or(self.options.system.as_str());
        ProxyRequest::new(message.text.clone())
            .with_model(model)
            .with_system(system)
    }

    async fn post(&self, message: &UserMessage) -> Result<String, TransportError> {
        let body = self.request_for(message);
        tracing::debug!(url = %self.endpoint, model = ?body.model, "posting prompt to proxy");

        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(ACCEPT, "application/json")
            .json(&body);
        if let Some(token) = &self.options.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let data = response
            .json::<Value>()
            .await
            .unwrap_or_else(|e| {
                tracing::debug!(err = %e, "proxy response is not JSON, treating as empty");
                Value::Object(serde_json::Map::new())
            });
        Ok(extract_answer(&data))
    }

    fn deliver(&self, answer: String) {
        let Some(size) = self.options.chunk_chars.filter(|n| *n > 0) else {
            self.core
                .ingest_envelope(InboundEnvelope::AssistantMessage { text: answer });
            return;
        };
        let chars: Vec<char> = answer.chars().collect();
        for chunk in chars.chunks(size) {
            self.core.ingest_envelope(InboundEnvelope::AssistantDelta {
                text: chunk.iter().collect(),
            });
        }
        self.core.ingest_envelope(InboundEnvelope::AssistantDone);
    }

    fn fail(&self, err: &TransportError) {
        self.core.set_status(ConnectionStatus::Error);
        self.core.publish_error(err);
        self.core.publish_message(&ChatMessage::error(FAILURE_TEXT));

        if let Some(delay) = self.options.error_recovery {
            let core = Arc::clone(&self.core);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                core.transition_from(ConnectionStatus::Error, ConnectionStatus::Open);
            });
        }
    }
}
