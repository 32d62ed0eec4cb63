//! Caller-facing chat client.
//!
//! [`ChatClient`] wraps one transport strategy and exposes the uniform
//! lifecycle, send and subscription API UI code talks to. Keep one long-lived
//! client per chat session; it owns exactly one underlying transport.

use std::sync::Arc;

use recipechat_proto::message::{ChatMessage, Metadata, UserMessage};

use crate::config::ClientConfig;
use crate::events::Subscription;
use crate::status::ConnectionStatus;
use crate::transport::fallback::FallbackTransport;
use crate::transport::socket::SocketTransport;
use crate::transport::{ChatTransport, ClientCore, CloseInfo, RawPayload, TransportError, TransportKind};

/// A chat client over transport strategy `T`.
pub struct ChatClient<T: ChatTransport> {
    transport: T,
}

impl ChatClient<SocketTransport> {
    /// Builds a WebSocket client from resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidAddress`] if the socket endpoint
    /// cannot be resolved.
    pub fn socket(config: &ClientConfig) -> Result<Self, TransportError> {
        let url = config.socket_endpoint()?;
        Ok(Self::new(SocketTransport::new(url, config.socket_options())?))
    }
}

impl ChatClient<FallbackTransport> {
    /// Builds an HTTP fallback client from resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidAddress`] if the proxy endpoint
    /// cannot be resolved, or [`TransportError::Request`] if the HTTP client
    /// cannot be built.
    pub fn fallback(config: &ClientConfig) -> Result<Self, TransportError> {
        let url = config.proxy_endpoint()?;
        Ok(Self::new(FallbackTransport::new(url, config.fallback_options())?))
    }
}

impl<T: ChatTransport> ChatClient<T> {
    /// Wraps an already-built transport.
    pub const fn new(transport: T) -> Self {
        Self { transport }
    }

    /// The underlying transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    fn core(&self) -> &Arc<ClientCore> {
        self.transport.core()
    }

    /// Opens the channel. Idempotent.
    pub fn connect(&self) {
        self.transport.connect();
    }

    /// Closes the channel and stops reconnecting until the next `connect`.
    pub fn disconnect(&self) {
        self.transport.disconnect();
    }

    /// Sends a user prompt. Text is trimmed; blank text is ignored.
    pub async fn send_user_message(&self, text: &str, metadata: Metadata) {
        let prompt = text.trim();
        if prompt.is_empty() {
            tracing::trace!("ignoring blank user message");
            return;
        }
        self.transport
            .send_user_message(UserMessage::new(prompt, metadata))
            .await;
    }

    /// Sends an arbitrary payload. Ignored by the fallback transport.
    pub fn send_raw(&self, payload: impl Into<RawPayload>) {
        self.transport.send_raw(payload.into());
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.core().status()
    }

    /// Which strategy this client runs on.
    #[must_use]
    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Subscribes to channel opens.
    pub fn on_open<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.core().events().open.subscribe(move |()| callback())
    }

    /// Subscribes to channel closes.
    pub fn on_close<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CloseInfo) + Send + Sync + 'static,
    {
        self.core().events().close.subscribe(callback)
    }

    /// Subscribes to transport errors.
    pub fn on_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.core().events().error.subscribe(callback)
    }

    /// Subscribes to normalized inbound messages.
    pub fn on_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        self.core().events().message.subscribe(callback)
    }

    /// Subscribes to status transitions.
    pub fn on_status<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.core().events().status.subscribe(callback)
    }
}
