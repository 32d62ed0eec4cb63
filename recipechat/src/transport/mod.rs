//! Transport strategies for the chat client.
//!
//! Defines the [`ChatTransport`] trait every strategy implements, and the
//! [`ClientCore`] state they share with the facade. Implementations:
//! - [`socket::SocketTransport`]: persistent WebSocket with reconnect/backoff
//! - [`fallback::FallbackTransport`]: one HTTP request per user message

pub mod backoff;
pub mod fallback;
pub mod socket;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;

use recipechat_proto::envelope::InboundEnvelope;
use recipechat_proto::message::{ChatMessage, UserMessage};

use crate::events::EventHub;
use crate::normalize::{Inbound, Normalizer};
use crate::status::ConnectionStatus;

/// Which strategy a client runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Persistent WebSocket channel.
    Socket,
    /// Stateless HTTP request per message.
    Fallback,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket => write!(f, "socket"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Errors surfaced through the `error` event.
///
/// Transport failures never propagate out of the caller-facing API; they are
/// published to subscribers instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The endpoint address could not be resolved.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Opening the channel failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The WebSocket handshake did not complete in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// The open channel failed.
    #[error("socket error: {0}")]
    Socket(String),

    /// The HTTP endpoint answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Response status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The HTTP request could not be completed.
    #[error("request failed: {0}")]
    Request(String),

    /// The channel went away while an operation was using it.
    #[error("channel closed")]
    ChannelClosed,
}

impl From<crate::address::AddressError> for TransportError {
    fn from(err: crate::address::AddressError) -> Self {
        Self::InvalidAddress(err.to_string())
    }
}

/// Payload of the `close` event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloseInfo {
    /// WebSocket close code, when the peer sent one.
    pub code: Option<u16>,
    /// Close reason, possibly empty.
    pub reason: String,
    /// Whether the close came from a local `disconnect()`.
    pub initiated_locally: bool,
}

impl CloseInfo {
    /// A close requested by the local caller.
    #[must_use]
    pub fn local() -> Self {
        Self {
            code: Some(1000),
            reason: "client disconnect".to_string(),
            initiated_locally: true,
        }
    }

    /// A close caused by the peer or by a failure.
    #[must_use]
    pub fn remote(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            initiated_locally: false,
        }
    }
}

/// Data handed to [`ChatTransport::send_raw`].
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// Sent verbatim.
    Text(String),
    /// Serialized to JSON text before transmission.
    Json(Value),
}

impl RawPayload {
    /// Wire text for this payload.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Json(value) => value.to_string(),
        }
    }
}

impl From<String> for RawPayload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for RawPayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Value> for RawPayload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// State shared between a transport strategy and the facade above it.
///
/// Locks are never held while subscribers run, so callbacks may call back into
/// the client. Status changes are additionally serialized by a reentrant gate
/// so that `status` events are observed in the order they were produced.
pub struct ClientCore {
    status: Mutex<ConnectionStatus>,
    status_gate: ReentrantMutex<()>,
    events: EventHub,
    normalizer: Mutex<Normalizer>,
}

impl ClientCore {
    /// Creates a core in the `idle` state with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: Mutex::new(ConnectionStatus::Idle),
            status_gate: ReentrantMutex::new(()),
            events: EventHub::new(),
            normalizer: Mutex::new(Normalizer::new()),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    /// The event hub subscribers register on.
    #[must_use]
    pub const fn events(&self) -> &EventHub {
        &self.events
    }

    /// Moves to `next` and publishes one `status` event.
    ///
    /// Returns `false` without publishing when `next` is already current or
    /// the transition is not allowed.
    pub fn set_status(&self, next: ConnectionStatus) -> bool {
        let _gate = self.status_gate.lock();
        {
            let mut current = self.status.lock();
            let from = *current;
            if from == next {
                return false;
            }
            if !from.can_transition_to(next) {
                tracing::warn!(from = %from, to = %next, "rejected status transition");
                return false;
            }
            tracing::debug!(from = %from, to = %next, "status transition");
            *current = next;
        }
        self.events.status.publish(&next);
        true
    }

    /// Moves to `next` only if the status is still `expected`.
    ///
    /// Used by scheduled transitions that may have been superseded.
    pub fn transition_from(&self, expected: ConnectionStatus, next: ConnectionStatus) -> bool {
        let _gate = self.status_gate.lock();
        if self.status() != expected {
            return false;
        }
        self.set_status(next)
    }

    /// Normalizes an inbound payload and publishes it on `message`.
    pub fn ingest(&self, inbound: Inbound) {
        let message = self.normalizer.lock().normalize(inbound);
        self.publish_message(&message);
    }

    /// Applies an already-decoded envelope and publishes it on `message`.
    pub fn ingest_envelope(&self, envelope: InboundEnvelope) {
        let message = self.normalizer.lock().apply(envelope);
        self.publish_message(&message);
    }

    /// Publishes a message without normalization.
    pub fn publish_message(&self, message: &ChatMessage) {
        tracing::trace!(kind = message.kind(), "publishing message");
        self.events.message.publish(message);
    }

    /// Publishes an `error` event.
    pub fn publish_error(&self, err: &TransportError) {
        tracing::warn!(err = %err, "transport error");
        self.events.error.publish(err);
    }

    /// Text of the reply currently streaming, if any.
    #[must_use]
    pub fn stream_text(&self) -> Option<String> {
        self.normalizer.lock().stream_text().map(str::to_string)
    }
}

impl Default for ClientCore {
    fn default() -> Self {
        Self::new()
    }
}

/// Strategy seam shared by the socket and fallback transports.
///
/// `connect`, `disconnect` and `send_raw` return immediately; their effects
/// are observed through the [`EventHub`]. All methods must be called from
/// within a Tokio runtime.
pub trait ChatTransport: Send + Sync + 'static {
    /// Opens the channel if it is not already open or opening.
    fn connect(&self);

    /// Closes the channel and suppresses automatic reconnection.
    fn disconnect(&self);

    /// Transmits `payload` as-is, connecting first when necessary.
    fn send_raw(&self, payload: RawPayload);

    /// Sends one user message. The returned future completes once the message
    /// has been handed off (socket) or its response processed (fallback).
    fn send_user_message(&self, message: UserMessage) -> impl Future<Output = ()> + Send;

    /// Which strategy this is.
    fn kind(&self) -> TransportKind;

    /// Shared status, events and normalizer.
    fn core(&self) -> &Arc<ClientCore>;
}
