//! Connection status state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a chat client.
///
/// Exactly one value is current per client. The value only changes through
/// [`ClientCore::set_status`](crate::transport::ClientCore::set_status), which
/// enforces [`ConnectionStatus::can_transition_to`] and publishes one `status`
/// event per real transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Never connected.
    #[default]
    Idle,
    /// A channel is being opened.
    Connecting,
    /// Ready to send and receive.
    Open,
    /// A local disconnect is in progress.
    Closing,
    /// No channel. A reconnect may be pending.
    Closed,
    /// The last operation failed. A later `connect()` clears it.
    Error,
}

impl ConnectionStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// `Error -> Open` exists only for the stateless fallback transport, which
    /// reverts to `Open` after a failed request so the user can retry.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ConnectionStatus::{Closed, Closing, Connecting, Error, Idle, Open};
        matches!(
            (self, next),
            (Idle, Connecting | Closing)
                | (Connecting, Open | Error | Closed | Closing)
                | (Open, Error | Closed | Closing)
                | (Closing, Closed)
                | (Closed, Connecting)
                | (Error, Connecting | Open | Closed | Closing)
        )
    }

    /// Whether a new connection attempt may start from this status.
    #[must_use]
    pub const fn can_connect(self) -> bool {
        matches!(self, Self::Idle | Self::Closed | Self::Error)
    }

    /// Lowercase name as used on the wire and in the UI.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
