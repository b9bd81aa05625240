//! Connection states and the events the client publishes to observers.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

/// Lifecycle of the client's connection to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Transport open, handshake not started.
    Connected,
    Authenticating,
    /// Handshake complete; requests may be sent.
    Authenticated,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
        };
        f.write_str(s)
    }
}

/// High-level events emitted by the protocol client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The transport opened.
    Connected,

    /// The handshake completed.
    Authenticated {
        /// Session expiry (seconds since epoch).
        session_expires_at: u64,
    },

    /// The transport closed.
    Disconnected { reason: String },

    /// A reconnect attempt is scheduled.
    Reconnecting { attempt: u32, delay: Duration },

    /// Every reconnect attempt failed; the client has stopped trying.
    ReconnectExhausted { attempts: u32 },

    /// A response frame nobody was waiting for.
    Notification { method: String, params: Vec<Value> },
}
