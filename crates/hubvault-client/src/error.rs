//! Error types for the coordinator protocol client.

use std::time::Duration;

/// Errors that can occur while talking to the settlement coordinator.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The transport did not open within the configured deadline.
    #[error("connection not established within {0:?}")]
    ConnectionTimeout(Duration),

    /// The challenge-response handshake was rejected or could not complete.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A request was issued before the session was authenticated.
    #[error("not authenticated")]
    NotAuthenticated,

    /// No response arrived for a request before its deadline.
    #[error("request {id} ({method}) timed out")]
    RequestTimeout { id: u64, method: String },

    /// The coordinator answered with an error frame.
    #[error("remote error {code}: {message}")]
    RemoteError { code: i64, message: String },

    /// The connection closed before a response could arrive.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport-level failure (TCP, WebSocket).
    #[error("transport error: {0}")]
    Transport(String),

    /// Frame or payload (de)serialization failure.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Signing failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] hubvault_crypto::CryptoError),
}
