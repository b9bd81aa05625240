//! HubVault coordinator client.
//!
//! Maintains an authenticated session with the remote settlement coordinator
//! over a persistent WebSocket connection:
//!
//! - **Handshake**: `auth_request` → `auth_challenge` → `auth_verify`, with the
//!   challenge answered by a typed-data signature from the wallet key
//! - **Requests**: every frame signed, correlated by a monotonic id, and
//!   timed out independently
//! - **Reconnection**: exponential backoff, full handshake on every attempt
//! - **Events**: a broadcast stream of connection and notification events

pub mod auth;
pub mod backoff;
pub mod client;
pub mod error;
pub mod events;
pub mod protocol;
pub mod transport;

pub use auth::AuthSession;
pub use backoff::ReconnectPolicy;
pub use client::ProtocolClient;
pub use error::ClientError;
pub use events::{ClientEvent, ConnectionState};
pub use protocol::{Frame, Payload};
pub use transport::{Connection, Connector, WebSocketConnector};
