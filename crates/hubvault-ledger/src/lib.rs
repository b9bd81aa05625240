//! HubVault Channel Ledger
//!
//! Tracks versioned fund allocations for two-party application sessions
//! opened with the settlement coordinator, with an append-only history per
//! session. The coordinator is reached through the `SessionCoordinator`
//! trait, implemented for the protocol client and by an in-memory adapter.

pub mod adapters;
pub mod config;
pub mod error;
pub mod ledger;
pub mod rpc;
pub mod traits;
pub mod types;

pub use adapters::InMemoryCoordinator;
pub use config::LedgerConfig;
pub use error::LedgerError;
pub use ledger::ChannelLedger;
pub use traits::SessionCoordinator;
pub use types::{ChannelState, Intent, RemoteSessionStatus, SessionId};
