//! HubVault Deposit Lifecycle
//!
//! Tracks vault deposits from the moment they are locked until they are paid
//! out, forwarding each one to the hub through a channel ledger session and
//! computing the payout from the reported settlement.

pub mod error;
pub mod events;
pub mod lifecycle;
pub mod types;

pub use error::VaultError;
pub use events::VaultEvent;
pub use lifecycle::DepositLifecycle;
pub use types::{protocol_fee, Deposit, DepositId, Payout};
