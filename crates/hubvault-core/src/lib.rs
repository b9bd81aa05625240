//! HubVault Core: shared domain types, the deposit state machine, and
//! configuration for the deposit vault and its settlement channel.

pub mod config;
pub mod error;
pub mod state_machine;
pub mod types;

pub use config::{ClientConfig, VaultConfig, MAX_FEE_BPS};
pub use error::CoreError;
pub use state_machine::{DepositEvent, DepositStateMachine, DepositStatus};
pub use types::{now_millis, now_secs, Address, Allocation, Allowance};
