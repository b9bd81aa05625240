use hubvault_core::{Address, DepositStatus};
use hubvault_ledger::LedgerError;

use crate::types::DepositId;

/// Deposit lifecycle errors. A failed call leaves the deposit unchanged.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("deposit {id} is {actual}, expected {expected}")]
    InvalidStatus {
        id: DepositId,
        expected: DepositStatus,
        actual: DepositStatus,
    },

    #[error("{0} is not the coordinator or admin")]
    Unauthorized(Address),

    #[error("{caller} does not own deposit {id}")]
    UnauthorizedWithdrawal { id: DepositId, caller: Address },

    #[error("no hub counterparty configured")]
    RemoteNotConfigured,

    #[error("deposit not found: {0}")]
    DepositNotFound(DepositId),

    #[error("deposit {id} settled for {expected} but the ledger holds {actual:?}")]
    SettlementMismatch {
        id: DepositId,
        expected: u128,
        actual: Option<u128>,
    },

    #[error("deposit {0} has no ledger session")]
    MissingSession(DepositId),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("core error: {0}")]
    Core(#[from] hubvault_core::CoreError),
}
