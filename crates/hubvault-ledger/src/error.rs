use hubvault_client::ClientError;

use crate::types::SessionId;

/// Channel ledger errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("session creation failed: {0}")]
    SessionCreationFailed(ClientError),

    #[error("session already finalized: {0}")]
    SessionAlreadyFinalized(SessionId),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("allocation mismatch: {0}")]
    AllocationMismatch(String),

    #[error("invalid participants: {0}")]
    InvalidParticipants(String),

    #[error("coordinator error: {0}")]
    Remote(#[from] ClientError),

    #[error("core error: {0}")]
    Core(#[from] hubvault_core::CoreError),
}
