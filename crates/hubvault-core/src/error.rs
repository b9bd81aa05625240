use crate::state_machine::{DepositEvent, DepositStatus};

/// Core protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid deposit transition from {from} on {event:?}")]
    InvalidStateTransition {
        from: DepositStatus,
        event: DepositEvent,
    },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}
