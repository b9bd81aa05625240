use std::fmt;

use crate::error::CoreError;

/// The 5 states of a vault deposit lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositStatus {
    /// Deposit recorded by the vault, not yet forwarded to the hub.
    Pending,
    /// A settlement session has been opened for the deposit.
    Sent,
    /// The coordinator acknowledged the deposit's session.
    Confirmed,
    /// The coordinator reported principal and yield for the deposit.
    Settled,
    /// Funds released to the depositor. Final state.
    Withdrawn,
}

impl DepositStatus {
    /// Whether this is a final (terminal) state.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Withdrawn)
    }

    /// Convert to the vault contract's `uint8` status encoding.
    pub fn to_u8(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Sent => 1,
            Self::Confirmed => 2,
            Self::Settled => 3,
            Self::Withdrawn => 4,
        }
    }

    /// Create from the vault contract's `uint8` status encoding.
    pub fn from_u8(value: u8) -> Result<Self, CoreError> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Sent),
            2 => Ok(Self::Confirmed),
            3 => Ok(Self::Settled),
            4 => Ok(Self::Withdrawn),
            _ => Err(CoreError::ValidationError(format!(
                "invalid deposit status value: {}",
                value
            ))),
        }
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Sent => write!(f, "SENT"),
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Settled => write!(f, "SETTLED"),
            Self::Withdrawn => write!(f, "WITHDRAWN"),
        }
    }
}

/// Events that trigger deposit transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositEvent {
    /// The deposit was forwarded to the hub.
    SendToHub,
    /// The coordinator confirmed the deposit's session.
    ConfirmDeposit,
    /// The coordinator reported the settlement outcome.
    ReceiveSettlement,
    /// The depositor withdrew principal plus yield.
    Withdraw,
    /// The depositor pulled the deposit back before it reached the hub.
    EmergencyWithdraw,
}

impl DepositEvent {
    /// The only state this event may be applied to.
    pub fn required_status(&self) -> DepositStatus {
        match self {
            Self::SendToHub | Self::EmergencyWithdraw => DepositStatus::Pending,
            Self::ConfirmDeposit => DepositStatus::Sent,
            Self::ReceiveSettlement => DepositStatus::Confirmed,
            Self::Withdraw => DepositStatus::Settled,
        }
    }
}

/// Deposit transitions.
///
/// Valid transitions:
/// - Pending → Sent (SendToHub)
/// - Sent → Confirmed (ConfirmDeposit)
/// - Confirmed → Settled (ReceiveSettlement)
/// - Settled → Withdrawn (Withdraw)
/// - Pending → Withdrawn (EmergencyWithdraw)
pub struct DepositStateMachine;

impl DepositStateMachine {
    /// Attempt a state transition based on an event.
    /// Returns the new state on success, or an error for invalid transitions.
    pub fn transition(
        current: DepositStatus,
        event: DepositEvent,
    ) -> Result<DepositStatus, CoreError> {
        let new_state = match (current, event) {
            (DepositStatus::Pending, DepositEvent::SendToHub) => DepositStatus::Sent,
            (DepositStatus::Pending, DepositEvent::EmergencyWithdraw) => DepositStatus::Withdrawn,
            (DepositStatus::Sent, DepositEvent::ConfirmDeposit) => DepositStatus::Confirmed,
            (DepositStatus::Confirmed, DepositEvent::ReceiveSettlement) => DepositStatus::Settled,
            (DepositStatus::Settled, DepositEvent::Withdraw) => DepositStatus::Withdrawn,
            _ => {
                return Err(CoreError::InvalidStateTransition {
                    from: current,
                    event,
                });
            }
        };

        tracing::debug!(
            from = %current,
            to = %new_state,
            event = ?event,
            "deposit state transition"
        );

        Ok(new_state)
    }

    /// Check if a transition is valid without performing it.
    pub fn can_transition(current: DepositStatus, event: DepositEvent) -> bool {
        Self::transition(current, event).is_ok()
    }
}
