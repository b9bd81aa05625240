use std::fmt;

use chrono::{DateTime, Utc};
use hubvault_core::{Address, DepositStatus};
use hubvault_ledger::SessionId;
use serde::{Deserialize, Serialize};

/// Basis-point denominator.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Vault-assigned position id, increasing from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepositId(pub u64);

impl fmt::Display for DepositId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A vault deposit and what the hub reported for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub id: DepositId,
    pub depositor: Address,
    pub token: String,
    #[serde(with = "hubvault_core::types::amount_str")]
    pub amount: u128,
    pub timestamp: DateTime<Utc>,
    pub status: DepositStatus,
    /// Coordinator reference set by `confirm_deposit`.
    pub remote_session_ref: Option<String>,
    /// Ledger session opened by `send_to_hub`.
    pub session_id: Option<SessionId>,
    pub principal: Option<u128>,
    pub yield_amount: Option<u128>,
    pub withdrawn_at: Option<DateTime<Utc>>,
    /// Set once the vault reports the payout as executed.
    pub withdrawal_confirmed: bool,
}

impl Deposit {
    pub(crate) fn new(id: DepositId, depositor: Address, token: String, amount: u128) -> Self {
        Self {
            id,
            depositor,
            token,
            amount,
            timestamp: Utc::now(),
            status: DepositStatus::Pending,
            remote_session_ref: None,
            session_id: None,
            principal: None,
            yield_amount: None,
            withdrawn_at: None,
            withdrawal_confirmed: false,
        }
    }
}

/// What the vault pays out when a position is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub deposit_id: DepositId,
    pub recipient: Address,
    pub token: String,
    #[serde(with = "hubvault_core::types::amount_str")]
    pub payout: u128,
    #[serde(with = "hubvault_core::types::amount_str")]
    pub fee: u128,
    pub fee_recipient: Option<Address>,
    /// The position token is burned along with the payout.
    pub retire_position_token: bool,
}

/// `floor(yield_amount * fee_bps / 10000)` without overflowing on large yields.
pub fn protocol_fee(yield_amount: u128, fee_bps: u16) -> u128 {
    let bps = u128::from(fee_bps);
    (yield_amount / BPS_DENOMINATOR) * bps + (yield_amount % BPS_DENOMINATOR) * bps / BPS_DENOMINATOR
}
