use hubvault_core::Address;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::VaultError;
use crate::lifecycle::DepositLifecycle;
use crate::types::{DepositId, Payout};

/// Calls arriving from the vault contract and the hub coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VaultEvent {
    /// A depositor locked funds in the vault.
    Deposited {
        depositor: Address,
        token: String,
        #[serde(with = "hubvault_core::types::amount_str")]
        amount: u128,
    },
    /// The coordinator acknowledged the deposit's hub session.
    NotifyConfirmed {
        deposit_id: DepositId,
        remote_session_ref: String,
        caller: Address,
    },
    /// The coordinator reported the settlement outcome.
    NotifySettled {
        deposit_id: DepositId,
        #[serde(with = "hubvault_core::types::amount_str")]
        principal: u128,
        #[serde(with = "hubvault_core::types::amount_str")]
        yield_amount: u128,
        caller: Address,
    },
    /// A depositor closed a settled position.
    PayoutRequested {
        deposit_id: DepositId,
        caller: Address,
    },
    /// A depositor pulled a deposit that never left the vault.
    EmergencyWithdrawRequested {
        deposit_id: DepositId,
        caller: Address,
    },
    /// The vault executed a payout.
    Withdrawn {
        deposit_id: DepositId,
        recipient: Address,
    },
}

impl DepositLifecycle {
    /// Apply a single vault event.
    ///
    /// Returns the payout for events that close a position.
    pub async fn handle_event(&self, event: VaultEvent) -> Result<Option<Payout>, VaultError> {
        match event {
            VaultEvent::Deposited {
                depositor,
                token,
                amount,
            } => {
                self.on_deposited(depositor, token, amount).await?;
                Ok(None)
            }
            VaultEvent::NotifyConfirmed {
                deposit_id,
                remote_session_ref,
                caller,
            } => {
                self.confirm_deposit(deposit_id, remote_session_ref, &caller)
                    .await?;
                Ok(None)
            }
            VaultEvent::NotifySettled {
                deposit_id,
                principal,
                yield_amount,
                caller,
            } => {
                self.receive_settlement(deposit_id, principal, yield_amount, &caller)
                    .await?;
                Ok(None)
            }
            VaultEvent::PayoutRequested { deposit_id, caller } => {
                Ok(Some(self.request_payout(deposit_id, &caller).await?))
            }
            VaultEvent::EmergencyWithdrawRequested { deposit_id, caller } => {
                Ok(Some(self.emergency_withdraw(deposit_id, &caller).await?))
            }
            VaultEvent::Withdrawn {
                deposit_id,
                recipient,
            } => {
                self.confirm_withdrawal(deposit_id, &recipient).await?;
                tracing::info!(deposit_id = %deposit_id, recipient = %recipient, "withdrawal executed");
                Ok(None)
            }
        }
    }

    /// Consume vault events until the sender side is dropped.
    ///
    /// A rejected event is logged and skipped. Payouts go to `payouts`.
    pub async fn run(&self, mut events: mpsc::Receiver<VaultEvent>, payouts: mpsc::Sender<Payout>) {
        tracing::info!("vault event intake started");
        while let Some(event) = events.recv().await {
            match self.handle_event(event.clone()).await {
                Ok(Some(payout)) => {
                    let deposit_id = payout.deposit_id;
                    if payouts.send(payout).await.is_err() {
                        tracing::warn!(deposit_id = %deposit_id, "payout output closed, dropping payout");
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(event = ?event, error = %e, "vault event rejected"),
            }
        }
        tracing::info!("vault event intake stopped");
    }
}
