use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use hubvault_core::{
    Address, Allocation, DepositEvent, DepositStateMachine, DepositStatus, VaultConfig,
};
use hubvault_ledger::{ChannelLedger, SessionId};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::VaultError;
use crate::types::{protocol_fee, Deposit, DepositId, Payout};

/// Drives vault deposits through the hub and back.
///
/// Each deposit gets its own ledger session, opened by `send_to_hub` and
/// finalized by `receive_settlement`. Calls on one deposit are serialized;
/// distinct deposits proceed in parallel. Lookups read the last committed
/// record and never wait on an in-flight call.
pub struct DepositLifecycle {
    ledger: Arc<ChannelLedger>,
    config: VaultConfig,
    /// Committed deposit records.
    deposits: DashMap<DepositId, Deposit>,
    /// Held for the whole of each state-changing call on a deposit.
    locks: DashMap<DepositId, Arc<Mutex<()>>>,
    next_id: AtomicU64,
}

impl DepositLifecycle {
    pub fn new(ledger: Arc<ChannelLedger>, config: VaultConfig) -> Self {
        Self {
            ledger,
            config,
            deposits: DashMap::new(),
            locks: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<ChannelLedger> {
        &self.ledger
    }

    /// Record a new PENDING deposit.
    ///
    /// With a hub configured and `auto_send` on, the deposit is forwarded
    /// right away. A failed forward is logged and the deposit stays PENDING.
    pub async fn on_deposited(
        &self,
        depositor: Address,
        token: impl Into<String>,
        amount: u128,
    ) -> Result<DepositId, VaultError> {
        if amount == 0 {
            return Err(VaultError::InvalidAmount("deposit amount must be positive".into()));
        }
        let token = token.into();
        let id = DepositId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.locks.insert(id, Arc::new(Mutex::new(())));
        self.deposits
            .insert(id, Deposit::new(id, depositor.clone(), token.clone(), amount));
        tracing::info!(deposit_id = %id, depositor = %depositor, token = %token, amount, "deposit recorded");

        if self.config.auto_send && self.config.hub_address.is_some() {
            if let Err(e) = self.send_to_hub(id).await {
                tracing::warn!(deposit_id = %id, error = %e, "forwarding deposit to hub failed");
            }
        }
        Ok(id)
    }

    /// Open the deposit's hub session with `[depositor: amount, hub: 0]`.
    pub async fn send_to_hub(&self, id: DepositId) -> Result<SessionId, VaultError> {
        let (_guard, mut deposit) = self.lock(id).await?;
        let next = next_status(&deposit, DepositEvent::SendToHub)?;
        let hub = self
            .config
            .hub_address
            .clone()
            .ok_or(VaultError::RemoteNotConfigured)?;

        let (session_id, reused) = self
            .ledger
            .open_or_reuse(
                &deal_key(id),
                [deposit.depositor.clone(), hub.clone()],
                [
                    Allocation::new(deposit.depositor.clone(), deposit.token.clone(), deposit.amount),
                    Allocation::new(hub, deposit.token.clone(), 0),
                ],
            )
            .await?;

        deposit.status = next;
        deposit.session_id = Some(session_id.clone());
        self.commit(deposit);
        tracing::info!(deposit_id = %id, session_id = %session_id, reused, "deposit sent to hub");
        Ok(session_id)
    }

    /// The coordinator acknowledged the deposit's session.
    pub async fn confirm_deposit(
        &self,
        id: DepositId,
        remote_session_ref: impl Into<String>,
        caller: &Address,
    ) -> Result<(), VaultError> {
        self.authorize_coordinator(caller)?;
        let (_guard, mut deposit) = self.lock(id).await?;
        let next = next_status(&deposit, DepositEvent::ConfirmDeposit)?;

        let remote_session_ref = remote_session_ref.into();
        tracing::info!(deposit_id = %id, remote_ref = %remote_session_ref, "deposit confirmed");
        deposit.remote_session_ref = Some(remote_session_ref);
        deposit.status = next;
        self.commit(deposit);
        Ok(())
    }

    /// Record the settlement outcome and finalize the deposit's session.
    ///
    /// `principal` and `yield_amount` are what the payout is computed from.
    pub async fn receive_settlement(
        &self,
        id: DepositId,
        principal: u128,
        yield_amount: u128,
        caller: &Address,
    ) -> Result<(), VaultError> {
        self.authorize_coordinator(caller)?;
        let (_guard, mut deposit) = self.lock(id).await?;
        let next = next_status(&deposit, DepositEvent::ReceiveSettlement)?;
        let session_id = deposit
            .session_id
            .clone()
            .ok_or(VaultError::MissingSession(id))?;
        let total = principal
            .checked_add(yield_amount)
            .ok_or_else(|| VaultError::InvalidAmount("principal + yield overflows".into()))?;

        let state = self.ledger.get_state(&session_id).await?;
        let hub = state.participants[1].clone();
        self.ledger
            .finalize(
                &session_id,
                [
                    Allocation::new(deposit.depositor.clone(), deposit.token.clone(), total),
                    Allocation::new(hub, deposit.token.clone(), 0),
                ],
            )
            .await?;

        deposit.principal = Some(principal);
        deposit.yield_amount = Some(yield_amount);
        deposit.status = next;
        self.commit(deposit);
        tracing::info!(deposit_id = %id, principal, yield_amount, "settlement received");
        Ok(())
    }

    /// Pay out principal plus yield, less the protocol fee on yield.
    pub async fn withdraw(&self, id: DepositId, caller: &Address) -> Result<Payout, VaultError> {
        let (_guard, mut deposit) = self.lock(id).await?;
        check_owner(&deposit, caller)?;
        let next = next_status(&deposit, DepositEvent::Withdraw)?;

        let principal = deposit.principal.unwrap_or_default();
        let yield_amount = deposit.yield_amount.unwrap_or_default();
        let expected = principal
            .checked_add(yield_amount)
            .ok_or_else(|| VaultError::InvalidAmount("principal + yield overflows".into()))?;
        let session_id = deposit
            .session_id
            .clone()
            .ok_or(VaultError::MissingSession(id))?;

        let state = self.ledger.get_state(&session_id).await?;
        let actual = state.allocation_of(&deposit.depositor);
        if !state.is_final() || actual != Some(expected) {
            tracing::error!(
                deposit_id = %id,
                expected,
                actual = ?actual,
                final_state = state.is_final(),
                "ledger does not match recorded settlement"
            );
            return Err(VaultError::SettlementMismatch { id, expected, actual });
        }

        let fee = protocol_fee(yield_amount, self.config.fee_bps);
        let payout = Payout {
            deposit_id: id,
            recipient: deposit.depositor.clone(),
            token: deposit.token.clone(),
            payout: expected - fee,
            fee,
            fee_recipient: self.config.fee_recipient.clone(),
            retire_position_token: true,
        };

        deposit.status = next;
        deposit.withdrawn_at = Some(Utc::now());
        self.commit(deposit);
        tracing::info!(deposit_id = %id, payout = payout.payout, fee, "deposit withdrawn");
        Ok(payout)
    }

    /// Return a PENDING deposit in full. No fee applies.
    pub async fn emergency_withdraw(
        &self,
        id: DepositId,
        caller: &Address,
    ) -> Result<Payout, VaultError> {
        let (_guard, mut deposit) = self.lock(id).await?;
        check_owner(&deposit, caller)?;
        let next = next_status(&deposit, DepositEvent::EmergencyWithdraw)?;

        deposit.status = next;
        deposit.withdrawn_at = Some(Utc::now());
        tracing::warn!(deposit_id = %id, amount = deposit.amount, "emergency withdrawal");

        let payout = Payout {
            deposit_id: id,
            recipient: deposit.depositor.clone(),
            token: deposit.token.clone(),
            payout: deposit.amount,
            fee: 0,
            fee_recipient: None,
            retire_position_token: true,
        };
        self.commit(deposit);
        Ok(payout)
    }

    /// Payout query used by the vault when a depositor closes a position.
    pub async fn request_payout(&self, id: DepositId, caller: &Address) -> Result<Payout, VaultError> {
        self.withdraw(id, caller).await
    }

    /// Mark a WITHDRAWN deposit's payout as executed by the vault.
    pub async fn confirm_withdrawal(
        &self,
        id: DepositId,
        recipient: &Address,
    ) -> Result<(), VaultError> {
        let (_guard, mut deposit) = self.lock(id).await?;
        if deposit.status != DepositStatus::Withdrawn {
            return Err(VaultError::InvalidStatus {
                id,
                expected: DepositStatus::Withdrawn,
                actual: deposit.status,
            });
        }
        check_owner(&deposit, recipient)?;
        deposit.withdrawal_confirmed = true;
        self.commit(deposit);
        Ok(())
    }

    pub fn get_deposit(&self, id: DepositId) -> Option<Deposit> {
        self.deposits.get(&id).map(|entry| entry.value().clone())
    }

    /// All deposits made by `depositor`, oldest first.
    pub fn deposits_by(&self, depositor: &Address) -> Vec<Deposit> {
        let mut found: Vec<Deposit> = self
            .deposits
            .iter()
            .filter(|entry| &entry.depositor == depositor)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by_key(|d| d.id);
        found
    }

    pub fn deposit_count(&self) -> usize {
        self.deposits.len()
    }

    /// Take the deposit's lock and a working copy of its record.
    ///
    /// Changes become visible only through `commit`, so a call that fails
    /// part way leaves the record untouched.
    async fn lock(&self, id: DepositId) -> Result<(OwnedMutexGuard<()>, Deposit), VaultError> {
        let lock = self
            .locks
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(VaultError::DepositNotFound(id))?;
        let guard = lock.lock_owned().await;
        let deposit = self
            .get_deposit(id)
            .ok_or(VaultError::DepositNotFound(id))?;
        Ok((guard, deposit))
    }

    fn commit(&self, deposit: Deposit) {
        self.deposits.insert(deposit.id, deposit);
    }

    fn authorize_coordinator(&self, caller: &Address) -> Result<(), VaultError> {
        let allowed = self.config.coordinator.as_ref() == Some(caller)
            || self.config.admin.as_ref() == Some(caller);
        if !allowed {
            tracing::warn!(caller = %caller, "rejected coordinator-only call");
            return Err(VaultError::Unauthorized(caller.clone()));
        }
        Ok(())
    }
}

/// Ledger group key for a deposit.
fn deal_key(id: DepositId) -> String {
    format!("deposit-{}", id)
}

fn next_status(deposit: &Deposit, event: DepositEvent) -> Result<DepositStatus, VaultError> {
    DepositStateMachine::transition(deposit.status, event).map_err(|_| VaultError::InvalidStatus {
        id: deposit.id,
        expected: event.required_status(),
        actual: deposit.status,
    })
}

fn check_owner(deposit: &Deposit, caller: &Address) -> Result<(), VaultError> {
    if &deposit.depositor != caller {
        return Err(VaultError::UnauthorizedWithdrawal {
            id: deposit.id,
            caller: caller.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubvault_ledger::{InMemoryCoordinator, LedgerConfig, LedgerError};
    use std::time::Duration;

    fn addr(b: u8) -> Address {
        Address::from_public_key_bytes(&[b; 32])
    }

    fn depositor() -> Address {
        addr(1)
    }
    fn hub() -> Address {
        addr(2)
    }
    fn coordinator() -> Address {
        addr(3)
    }
    fn admin() -> Address {
        addr(4)
    }

    fn vault_config() -> VaultConfig {
        VaultConfig {
            fee_bps: 100,
            fee_recipient: Some(addr(9)),
            hub_address: Some(hub()),
            coordinator: Some(coordinator()),
            admin: Some(admin()),
            auto_send: false,
        }
    }

    fn setup(config: VaultConfig) -> (DepositLifecycle, Arc<InMemoryCoordinator>) {
        let remote = Arc::new(InMemoryCoordinator::new());
        let ledger = Arc::new(ChannelLedger::new(remote.clone(), LedgerConfig::default()));
        (DepositLifecycle::new(ledger, config), remote)
    }

    async fn status(lifecycle: &DepositLifecycle, id: DepositId) -> DepositStatus {
        lifecycle.get_deposit(id).unwrap().status
    }

    #[tokio::test]
    async fn test_full_lifecycle_with_fee() {
        let (lifecycle, remote) = setup(vault_config());
        let id = lifecycle.on_deposited(depositor(), "usdc", 1_000_000).await.unwrap();
        assert_eq!(id, DepositId(1));
        assert_eq!(status(&lifecycle, id).await, DepositStatus::Pending);

        let session_id = lifecycle.send_to_hub(id).await.unwrap();
        assert_eq!(status(&lifecycle, id).await, DepositStatus::Sent);
        let opened = remote.remote_allocations(&session_id).unwrap();
        assert_eq!(opened[0].amount, 1_000_000);
        assert_eq!(opened[1].participant, hub());
        assert_eq!(opened[1].amount, 0);

        lifecycle
            .confirm_deposit(id, "remote-42", &coordinator())
            .await
            .unwrap();
        assert_eq!(status(&lifecycle, id).await, DepositStatus::Confirmed);

        lifecycle
            .receive_settlement(id, 1_000_000, 100_000, &coordinator())
            .await
            .unwrap();
        let deposit = lifecycle.get_deposit(id).unwrap();
        assert_eq!(deposit.status, DepositStatus::Settled);
        assert_eq!(deposit.remote_session_ref.as_deref(), Some("remote-42"));

        let state = lifecycle.ledger().get_state(&session_id).await.unwrap();
        assert!(state.is_final());
        assert_eq!(state.allocation_of(&depositor()), Some(1_100_000));

        let payout = lifecycle.withdraw(id, &depositor()).await.unwrap();
        assert_eq!(payout.fee, 1_000);
        assert_eq!(payout.payout, 1_099_000);
        assert_eq!(payout.fee_recipient, Some(addr(9)));
        assert!(payout.retire_position_token);

        let deposit = lifecycle.get_deposit(id).unwrap();
        assert_eq!(deposit.status, DepositStatus::Withdrawn);
        assert!(deposit.withdrawn_at.is_some());
    }

    #[tokio::test]
    async fn test_auto_send() {
        let (lifecycle, remote) = setup(VaultConfig {
            auto_send: true,
            ..vault_config()
        });
        let id = lifecycle.on_deposited(depositor(), "usdc", 10).await.unwrap();
        let deposit = lifecycle.get_deposit(id).unwrap();
        assert_eq!(deposit.status, DepositStatus::Sent);
        assert!(deposit.session_id.is_some());
        assert_eq!(remote.session_count(), 1);
    }

    #[tokio::test]
    async fn test_auto_send_failure_keeps_pending() {
        let (lifecycle, remote) = setup(VaultConfig {
            auto_send: true,
            ..vault_config()
        });
        remote.set_unavailable(true);

        let id = lifecycle.on_deposited(depositor(), "usdc", 10).await.unwrap();
        let deposit = lifecycle.get_deposit(id).unwrap();
        assert_eq!(deposit.status, DepositStatus::Pending);
        assert!(deposit.session_id.is_none());

        remote.set_unavailable(false);
        lifecycle.send_to_hub(id).await.unwrap();
        assert_eq!(status(&lifecycle, id).await, DepositStatus::Sent);
    }

    #[tokio::test]
    async fn test_send_without_hub() {
        let (lifecycle, remote) = setup(VaultConfig {
            hub_address: None,
            auto_send: true,
            ..vault_config()
        });
        let id = lifecycle.on_deposited(depositor(), "usdc", 10).await.unwrap();
        assert_eq!(status(&lifecycle, id).await, DepositStatus::Pending);

        let result = lifecycle.send_to_hub(id).await;
        assert!(matches!(result, Err(VaultError::RemoteNotConfigured)));
        assert_eq!(status(&lifecycle, id).await, DepositStatus::Pending);
        assert_eq!(remote.call_count(), 0);
    }

    #[tokio::test]
    async fn test_send_twice_rejected() {
        let (lifecycle, remote) = setup(vault_config());
        let id = lifecycle.on_deposited(depositor(), "usdc", 10).await.unwrap();
        lifecycle.send_to_hub(id).await.unwrap();

        let result = lifecycle.send_to_hub(id).await;
        assert!(matches!(
            result,
            Err(VaultError::InvalidStatus {
                expected: DepositStatus::Pending,
                actual: DepositStatus::Sent,
                ..
            })
        ));
        assert_eq!(remote.session_count(), 1);
    }

    #[tokio::test]
    async fn test_emergency_withdraw() {
        let (lifecycle, _remote) = setup(vault_config());
        let id = lifecycle.on_deposited(depositor(), "usdc", 500_000).await.unwrap();

        let payout = lifecycle.emergency_withdraw(id, &depositor()).await.unwrap();
        assert_eq!(payout.payout, 500_000);
        assert_eq!(payout.fee, 0);
        assert_eq!(status(&lifecycle, id).await, DepositStatus::Withdrawn);

        let again = lifecycle.send_to_hub(id).await;
        assert!(matches!(again, Err(VaultError::InvalidStatus { .. })));
    }

    #[tokio::test]
    async fn test_emergency_withdraw_after_send_rejected() {
        let (lifecycle, _remote) = setup(vault_config());
        let id = lifecycle.on_deposited(depositor(), "usdc", 500_000).await.unwrap();
        lifecycle.send_to_hub(id).await.unwrap();

        let result = lifecycle.emergency_withdraw(id, &depositor()).await;
        assert!(matches!(result, Err(VaultError::InvalidStatus { .. })));
        assert_eq!(status(&lifecycle, id).await, DepositStatus::Sent);
    }

    #[tokio::test]
    async fn test_coordinator_authorization() {
        let (lifecycle, _remote) = setup(vault_config());
        let id = lifecycle.on_deposited(depositor(), "usdc", 10).await.unwrap();
        lifecycle.send_to_hub(id).await.unwrap();

        let result = lifecycle.confirm_deposit(id, "r", &depositor()).await;
        assert!(matches!(result, Err(VaultError::Unauthorized(_))));
        let deposit = lifecycle.get_deposit(id).unwrap();
        assert_eq!(deposit.status, DepositStatus::Sent);
        assert!(deposit.remote_session_ref.is_none());

        lifecycle.confirm_deposit(id, "r", &admin()).await.unwrap();
        assert_eq!(status(&lifecycle, id).await, DepositStatus::Confirmed);

        let result = lifecycle.receive_settlement(id, 10, 1, &hub()).await;
        assert!(matches!(result, Err(VaultError::Unauthorized(_))));
        assert_eq!(status(&lifecycle, id).await, DepositStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_no_coordinator_configured_rejects_everyone() {
        let (lifecycle, _remote) = setup(VaultConfig {
            coordinator: None,
            admin: None,
            ..vault_config()
        });
        let id = lifecycle.on_deposited(depositor(), "usdc", 10).await.unwrap();
        lifecycle.send_to_hub(id).await.unwrap();
        let result = lifecycle.confirm_deposit(id, "r", &coordinator()).await;
        assert!(matches!(result, Err(VaultError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_settlement_out_of_order() {
        let (lifecycle, _remote) = setup(vault_config());
        let id = lifecycle.on_deposited(depositor(), "usdc", 10).await.unwrap();
        lifecycle.send_to_hub(id).await.unwrap();

        let result = lifecycle.receive_settlement(id, 10, 1, &coordinator()).await;
        assert!(matches!(
            result,
            Err(VaultError::InvalidStatus {
                expected: DepositStatus::Confirmed,
                actual: DepositStatus::Sent,
                ..
            })
        ));
        let deposit = lifecycle.get_deposit(id).unwrap();
        assert!(deposit.principal.is_none());
    }

    #[tokio::test]
    async fn test_withdraw_checks() {
        let (lifecycle, _remote) = setup(vault_config());
        let id = lifecycle.on_deposited(depositor(), "usdc", 10).await.unwrap();

        let early = lifecycle.withdraw(id, &depositor()).await;
        assert!(matches!(early, Err(VaultError::InvalidStatus { .. })));

        lifecycle.send_to_hub(id).await.unwrap();
        lifecycle.confirm_deposit(id, "r", &coordinator()).await.unwrap();
        lifecycle
            .receive_settlement(id, 10, 0, &coordinator())
            .await
            .unwrap();

        let stranger = lifecycle.withdraw(id, &addr(7)).await;
        assert!(matches!(stranger, Err(VaultError::UnauthorizedWithdrawal { .. })));
        assert_eq!(status(&lifecycle, id).await, DepositStatus::Settled);

        let payout = lifecycle.request_payout(id, &depositor()).await.unwrap();
        assert_eq!(payout.payout, 10);
        assert_eq!(payout.fee, 0);

        let twice = lifecycle.withdraw(id, &depositor()).await;
        assert!(matches!(twice, Err(VaultError::InvalidStatus { .. })));
    }

    #[tokio::test]
    async fn test_settlement_mismatch() {
        let (lifecycle, _remote) = setup(vault_config());
        let id = lifecycle.on_deposited(depositor(), "usdc", 100).await.unwrap();
        lifecycle.send_to_hub(id).await.unwrap();
        lifecycle.confirm_deposit(id, "r", &coordinator()).await.unwrap();
        lifecycle
            .receive_settlement(id, 100, 5, &coordinator())
            .await
            .unwrap();

        // Diverge the recorded yield from what the ledger finalized.
        lifecycle.deposits.get_mut(&id).unwrap().yield_amount = Some(50);

        let result = lifecycle.withdraw(id, &depositor()).await;
        assert!(matches!(
            result,
            Err(VaultError::SettlementMismatch {
                expected: 150,
                actual: Some(105),
                ..
            })
        ));
        assert_eq!(status(&lifecycle, id).await, DepositStatus::Settled);
    }

    #[tokio::test]
    async fn test_settlement_remote_failure_leaves_confirmed() {
        let (lifecycle, remote) = setup(vault_config());
        let id = lifecycle.on_deposited(depositor(), "usdc", 100).await.unwrap();
        lifecycle.send_to_hub(id).await.unwrap();
        lifecycle.confirm_deposit(id, "r", &coordinator()).await.unwrap();

        remote.set_unavailable(true);
        let result = lifecycle.receive_settlement(id, 100, 5, &coordinator()).await;
        assert!(matches!(result, Err(VaultError::Ledger(LedgerError::Remote(_)))));
        let deposit = lifecycle.get_deposit(id).unwrap();
        assert_eq!(deposit.status, DepositStatus::Confirmed);
        assert!(deposit.yield_amount.is_none());
    }

    #[tokio::test]
    async fn test_unknown_and_zero_deposits() {
        let (lifecycle, _remote) = setup(vault_config());
        assert!(matches!(
            lifecycle.send_to_hub(DepositId(99)).await,
            Err(VaultError::DepositNotFound(DepositId(99)))
        ));
        assert!(lifecycle.get_deposit(DepositId(99)).is_none());
        assert!(matches!(
            lifecycle.on_deposited(depositor(), "usdc", 0).await,
            Err(VaultError::InvalidAmount(_))
        ));
        assert_eq!(lifecycle.deposit_count(), 0);
    }

    #[tokio::test]
    async fn test_each_deposit_gets_its_own_session() {
        let (lifecycle, remote) = setup(vault_config());
        let a = lifecycle.on_deposited(depositor(), "usdc", 10).await.unwrap();
        let b = lifecycle.on_deposited(depositor(), "usdc", 20).await.unwrap();
        let sa = lifecycle.send_to_hub(a).await.unwrap();
        let sb = lifecycle.send_to_hub(b).await.unwrap();
        assert_ne!(sa, sb);
        assert_eq!(remote.session_count(), 2);
    }

    #[tokio::test]
    async fn test_deposits_by() {
        let (lifecycle, _remote) = setup(vault_config());
        let a = lifecycle.on_deposited(depositor(), "usdc", 10).await.unwrap();
        lifecycle.on_deposited(addr(5), "usdc", 20).await.unwrap();
        let c = lifecycle.on_deposited(depositor(), "weth", 30).await.unwrap();

        let mine = lifecycle.deposits_by(&depositor());
        let ids: Vec<_> = mine.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![a, c]);
        assert!(lifecycle.deposits_by(&addr(6)).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_confirmations_apply_once() {
        let (lifecycle, _remote) = setup(vault_config());
        let lifecycle = Arc::new(lifecycle);
        let id = lifecycle.on_deposited(depositor(), "usdc", 10).await.unwrap();
        lifecycle.send_to_hub(id).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let lifecycle = lifecycle.clone();
            handles.push(tokio::spawn(async move {
                lifecycle
                    .confirm_deposit(id, format!("r{}", i), &coordinator())
                    .await
                    .is_ok()
            }));
        }
        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }
        assert_eq!(succeeded, 1);
        assert_eq!(status(&lifecycle, id).await, DepositStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_lookups_do_not_wait_on_busy_deposit() {
        let (lifecycle, _remote) = setup(vault_config());
        let id = lifecycle.on_deposited(depositor(), "usdc", 10).await.unwrap();

        // Stands in for a send_to_hub blocked on the coordinator.
        let lock = lifecycle.locks.get(&id).unwrap().value().clone();
        let _busy = lock.lock_owned().await;

        let deposit = lifecycle.get_deposit(id).unwrap();
        assert_eq!(deposit.status, DepositStatus::Pending);
        assert_eq!(lifecycle.deposits_by(&depositor()).len(), 1);

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), lifecycle.send_to_hub(id)).await;
        assert!(blocked.is_err(), "state changes still wait for the deposit lock");
    }

    #[tokio::test]
    async fn test_failed_settlement_is_not_visible() {
        let (lifecycle, remote) = setup(vault_config());
        let id = lifecycle.on_deposited(depositor(), "usdc", 100).await.unwrap();
        lifecycle.send_to_hub(id).await.unwrap();
        lifecycle.confirm_deposit(id, "r", &coordinator()).await.unwrap();
        let before = lifecycle.get_deposit(id).unwrap();

        remote.set_unavailable(true);
        assert!(lifecycle
            .receive_settlement(id, 100, 5, &coordinator())
            .await
            .is_err());
        assert_eq!(lifecycle.get_deposit(id).unwrap(), before);
    }

    #[tokio::test]
    async fn test_confirm_withdrawal() {
        let (lifecycle, _remote) = setup(vault_config());
        let id = lifecycle.on_deposited(depositor(), "usdc", 10).await.unwrap();

        let early = lifecycle.confirm_withdrawal(id, &depositor()).await;
        assert!(matches!(early, Err(VaultError::InvalidStatus { .. })));

        lifecycle.emergency_withdraw(id, &depositor()).await.unwrap();
        let wrong = lifecycle.confirm_withdrawal(id, &addr(8)).await;
        assert!(matches!(wrong, Err(VaultError::UnauthorizedWithdrawal { .. })));

        lifecycle.confirm_withdrawal(id, &depositor()).await.unwrap();
        assert!(lifecycle.get_deposit(id).unwrap().withdrawal_confirmed);
    }
}
