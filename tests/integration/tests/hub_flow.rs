//! Integration test: the full stack against a WebSocket coordinator.
//!
//! Runs the protocol client, channel ledger and deposit lifecycle together
//! over a real loopback connection.

use std::sync::Arc;
use std::time::Duration;

use hubvault_client::{ClientError, ClientEvent, ConnectionState, ProtocolClient};
use hubvault_core::{Address, Allocation, ClientConfig, DepositStatus, VaultConfig};
use hubvault_crypto::{KeyPair, MessageSigner};
use hubvault_integration_tests::{MockCoordinator, VerifyMode};
use hubvault_ledger::{ChannelLedger, Intent, LedgerConfig, LedgerError, RemoteSessionStatus};
use hubvault_vault::DepositLifecycle;
use tokio::sync::broadcast;

fn addr(b: u8) -> Address {
    Address::from_public_key_bytes(&[b; 32])
}

fn client_config(url: &str) -> ClientConfig {
    ClientConfig {
        url: url.to_string(),
        reconnect_base_delay_ms: 50,
        max_reconnect_attempts: 3,
        request_timeout_ms: 5_000,
        connection_timeout_ms: 2_000,
        ..ClientConfig::default()
    }
}

fn client(config: ClientConfig) -> ProtocolClient {
    let signer = Arc::new(MessageSigner::new(KeyPair::generate()));
    ProtocolClient::with_websocket(config, signer)
}

async fn connected(coordinator: &MockCoordinator) -> ProtocolClient {
    let client = client(client_config(coordinator.url()));
    client.connect().await.expect("handshake should succeed");
    client
}

/// Wait for the first event matching `pred`.
async fn wait_for(
    rx: &mut broadcast::Receiver<ClientEvent>,
    pred: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for client event")
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_handshake_authenticates_wallet() {
    let coordinator = MockCoordinator::start("hubvault", VerifyMode::Accept).await.unwrap();
    let client = connected(&coordinator).await;

    assert_eq!(client.state(), ConnectionState::Authenticated);
    assert_eq!(coordinator.authenticated_wallets(), vec![client.address()]);

    let session = client.auth_session().await.expect("session recorded");
    assert_eq!(session.wallet, client.address());
    assert!(session.jwt_token.is_some());

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_wrong_application_domain_fails() {
    let coordinator = MockCoordinator::start("another-app", VerifyMode::Accept).await.unwrap();
    let client = client(client_config(coordinator.url()));

    let result = client.connect().await;
    assert!(matches!(result, Err(ClientError::AuthenticationFailed(_))));
    assert_ne!(client.state(), ConnectionState::Authenticated);
    assert!(coordinator.authenticated_wallets().is_empty());
}

#[tokio::test]
async fn test_refused_verify_fails() {
    let coordinator = MockCoordinator::start("hubvault", VerifyMode::Refuse).await.unwrap();
    let client = client(client_config(coordinator.url()));

    let result = client.connect().await;
    assert!(matches!(result, Err(ClientError::AuthenticationFailed(_))));
    assert!(client.auth_session().await.is_none());
}

#[tokio::test]
async fn test_request_before_connect() {
    let coordinator = MockCoordinator::start("hubvault", VerifyMode::Accept).await.unwrap();
    let client = client(client_config(coordinator.url()));
    let result = client.request("ping", vec![]).await;
    assert!(matches!(result, Err(ClientError::NotAuthenticated)));
}

#[tokio::test]
async fn test_remote_error_surfaces() {
    let coordinator = MockCoordinator::start("hubvault", VerifyMode::Accept).await.unwrap();
    let client = connected(&coordinator).await;

    let result = client.request("no_such_method", vec![]).await;
    assert!(matches!(result, Err(ClientError::RemoteError { code: 404, .. })));
    assert_eq!(client.pending_count(), 0);
}

// =========================================================================
// Ledger over the wire
// =========================================================================

#[tokio::test]
async fn test_ledger_versions_match_coordinator() {
    let coordinator = MockCoordinator::start("hubvault", VerifyMode::Accept).await.unwrap();
    let client = connected(&coordinator).await;
    let ledger = ChannelLedger::new(Arc::new(client.clone()), LedgerConfig::default());

    let (a, b) = (addr(1), addr(2));
    let session_id = ledger
        .create_session(
            [a.clone(), b.clone()],
            [Allocation::new(a.clone(), "usdc", 100), Allocation::new(b.clone(), "usdc", 0)],
        )
        .await
        .unwrap();
    assert_eq!(
        coordinator.sessions().remote_state(&session_id),
        Some((1, RemoteSessionStatus::Open))
    );

    for paid in [30u128, 60] {
        ledger
            .operate(
                &session_id,
                [
                    Allocation::new(a.clone(), "usdc", 100 - paid),
                    Allocation::new(b.clone(), "usdc", paid),
                ],
                None,
            )
            .await
            .unwrap();
    }
    let last = ledger
        .finalize(
            &session_id,
            [Allocation::new(a.clone(), "usdc", 40), Allocation::new(b.clone(), "usdc", 60)],
        )
        .await
        .unwrap();
    assert_eq!(last.version, 4);
    assert_eq!(last.intent, Intent::Finalize);
    assert_eq!(
        coordinator.sessions().remote_state(&session_id),
        Some((4, RemoteSessionStatus::Closed))
    );

    // Newest first.
    let history = ledger.get_history(&session_id, 10).await.unwrap();
    let versions: Vec<u64> = history.iter().map(|s| s.version).collect();
    assert_eq!(versions, vec![4, 3, 2, 1]);

    let again = ledger
        .operate(
            &session_id,
            [Allocation::new(a, "usdc", 0), Allocation::new(b, "usdc", 100)],
            None,
        )
        .await;
    assert!(matches!(again, Err(LedgerError::SessionAlreadyFinalized(_))));
}

#[tokio::test]
async fn test_concurrent_session_creation() {
    let coordinator = MockCoordinator::start("hubvault", VerifyMode::Accept).await.unwrap();
    let client = connected(&coordinator).await;
    let ledger = Arc::new(ChannelLedger::new(Arc::new(client), LedgerConfig::default()));

    let mut handles = Vec::new();
    for i in 0..10u8 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            let (a, b) = (addr(10 + i), addr(100 + i));
            ledger
                .create_session(
                    [a.clone(), b.clone()],
                    [Allocation::new(a, "usdc", u128::from(i) + 1), Allocation::new(b, "usdc", 0)],
                )
                .await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }
    ids.sort_by(|x, y| x.as_str().cmp(y.as_str()));
    ids.dedup();
    assert_eq!(ids.len(), 10);
    assert_eq!(coordinator.sessions().session_count(), 10);
}

// =========================================================================
// Deposit lifecycle end to end
// =========================================================================

#[tokio::test]
async fn test_full_deposit_flow() {
    let coordinator = MockCoordinator::start("hubvault", VerifyMode::Accept).await.unwrap();
    let client = connected(&coordinator).await;
    let ledger = Arc::new(ChannelLedger::new(Arc::new(client.clone()), LedgerConfig::default()));

    let depositor = addr(1);
    let hub_operator = addr(3);
    let lifecycle = DepositLifecycle::new(
        ledger.clone(),
        VaultConfig {
            fee_bps: 100,
            fee_recipient: Some(addr(9)),
            hub_address: Some(addr(2)),
            coordinator: Some(hub_operator.clone()),
            admin: None,
            auto_send: true,
        },
    );

    let id = lifecycle
        .on_deposited(depositor.clone(), "usdc", 1_000_000)
        .await
        .unwrap();
    let deposit = lifecycle.get_deposit(id).unwrap();
    assert_eq!(deposit.status, DepositStatus::Sent);
    let session_id = deposit.session_id.expect("session opened");
    assert_eq!(
        coordinator.sessions().remote_state(&session_id),
        Some((1, RemoteSessionStatus::Open))
    );

    lifecycle
        .confirm_deposit(id, session_id.as_str(), &hub_operator)
        .await
        .unwrap();
    lifecycle
        .receive_settlement(id, 1_000_000, 100_000, &hub_operator)
        .await
        .unwrap();
    assert_eq!(
        coordinator.sessions().remote_state(&session_id),
        Some((2, RemoteSessionStatus::Closed))
    );
    let remote = coordinator.sessions().remote_allocations(&session_id).unwrap();
    assert_eq!(remote[0].amount, 1_100_000);

    let payout = lifecycle.withdraw(id, &depositor).await.unwrap();
    assert_eq!(payout.fee, 1_000);
    assert_eq!(payout.payout, 1_099_000);
    assert_eq!(
        lifecycle.get_deposit(id).unwrap().status,
        DepositStatus::Withdrawn
    );
}

#[tokio::test]
async fn test_deposit_stays_pending_when_coordinator_rejects() {
    let coordinator = MockCoordinator::start("hubvault", VerifyMode::Accept).await.unwrap();
    let client = connected(&coordinator).await;
    let ledger = Arc::new(ChannelLedger::new(Arc::new(client), LedgerConfig::default()));
    let lifecycle = DepositLifecycle::new(
        ledger,
        VaultConfig {
            hub_address: Some(addr(2)),
            ..VaultConfig::default()
        },
    );

    coordinator.sessions().set_unavailable(true);
    let id = lifecycle.on_deposited(addr(1), "usdc", 500_000).await.unwrap();
    assert_eq!(
        lifecycle.get_deposit(id).unwrap().status,
        DepositStatus::Pending
    );

    let payout = lifecycle.emergency_withdraw(id, &addr(1)).await.unwrap();
    assert_eq!(payout.payout, 500_000);
    assert_eq!(payout.fee, 0);
}

// =========================================================================
// Reconnection
// =========================================================================

#[tokio::test]
async fn test_reconnects_after_connection_drop() {
    let coordinator = MockCoordinator::start("hubvault", VerifyMode::Accept).await.unwrap();
    let client = connected(&coordinator).await;
    let mut events = client.subscribe();

    coordinator.drop_connections();
    wait_for(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await;
    wait_for(&mut events, |e| matches!(e, ClientEvent::Authenticated { .. })).await;

    assert_eq!(client.state(), ConnectionState::Authenticated);
    assert_eq!(coordinator.connection_count(), 2);
    assert_eq!(coordinator.authenticated_wallets().len(), 2);

    // The new connection carries requests.
    let ledger = ChannelLedger::new(Arc::new(client.clone()), LedgerConfig::default());
    let (a, b) = (addr(1), addr(2));
    ledger
        .create_session(
            [a.clone(), b.clone()],
            [Allocation::new(a, "usdc", 1), Allocation::new(b, "usdc", 0)],
        )
        .await
        .unwrap();

    client.disconnect().await;
}

#[tokio::test]
async fn test_reconnect_exhausted_when_coordinator_gone() {
    let coordinator = MockCoordinator::start("hubvault", VerifyMode::Accept).await.unwrap();
    let client = connected(&coordinator).await;
    let mut events = client.subscribe();

    coordinator.stop();
    let event = wait_for(&mut events, |e| {
        matches!(e, ClientEvent::ReconnectExhausted { .. })
    })
    .await;
    assert!(matches!(event, ClientEvent::ReconnectExhausted { attempts: 3 }));
    assert_ne!(client.state(), ConnectionState::Authenticated);

    let result = client.request("ping", vec![]).await;
    assert!(result.is_err());
}
