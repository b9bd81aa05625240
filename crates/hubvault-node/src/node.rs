//! The HubVault node orchestrator.
//!
//! Ties together the layers: coordinator connection, channel ledger and
//! deposit lifecycle. Vault events are fed through an mpsc channel and
//! applied in a background task; the payouts it computes come back on a
//! second channel.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use hubvault_client::{ClientEvent, ProtocolClient};
use hubvault_core::Address;
use hubvault_crypto::{KeyPair, MessageSigner};
use hubvault_ledger::{ChannelLedger, InMemoryCoordinator, SessionCoordinator};
use hubvault_vault::{DepositLifecycle, Payout, VaultEvent};

use crate::config::HubConfig;

/// Capacity of the vault event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The full HubVault node.
pub struct HubNode {
    /// Node configuration.
    config: HubConfig,
    /// Signs every frame sent to the coordinator.
    signer: Arc<MessageSigner>,
    /// Coordinator connection (None in offline mode).
    client: Option<ProtocolClient>,
    /// Deposit lifecycle, available after `start`.
    lifecycle: Option<Arc<DepositLifecycle>>,
    /// Feeds vault events to the lifecycle task.
    event_tx: Option<mpsc::Sender<VaultEvent>>,
    /// Payouts computed by the lifecycle task, until someone takes them.
    payout_rx: Option<mpsc::Receiver<Payout>>,
    /// Receives connection events from the client.
    client_events: Option<broadcast::Receiver<ClientEvent>>,
}

impl HubNode {
    /// Create a new node with the given config.
    pub fn new(config: HubConfig) -> Result<Self> {
        config.validate()?;
        let keypair = if let Some(ref path) = config.identity.keypair_path {
            Self::load_or_generate_keypair(path)?
        } else {
            tracing::info!("generating ephemeral keypair");
            KeyPair::generate()
        };
        let signer = Arc::new(MessageSigner::new(keypair));
        tracing::info!(address = %signer.address(), "HubVault node created");

        Ok(Self {
            config,
            signer,
            client: None,
            lifecycle: None,
            event_tx: None,
            payout_rx: None,
            client_events: None,
        })
    }

    /// The node's wallet address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Connect to the coordinator (unless `offline`), build the ledger and
    /// lifecycle, and start the vault event task.
    ///
    /// Offline mode keeps sessions in an in-process coordinator.
    pub async fn start(&mut self, offline: bool) -> Result<()> {
        tracing::info!(offline, "starting HubVault node");

        let coordinator: Arc<dyn SessionCoordinator> = if offline {
            Arc::new(InMemoryCoordinator::new())
        } else {
            let client = ProtocolClient::with_websocket(self.config.client.clone(), self.signer.clone());
            // Subscribe first so the initial connection events are not missed.
            self.client_events = Some(client.subscribe());
            client.connect().await?;
            tracing::info!(url = %self.config.client.url, "connected to coordinator");
            self.client = Some(client.clone());
            Arc::new(client)
        };

        let ledger = Arc::new(ChannelLedger::new(coordinator, self.config.ledger.clone()));
        let lifecycle = Arc::new(DepositLifecycle::new(ledger, self.config.vault.clone()));

        let (event_tx, event_rx) = mpsc::channel::<VaultEvent>(EVENT_CHANNEL_CAPACITY);
        let (payout_tx, payout_rx) = mpsc::channel::<Payout>(EVENT_CHANNEL_CAPACITY);
        let task_lifecycle = lifecycle.clone();
        tokio::spawn(async move {
            task_lifecycle.run(event_rx, payout_tx).await;
        });

        self.lifecycle = Some(lifecycle);
        self.event_tx = Some(event_tx);
        self.payout_rx = Some(payout_rx);
        Ok(())
    }

    /// Sender for vault events.
    pub fn event_sender(&self) -> Option<mpsc::Sender<VaultEvent>> {
        self.event_tx.clone()
    }

    pub fn lifecycle(&self) -> Option<Arc<DepositLifecycle>> {
        self.lifecycle.clone()
    }

    /// Take the payout stream. Only the first caller gets it.
    pub fn take_payouts(&mut self) -> Option<mpsc::Receiver<Payout>> {
        self.payout_rx.take()
    }

    /// Write each payout to stdout as one JSON line.
    pub fn spawn_stdout_payouts(&mut self) -> Result<()> {
        let mut payouts = self
            .take_payouts()
            .ok_or_else(|| anyhow::anyhow!("node not started or payouts already taken"))?;
        tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(payout) = payouts.recv().await {
                let line = match serde_json::to_string(&payout) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!(deposit_id = %payout.deposit_id, error = %e, "failed to encode payout");
                        continue;
                    }
                };
                tracing::info!(deposit_id = %payout.deposit_id, payout = payout.payout, "emitting payout");
                let written = async {
                    stdout.write_all(line.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await
                };
                if let Err(e) = written.await {
                    tracing::error!(error = %e, "failed to write payout");
                    break;
                }
            }
        });
        Ok(())
    }

    /// Read vault events as JSON lines from stdin.
    pub fn spawn_stdin_intake(&self) -> Result<()> {
        let tx = self
            .event_tx
            .clone()
            .ok_or_else(|| anyhow::anyhow!("node not started"))?;
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<VaultEvent>(&line) {
                            Ok(event) => {
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "ignoring malformed vault event"),
                        }
                    }
                    Ok(None) => {
                        tracing::info!("vault event input closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to read vault events");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    /// Run the node's main loop: watches the coordinator connection.
    ///
    /// Returns an error once reconnection is exhausted. In offline mode this
    /// only returns when cancelled.
    pub async fn run(&mut self) -> Result<()> {
        let Some(mut events) = self.client_events.take() else {
            std::future::pending::<()>().await;
            return Ok(());
        };

        tracing::info!("entering main event loop");
        loop {
            match events.recv().await {
                Ok(ClientEvent::ReconnectExhausted { attempts }) => {
                    tracing::error!(attempts, "coordinator unreachable, giving up");
                    anyhow::bail!("reconnection exhausted after {} attempts", attempts);
                }
                Ok(event) => Self::handle_client_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("client event channel closed");
                    return Ok(());
                }
            }
        }
    }

    fn handle_client_event(event: &ClientEvent) {
        match event {
            ClientEvent::Connected => tracing::debug!("transport connected"),
            ClientEvent::Authenticated { session_expires_at } => {
                tracing::info!(expires_at = session_expires_at, "coordinator session authenticated")
            }
            ClientEvent::Disconnected { reason } => {
                tracing::warn!(reason = %reason, "coordinator connection lost")
            }
            ClientEvent::Reconnecting { attempt, delay } => {
                tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting")
            }
            ClientEvent::Notification { method, .. } => {
                tracing::debug!(method = %method, "coordinator notification")
            }
            ClientEvent::ReconnectExhausted { .. } => {}
        }
    }

    /// Gracefully shut down the node.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("shutting down HubVault node");
        // Dropping the sender ends the lifecycle task once queued events drain.
        self.event_tx = None;
        if let Some(client) = self.client.take() {
            client.disconnect().await;
        }
        Ok(())
    }

    /// Load a hex-encoded key seed, or generate one and save it.
    fn load_or_generate_keypair(path: &Path) -> Result<KeyPair> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let keypair = KeyPair::from_hex(&contents)
                .map_err(|e| anyhow::anyhow!("failed to decode keypair: {}", e))?;
            tracing::info!(path = %path.display(), "loaded keypair from disk");
            Ok(keypair)
        } else {
            let keypair = KeyPair::generate();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, keypair.to_hex())?;
            tracing::info!(path = %path.display(), "generated and saved new keypair");
            Ok(keypair)
        }
    }
}
