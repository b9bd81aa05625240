use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CoreError;
use crate::types::{Address, Allowance};

/// Upper bound for the protocol fee, in basis points (10%).
pub const MAX_FEE_BPS: u16 = 1000;

/// Connection, handshake and retry settings for the protocol client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket URL of the settlement coordinator.
    #[serde(default = "default_url")]
    pub url: String,
    /// Application domain the auth typed-data signature is bound to.
    #[serde(default = "default_application")]
    pub application: String,
    /// Scope requested for the session key.
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Lifetime of an authenticated session (seconds).
    #[serde(default = "default_session_expiry_secs")]
    pub session_expiry_secs: u64,
    /// Reconnect attempts before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt (milliseconds).
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Backoff growth factor between attempts.
    #[serde(default = "default_reconnect_multiplier")]
    pub reconnect_multiplier: u32,
    /// Per-request response deadline (milliseconds).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Transport-open deadline (milliseconds).
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Spending caps requested during authentication.
    #[serde(default)]
    pub allowances: Vec<Allowance>,
}

fn default_url() -> String {
    "ws://127.0.0.1:8000/ws".into()
}
fn default_application() -> String {
    "hubvault".into()
}
fn default_scope() -> String {
    "app.deposits".into()
}
fn default_session_expiry_secs() -> u64 {
    3600
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_base_delay_ms() -> u64 {
    3000
}
fn default_reconnect_multiplier() -> u32 {
    2
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_connection_timeout_ms() -> u64 {
    10_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            application: default_application(),
            scope: default_scope(),
            session_expiry_secs: default_session_expiry_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_multiplier: default_reconnect_multiplier(),
            request_timeout_ms: default_request_timeout_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
            allowances: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// Reject values the client cannot operate with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.url.is_empty() {
            return Err(CoreError::InvalidConfig("client.url must not be empty".into()));
        }
        if self.application.is_empty() {
            return Err(CoreError::InvalidConfig(
                "client.application must not be empty".into(),
            ));
        }
        if self.request_timeout_ms == 0 || self.connection_timeout_ms == 0 {
            return Err(CoreError::InvalidConfig("timeouts must be non-zero".into()));
        }
        if self.reconnect_multiplier == 0 {
            return Err(CoreError::InvalidConfig(
                "client.reconnect_multiplier must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Deposit vault settings: fee policy and the identities the lifecycle trusts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Protocol fee on yield, in basis points (0–1000).
    #[serde(default)]
    pub fee_bps: u16,
    /// Who receives the protocol fee.
    #[serde(default)]
    pub fee_recipient: Option<Address>,
    /// Counterparty of every deposit session. Without it deposits stay PENDING.
    #[serde(default)]
    pub hub_address: Option<Address>,
    /// Identity allowed to confirm deposits and report settlements.
    #[serde(default)]
    pub coordinator: Option<Address>,
    /// Administrative override for coordinator-only calls.
    #[serde(default)]
    pub admin: Option<Address>,
    /// Forward deposits to the hub as soon as they are recorded.
    #[serde(default = "default_true")]
    pub auto_send: bool,
}

fn default_true() -> bool {
    true
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            fee_bps: 0,
            fee_recipient: None,
            hub_address: None,
            coordinator: None,
            admin: None,
            auto_send: true,
        }
    }
}

impl VaultConfig {
    /// Check that the fee is within the protocol bound.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.fee_bps > MAX_FEE_BPS {
            return Err(CoreError::InvalidConfig(format!(
                "vault.fee_bps {} exceeds maximum {}",
                self.fee_bps, MAX_FEE_BPS
            )));
        }
        Ok(())
    }
}
