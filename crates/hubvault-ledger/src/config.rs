use hubvault_core::CoreError;
use serde::{Deserialize, Serialize};

/// Terms applied to every session the ledger opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Signature weight needed to accept a state.
    #[serde(default = "default_quorum")]
    pub quorum: u64,
    /// Dispute window (seconds).
    #[serde(default = "default_challenge_period")]
    pub challenge_period: u64,
    /// Signature weight of each participant, in participant order.
    #[serde(default = "default_weights")]
    pub weights: [u64; 2],
}

fn default_protocol() -> String {
    "hubvault-deposit-v1".into()
}
fn default_quorum() -> u64 {
    100
}
fn default_challenge_period() -> u64 {
    86_400
}
fn default_weights() -> [u64; 2] {
    [50, 50]
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            quorum: default_quorum(),
            challenge_period: default_challenge_period(),
            weights: default_weights(),
        }
    }
}

impl LedgerConfig {
    /// The quorum must be reachable with the configured weights.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.protocol.is_empty() {
            return Err(CoreError::InvalidConfig("ledger.protocol must not be empty".into()));
        }
        let total: u64 = self.weights.iter().sum();
        if self.quorum == 0 || self.quorum > total {
            return Err(CoreError::InvalidConfig(format!(
                "ledger.quorum {} not reachable with weights {:?}",
                self.quorum, self.weights
            )));
        }
        Ok(())
    }
}
