use chrono::{DateTime, Utc};
use hubvault_core::{Address, Allocation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of an application session, assigned by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a channel state was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Opening allocations, version 1.
    Initialize,
    /// A redistribution while the session is open.
    Operate,
    /// Final allocations; the session accepts no further updates.
    Finalize,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialize => write!(f, "initialize"),
            Self::Operate => write!(f, "operate"),
            Self::Finalize => write!(f, "finalize"),
        }
    }
}

/// Session status as reported by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteSessionStatus {
    Open,
    Closed,
    Settling,
}

/// One versioned snapshot of a two-party session's allocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    pub session_id: SessionId,
    /// Starts at 1 and increases by one on every accepted update.
    pub version: u64,
    pub intent: Intent,
    /// The two distinct participants, in protocol order. Immutable.
    pub participants: [Address; 2],
    /// One allocation per participant, in the same order as `participants`.
    pub allocations: [Allocation; 2],
    /// Opaque application payload, carried forward when an update omits it.
    pub state_data: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelState {
    pub fn is_final(&self) -> bool {
        self.intent == Intent::Finalize
    }

    /// The amount allocated to a participant, if it is part of the session.
    pub fn allocation_of(&self, participant: &Address) -> Option<u128> {
        self.allocations
            .iter()
            .find(|a| &a.participant == participant)
            .map(|a| a.amount)
    }

    /// Sum of both allocations.
    pub fn total(&self) -> u128 {
        self.allocations.iter().map(|a| a.amount).sum()
    }
}
