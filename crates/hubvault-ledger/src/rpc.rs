//! Request and result shapes of the coordinator's application-session methods.

use hubvault_core::{Address, Allocation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Intent, RemoteSessionStatus, SessionId};

pub const METHOD_CREATE_APP_SESSION: &str = "create_app_session";
pub const METHOD_SUBMIT_APP_STATE: &str = "submit_app_state";
pub const METHOD_CLOSE_APP_SESSION: &str = "close_app_session";

/// Terms of a two-party application session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDefinition {
    pub protocol: String,
    pub participants: Vec<Address>,
    pub weights: Vec<u64>,
    pub quorum: u64,
    /// Challenge period (seconds).
    pub challenge: u64,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAppSessionParams {
    pub definition: AppDefinition,
    pub allocations: Vec<Allocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitAppStateParams {
    pub app_session_id: SessionId,
    pub intent: Intent,
    pub version: u64,
    pub allocations: Vec<Allocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseAppSessionParams {
    pub app_session_id: SessionId,
    pub allocations: Vec<Allocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_data: Option<Value>,
}

/// Result shared by all three session methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSessionResult {
    pub app_session_id: SessionId,
    pub status: RemoteSessionStatus,
    pub version: u64,
}
