//! Wire frames exchanged with the settlement coordinator.
//!
//! Every frame is a JSON text message of one of three shapes:
//!
//! - request:  `{"req": [id, method, params[], ts], "sig": ["0x…"]}`
//! - response: `{"res": [id, method, result[], ts], "sig": ["0x…"]}`
//! - error:    `{"err": [id, code, message, ts]}`

use hubvault_core::{Address, Allowance};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// Handshake opener sent by the client.
pub const METHOD_AUTH_REQUEST: &str = "auth_request";
/// Server reply carrying the challenge.
pub const METHOD_AUTH_CHALLENGE: &str = "auth_challenge";
/// Client proof and server verdict.
pub const METHOD_AUTH_VERIFY: &str = "auth_verify";

/// The signed tuple `[id, method, params, timestamp]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload(pub u64, pub String, pub Vec<Value>, pub u64);

impl Payload {
    pub fn id(&self) -> u64 {
        self.0
    }

    pub fn method(&self) -> &str {
        &self.1
    }

    pub fn params(&self) -> &[Value] {
        &self.2
    }

    pub fn timestamp(&self) -> u64 {
        self.3
    }
}

/// `[id, code, message, timestamp]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload(pub u64, pub i64, pub String, pub u64);

/// A decoded wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Request {
        req: Payload,
        #[serde(default)]
        sig: Vec<String>,
    },
    Response {
        res: Payload,
        #[serde(default)]
        sig: Vec<String>,
    },
    Error {
        err: ErrorPayload,
    },
}

impl Frame {
    pub fn request(payload: Payload, signature: String) -> Self {
        Frame::Request {
            req: payload,
            sig: vec![signature],
        }
    }

    pub fn response(payload: Payload) -> Self {
        Frame::Response {
            res: payload,
            sig: Vec::new(),
        }
    }

    pub fn error(id: u64, code: i64, message: impl Into<String>, timestamp: u64) -> Self {
        Frame::Error {
            err: ErrorPayload(id, code, message.into(), timestamp),
        }
    }

    pub fn encode(&self) -> Result<String, ClientError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ClientError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Parameters of `auth_request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequestParams {
    pub address: Address,
    pub session_key: Address,
    pub application: String,
    pub expires_at: u64,
    pub scope: String,
    pub allowances: Vec<Allowance>,
}

/// Result of the server's `auth_challenge`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthChallenge {
    pub challenge_message: String,
}

/// Parameters of the client's `auth_verify`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthVerifyParams {
    pub challenge: String,
}

/// Result of the server's `auth_verify`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthVerifyResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_token: Option<String>,
}

/// Decode the first element of a result array.
pub fn first_result<R: serde::de::DeserializeOwned>(result: &[Value]) -> Result<R, ClientError> {
    let value = result.first().cloned().unwrap_or(Value::Null);
    Ok(serde_json::from_value(value)?)
}
