//! Challenge-response handshake material.
//!
//! Each handshake uses a fresh ephemeral session key. The wallet signs the
//! auth policy binding that key to the server's challenge.

use hubvault_core::{now_secs, Address, ClientConfig};
use hubvault_crypto::{AuthPolicy, KeyPair, TypedDomain};

use crate::protocol::AuthRequestParams;

/// The authenticated session of one connection. Rebuilt on every reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub wallet: Address,
    pub session_key: Address,
    /// Seconds since epoch.
    pub expires_at: u64,
    /// Token returned by the coordinator, kept for observability only.
    pub jwt_token: Option<String>,
}

impl AuthSession {
    pub fn is_expired_at(&self, now_secs: u64) -> bool {
        now_secs >= self.expires_at
    }
}

/// State carried between the two round-trips of a handshake.
#[derive(Debug)]
pub(crate) struct Handshake {
    pub(crate) domain: TypedDomain,
    pub(crate) request: AuthRequestParams,
}

impl Handshake {
    pub(crate) fn new(wallet: Address, config: &ClientConfig) -> Self {
        // Only the address is needed; the key itself never signs.
        let session_key = KeyPair::generate().address();
        let request = AuthRequestParams {
            address: wallet,
            session_key,
            application: config.application.clone(),
            expires_at: now_secs() + config.session_expiry_secs,
            scope: config.scope.clone(),
            allowances: config.allowances.clone(),
        };
        Self {
            domain: TypedDomain::new(config.application.clone()),
            request,
        }
    }

    /// The policy the wallet signs in answer to `challenge`.
    pub(crate) fn policy(&self, challenge: &str) -> AuthPolicy {
        AuthPolicy {
            challenge: challenge.to_string(),
            scope: self.request.scope.clone(),
            wallet: self.request.address.clone(),
            session_key: self.request.session_key.clone(),
            expires_at: self.request.expires_at,
            allowances: self.request.allowances.clone(),
        }
    }

    pub(crate) fn into_session(self, jwt_token: Option<String>) -> AuthSession {
        AuthSession {
            wallet: self.request.address,
            session_key: self.request.session_key,
            expires_at: self.request.expires_at,
            jwt_token,
        }
    }
}
