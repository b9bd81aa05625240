//! Typed structured-data hashing for the authentication handshake.
//!
//! A typed document is hashed field by field under its type signature and
//! bound to a named application domain, so a signature over it cannot be
//! replayed as an ordinary request signature or under another application.

use hubvault_core::{Address, Allowance};
use serde::{Deserialize, Serialize};

/// BLAKE3 hash (32 bytes).
pub type Hash = [u8; 32];

const DOMAIN_TYPE: &str = "HubVaultDomain(string name,string version)";
const POLICY_TYPE: &str = "Policy(string challenge,string scope,address wallet,address session_key,uint64 expires_at,Allowance[] allowances)Allowance(string asset,string amount)";
const ALLOWANCE_TYPE: &str = "Allowance(string asset,string amount)";

/// Version tag of the typed-data encoding.
pub const TYPED_DATA_VERSION: &str = "1";

/// Hash arbitrary data using BLAKE3.
pub fn hash(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}

/// Left-pad a u64 to a 32-byte big-endian word.
fn encode_u64(value: u64) -> Hash {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// The named application domain an auth signature is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedDomain {
    /// Application name, e.g. "hubvault".
    pub name: String,
    /// Encoding version.
    pub version: String,
}

impl TypedDomain {
    /// Create a domain for the given application at the current encoding version.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: TYPED_DATA_VERSION.into(),
        }
    }

    /// The domain separator mixed into every typed digest.
    pub fn separator(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&hash(DOMAIN_TYPE.as_bytes()));
        hasher.update(&hash(self.name.as_bytes()));
        hasher.update(&hash(self.version.as_bytes()));
        *hasher.finalize().as_bytes()
    }
}

/// The auth document signed in reply to a server challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPolicy {
    /// Single-use challenge issued by the coordinator.
    pub challenge: String,
    /// Scope requested for the session key.
    pub scope: String,
    /// Wallet that owns the session.
    pub wallet: Address,
    /// Ephemeral key the session is issued to.
    pub session_key: Address,
    /// Session expiry (seconds since epoch).
    pub expires_at: u64,
    /// Spending caps granted to the session key.
    pub allowances: Vec<Allowance>,
}

impl AuthPolicy {
    /// Structured hash of the policy under its type signature.
    pub fn struct_hash(&self) -> Hash {
        let mut allowances = blake3::Hasher::new();
        for allowance in &self.allowances {
            allowances.update(&allowance_hash(allowance));
        }

        let mut hasher = blake3::Hasher::new();
        hasher.update(&hash(POLICY_TYPE.as_bytes()));
        hasher.update(&hash(self.challenge.as_bytes()));
        hasher.update(&hash(self.scope.as_bytes()));
        hasher.update(&hash(self.wallet.as_str().as_bytes()));
        hasher.update(&hash(self.session_key.as_str().as_bytes()));
        hasher.update(&encode_u64(self.expires_at));
        hasher.update(allowances.finalize().as_bytes());
        *hasher.finalize().as_bytes()
    }
}

fn allowance_hash(allowance: &Allowance) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&hash(ALLOWANCE_TYPE.as_bytes()));
    hasher.update(&hash(allowance.asset.as_bytes()));
    hasher.update(&hash(allowance.amount.as_bytes()));
    *hasher.finalize().as_bytes()
}

/// Final digest signed for a policy under a domain: `H(0x19 0x01 || domain || struct)`.
pub fn policy_digest(domain: &TypedDomain, policy: &AuthPolicy) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[0x19, 0x01]);
    hasher.update(&domain.separator());
    hasher.update(&policy.struct_hash());
    *hasher.finalize().as_bytes()
}
