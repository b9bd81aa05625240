use ed25519_dalek::Signer;
use ed25519_dalek::Verifier;
use hubvault_core::Address;
use serde::Serialize;

use crate::error::CryptoError;
use crate::keys::{KeyPair, PublicKey};
use crate::typed_data::{self, AuthPolicy, TypedDomain};

/// Ed25519 signature (64 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    inner: ed25519_dalek::Signature,
}

impl Signature {
    /// Get the raw bytes (64 bytes).
    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes()
    }

    /// Create from raw bytes (64 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_arr: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidInput(format!("signature must be 64 bytes, got {}", bytes.len()))
        })?;
        let inner = ed25519_dalek::Signature::from_bytes(&bytes_arr);
        Ok(Self { inner })
    }

    /// Encode as a `0x`-prefixed hex string, the form carried in wire frames.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }

    /// Decode from hex, with or without the `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let body = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(body)
            .map_err(|e| CryptoError::InvalidInput(format!("invalid signature hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }
}

/// Sign a message using Ed25519.
pub fn sign(message: &[u8], keypair: &KeyPair) -> Signature {
    let sig = keypair.signing_key().sign(message);
    Signature { inner: sig }
}

/// Verify an Ed25519 signature.
pub fn verify(message: &[u8], signature: &Signature, pubkey: &PublicKey) -> Result<(), CryptoError> {
    pubkey
        .verifying_key()
        .verify(message, &signature.inner)
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}

/// Digest of a request payload: BLAKE3 over its compact JSON encoding.
pub fn request_digest<T: Serialize + ?Sized>(payload: &T) -> Result<[u8; 32], CryptoError> {
    let bytes = serde_json::to_vec(payload)?;
    Ok(typed_data::hash(&bytes))
}

/// Produces the two kinds of signatures a client needs: plain request
/// signatures and typed-data signatures over an auth policy.
///
/// Holds the long-lived wallet key. Safe to share across tasks.
#[derive(Debug)]
pub struct MessageSigner {
    keypair: KeyPair,
}

impl MessageSigner {
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }

    /// Address of the signing wallet.
    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Sign the digest of a serializable request payload.
    pub fn sign_request<T: Serialize + ?Sized>(&self, payload: &T) -> Result<Signature, CryptoError> {
        let digest = request_digest(payload)?;
        Ok(sign(&digest, &self.keypair))
    }

    /// Sign an auth policy as typed data under the given domain.
    pub fn sign_auth_challenge(&self, domain: &TypedDomain, policy: &AuthPolicy) -> Signature {
        let digest = typed_data::policy_digest(domain, policy);
        tracing::debug!(
            domain = %domain.name,
            wallet = %policy.wallet,
            "signing auth challenge"
        );
        sign(&digest, &self.keypair)
    }
}

/// Verify a request signature against the address that claims it.
pub fn verify_request<T: Serialize + ?Sized>(
    payload: &T,
    signature: &Signature,
    signer: &Address,
) -> Result<(), CryptoError> {
    let digest = request_digest(payload)?;
    let pubkey = PublicKey::from_address(signer)?;
    verify(&digest, signature, &pubkey)
}

/// Verify a typed-data auth signature against the wallet address.
pub fn verify_auth_challenge(
    domain: &TypedDomain,
    policy: &AuthPolicy,
    signature: &Signature,
    signer: &Address,
) -> Result<(), CryptoError> {
    let digest = typed_data::policy_digest(domain, policy);
    let pubkey = PublicKey::from_address(signer)?;
    verify(&digest, signature, &pubkey)
}
