//! HubVault Crypto: wallet keys, request signatures, and typed-data
//! signatures for the coordinator authentication handshake.

pub mod error;
pub mod keys;
pub mod signing;
pub mod typed_data;

pub use error::CryptoError;
pub use keys::{KeyPair, PublicKey};
pub use signing::{
    request_digest, sign, verify, verify_auth_challenge, verify_request, MessageSigner, Signature,
};
pub use typed_data::{hash, policy_digest, AuthPolicy, TypedDomain};
