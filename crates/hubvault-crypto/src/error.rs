/// Cryptographic operation errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("canonical encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("core error: {0}")]
    Core(#[from] hubvault_core::CoreError),
}
