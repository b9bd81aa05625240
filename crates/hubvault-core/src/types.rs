use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Account identifier for a channel participant or vault user.
///
/// Format: `0x<64 hex chars>`, the hex encoding of the account's 32-byte
/// Ed25519 public key. Signatures can be verified from the address alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and validate an address string. Hex digits are normalized to lowercase.
    pub fn new(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        let body = s
            .strip_prefix("0x")
            .ok_or_else(|| CoreError::InvalidAddress(format!("missing 0x prefix: {}", s)))?;
        if body.len() != 64 {
            return Err(CoreError::InvalidAddress(format!(
                "expected 64 hex chars, got {}: {}",
                body.len(),
                s
            )));
        }
        if !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidAddress(format!("non-hex characters: {}", s)));
        }
        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }

    /// Build an address from raw public key bytes.
    pub fn from_public_key_bytes(bytes: &[u8; 32]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    /// Decode the public key bytes behind this address.
    pub fn public_key_bytes(&self) -> Result<[u8; 32], CoreError> {
        let bytes = hex::decode(&self.0[2..])
            .map_err(|e| CoreError::InvalidAddress(format!("invalid hex: {}", e)))?;
        bytes
            .try_into()
            .map_err(|_| CoreError::InvalidAddress("address must decode to 32 bytes".into()))
    }

    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.0
    }
}

impl std::str::FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// An amount of a named asset assigned to one participant of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// The participant holding this share.
    pub participant: Address,
    /// Asset symbol (e.g. "usdc").
    pub asset: String,
    /// Value in the smallest unit of the asset.
    #[serde(with = "amount_str")]
    pub amount: u128,
}

impl Allocation {
    /// Create a new allocation.
    pub fn new(participant: Address, asset: impl Into<String>, amount: u128) -> Self {
        Self {
            participant,
            asset: asset.into(),
            amount,
        }
    }
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} {}", self.participant, self.amount, self.asset)
    }
}

/// A spending cap granted to a session key during authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowance {
    /// Asset symbol.
    pub asset: String,
    /// Cap in the smallest unit, as a decimal string.
    pub amount: String,
}

impl Allowance {
    /// Create a new allowance.
    pub fn new(asset: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            amount: amount.into(),
        }
    }
}

/// Serde helpers that carry `u128` amounts as decimal strings on the wire.
///
/// Deserialization also accepts bare JSON integers.
pub mod amount_str {
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = u128;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer or decimal string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
                v.parse::<u128>()
                    .map_err(|e| E::custom(format!("invalid amount '{}': {}", v, e)))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
                Ok(v as u128)
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
                u128::try_from(v).map_err(|_| E::custom(format!("negative amount: {}", v)))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

/// Milliseconds since the UNIX epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// Seconds since the UNIX epoch.
pub fn now_secs() -> u64 {
    chrono::Utc::now().timestamp() as u64
}
