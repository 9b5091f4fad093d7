//! Fixed-width digest word.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CommonError, Result};

/// Width in bytes of every leaf, node hash and nullifier.
pub const DIGEST_BYTES: usize = 32;

/// A 32-byte word. Leaves, interior node hashes, commitment hashes and
/// nullifiers all share this representation.
///
/// Serialized as a `0x`-prefixed lowercase hex string.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest(pub [u8; DIGEST_BYTES]);

impl Digest {
    /// The empty-leaf sentinel.
    pub const ZERO: Digest = Digest([0u8; DIGEST_BYTES]);

    pub const fn new(bytes: [u8; DIGEST_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; DIGEST_BYTES] =
            bytes
                .try_into()
                .map_err(|_| CommonError::InvalidLength {
                    expected: DIGEST_BYTES,
                    actual: bytes.len(),
                })?;
        Ok(Self(array))
    }

    /// Parse from hex, with or without a `0x` prefix.
    pub fn from_hex(input: &str) -> Result<Self> {
        let trimmed = input.strip_prefix("0x").unwrap_or(input);
        let bytes = hex::decode(trimmed).map_err(|e| CommonError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Big-endian embedding of a small integer, handy for fixtures and
    /// deterministic identifiers.
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; DIGEST_BYTES];
        bytes[DIGEST_BYTES - 8..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_BYTES] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; DIGEST_BYTES]
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; DIGEST_BYTES]> for Digest {
    fn from(bytes: [u8; DIGEST_BYTES]) -> Self {
        Self(bytes)
    }
}

impl FromStr for Digest {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps tree dumps readable.
        write!(f, "Digest({}..)", &hex::encode(self.0)[..8])
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_accepts_optional_prefix() {
        let d = Digest::from_u64(0xabcd);
        let with = d.to_hex();
        let without = with.trim_start_matches("0x").to_string();
        assert_eq!(Digest::from_hex(&with).unwrap(), d);
        assert_eq!(Digest::from_hex(&without).unwrap(), d);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = Digest::from_hex("0x0102").unwrap_err();
        assert!(matches!(
            err,
            CommonError::InvalidLength {
                expected: 32,
                actual: 2
            }
        ));
    }

    #[test]
    fn serde_uses_hex_string() {
        let d = Digest::from_u64(7);
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(
            json,
            "\"0x0000000000000000000000000000000000000000000000000000000000000007\""
        );
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn zero_sentinel() {
        assert!(Digest::ZERO.is_zero());
        assert!(!Digest::from_u64(1).is_zero());
        assert_eq!(Digest::default(), Digest::ZERO);
    }
}
