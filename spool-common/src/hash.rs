//! Pluggable two-to-one hash used for tree nodes and nullifiers.
//!
//! A deployment fixes one algorithm for the whole lifetime of a tree; mixing
//! algorithms inside one tree produces roots nobody else can reproduce.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sha3::{Digest as _, Keccak256};

use crate::digest::{Digest, DIGEST_BYTES};
use crate::error::CommonError;

/// Binary combiner `H(left, right) -> digest` over 32-byte words.
pub trait HashDomain: Clone + Send + Sync + fmt::Debug {
    fn combine(&self, left: &Digest, right: &Digest) -> Digest;

    /// Stable identifier, used in logs and persisted tree metadata.
    fn name(&self) -> &'static str;
}

/// Built-in hash domains.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// Keccak-256 of `left || right`, matching EVM-side trees.
    #[default]
    Keccak256,
    /// SHA-256 of `left || right`.
    Sha256,
    /// BLAKE3 of `left || right`.
    Blake3,
}

impl HashDomain for HashAlgorithm {
    fn combine(&self, left: &Digest, right: &Digest) -> Digest {
        let mut out = [0u8; DIGEST_BYTES];
        match self {
            HashAlgorithm::Keccak256 => {
                let mut hasher = Keccak256::new();
                hasher.update(left.as_bytes());
                hasher.update(right.as_bytes());
                out.copy_from_slice(&hasher.finalize());
            }
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(left.as_bytes());
                hasher.update(right.as_bytes());
                out.copy_from_slice(&hasher.finalize());
            }
            HashAlgorithm::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                hasher.update(left.as_bytes());
                hasher.update(right.as_bytes());
                out = *hasher.finalize().as_bytes();
            }
        }
        Digest(out)
    }

    fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Keccak256 => "keccak256",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Blake3 => "blake3",
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keccak256" | "keccak" => Ok(HashAlgorithm::Keccak256),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "blake3" => Ok(HashAlgorithm::Blake3),
            other => Err(CommonError::UnknownAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Nullifier of a commitment: `H(spend_key, commitment)`.
///
/// Only ever used as a lookup key against spends observed on chain.
pub fn derive_nullifier<H: HashDomain>(hasher: &H, commitment: &Digest, spend_key: &Digest) -> Digest {
    hasher.combine(spend_key, commitment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_of_two_zero_words_matches_known_value() {
        // keccak256(64 zero bytes), the level-1 empty node of every EVM tree.
        let expected = Digest::from_hex(
            "0xad3228b676f7d3cd4284a5443f17f1962b36e491b30a40b2405849e597ba5fb5",
        )
        .unwrap();
        assert_eq!(
            HashAlgorithm::Keccak256.combine(&Digest::ZERO, &Digest::ZERO),
            expected
        );
    }

    #[test]
    fn combine_is_order_sensitive() {
        let a = Digest::from_u64(1);
        let b = Digest::from_u64(2);
        for algo in [
            HashAlgorithm::Keccak256,
            HashAlgorithm::Sha256,
            HashAlgorithm::Blake3,
        ] {
            assert_ne!(algo.combine(&a, &b), algo.combine(&b, &a), "{algo}");
        }
    }

    #[test]
    fn algorithms_disagree() {
        let a = Digest::from_u64(1);
        let b = Digest::from_u64(2);
        let k = HashAlgorithm::Keccak256.combine(&a, &b);
        let s = HashAlgorithm::Sha256.combine(&a, &b);
        let bl = HashAlgorithm::Blake3.combine(&a, &b);
        assert_ne!(k, s);
        assert_ne!(s, bl);
    }

    #[test]
    fn parses_algorithm_names() {
        assert_eq!("SHA256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("keccak".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Keccak256);
        assert!("md5".parse::<HashAlgorithm>().is_err());
        let json = serde_json::to_string(&HashAlgorithm::Blake3).unwrap();
        assert_eq!(json, "\"blake3\"");
    }

    #[test]
    fn nullifier_depends_on_spend_key() {
        let algo = HashAlgorithm::default();
        let commitment = Digest::from_u64(42);
        let n1 = derive_nullifier(&algo, &commitment, &Digest::from_u64(1));
        let n2 = derive_nullifier(&algo, &commitment, &Digest::from_u64(2));
        assert_ne!(n1, n2);
        assert_eq!(n1, derive_nullifier(&algo, &commitment, &Digest::from_u64(1)));
    }
}
