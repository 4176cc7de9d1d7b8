//! # Hashing
//!
//! SHA-256 is the only digest on the chain: transaction ids, header hashes
//! and the per-block data commitment all use it. [`Hash`] is the fixed-size
//! newtype that flows through every index.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::config::HASH_LENGTH;

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash([u8; HASH_LENGTH]);

/// Returned when a hash string or slice has the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid hash: expected {HASH_LENGTH} bytes")]
pub struct InvalidHash;

impl Hash {
    /// The all-zero hash. Used as the genesis block's parent.
    pub const fn zero() -> Self {
        Self([0u8; HASH_LENGTH])
    }

    pub const fn from_bytes(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, InvalidHash> {
        let arr: [u8; HASH_LENGTH] = slice.try_into().map_err(|_| InvalidHash)?;
        Ok(Self(arr))
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Hash {
    type Err = InvalidHash;

    /// Accepts lowercase or uppercase hex, with or without a `0x` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| InvalidHash)?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..16])
    }
}

/// SHA-256 of `data`.
///
/// ```
/// use strata_protocol::crypto::sha256;
///
/// let h = sha256(b"strata");
/// assert_eq!(h.to_hex().len(), 64);
/// ```
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

/// SHA-256 over several slices without concatenating them first.
pub fn sha256_parts<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    Hash(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256("") from FIPS 180-2.
        assert_eq!(
            sha256(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn parts_match_concatenation() {
        let joined = sha256(b"helloworld");
        let parts = sha256_parts([b"hello".as_slice(), b"world".as_slice()]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn parse_display_roundtrip() {
        let h = sha256(b"abc");
        let parsed: Hash = h.to_string().parse().unwrap();
        assert_eq!(h, parsed);
        let prefixed: Hash = format!("0x{h}").parse().unwrap();
        assert_eq!(h, prefixed);
    }

    #[test]
    fn rejects_bad_input() {
        assert!("abc".parse::<Hash>().is_err());
        assert!("00".parse::<Hash>().is_err());
        assert!(Hash::from_slice(&[1, 2, 3]).is_err());
    }

    #[test]
    fn zero_hash() {
        assert!(Hash::zero().is_zero());
        assert!(!sha256(b"x").is_zero());
    }
}
