//! Identity hashes
//!
//! Every router and every destination on the overlay is addressed by the
//! BLAKE3 hash of its public keys. [`IdentHash`] is that hash, and it is the
//! primary key of every table in the directory and in sessions.

use std::fmt::{self, Debug, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Length in bytes of an identity hash
pub const IDENT_HASH_LEN: usize = 32;

/// Suffix accepted on textual host names
pub const HOST_SUFFIX: &str = ".sable";

/// 32-byte hash identifying a router or a destination
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentHash([u8; IDENT_HASH_LEN]);

impl IdentHash {
    /// Wrap raw hash bytes
    pub const fn new(bytes: [u8; IDENT_HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Hash a sequence of public key parts into an identity
    pub fn digest(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; IDENT_HASH_LEN] {
        &self.0
    }

    /// Create an identity from a byte slice
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let arr: [u8; IDENT_HASH_LEN] =
            bytes
                .try_into()
                .map_err(|_| IdentityError::InvalidKeyLength {
                    expected: IDENT_HASH_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// Full lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a host name: a full hex hash, optionally suffixed with `.sable`
    pub fn from_host_name(name: &str) -> Result<Self, IdentityError> {
        let trimmed = name.trim().to_ascii_lowercase();
        let hash = trimmed.strip_suffix(HOST_SUFFIX).unwrap_or(&trimmed);
        let bytes =
            hex::decode(hash).map_err(|e| IdentityError::InvalidFormat(format!("{name}: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Short display form for logging
    pub fn short_id(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl Display for IdentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_id())
    }
}

impl Debug for IdentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentHash({})", self.short_id())
    }
}

impl FromStr for IdentHash {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_host_name(s)
    }
}

impl From<[u8; IDENT_HASH_LEN]> for IdentHash {
    fn from(bytes: [u8; IDENT_HASH_LEN]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable() {
        let a = IdentHash::digest(&[b"key-a", b"key-b"]);
        let b = IdentHash::digest(&[b"key-a", b"key-b"]);
        let c = IdentHash::digest(&[b"key-b", b"key-a"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        let err = IdentHash::from_bytes(&[1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            IdentityError::InvalidKeyLength {
                expected: 32,
                actual: 3
            }
        );
    }

    #[test]
    fn test_host_name_parsing() {
        let id = IdentHash::digest(&[b"host"]);
        let plain: IdentHash = id.to_hex().parse().unwrap();
        let suffixed = IdentHash::from_host_name(&format!("{}.sable", id.to_hex())).unwrap();
        let upper = IdentHash::from_host_name(&id.to_hex().to_uppercase()).unwrap();
        assert_eq!(plain, id);
        assert_eq!(suffixed, id);
        assert_eq!(upper, id);
        assert!(IdentHash::from_host_name("example.sable").is_err());
    }

    #[test]
    fn test_short_id_is_prefix_of_hex() {
        let id = IdentHash::new([0xab; 32]);
        assert_eq!(id.short_id(), "abababab");
        assert!(id.to_hex().starts_with(&id.short_id()));
        assert_eq!(format!("{id}"), "abababab");
    }
}
