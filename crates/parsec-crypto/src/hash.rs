//! BLAKE3 content hashing.
//!
//! Blocks are content-addressed and the conduit's hashed-nonce commitment
//! uses the same digest type.

use serde::{Deserialize, Serialize};

use crate::{CryptoError, Result};

/// Size of a digest in bytes.
pub const DIGEST_SIZE: usize = 32;

/// A 256-bit BLAKE3 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashDigest {
    bytes: [u8; DIGEST_SIZE],
}

impl HashDigest {
    /// Hash the given data.
    pub fn from_data(data: &[u8]) -> Self {
        Self {
            bytes: *blake3::hash(data).as_bytes(),
        }
    }

    /// Create a digest from raw bytes.
    pub fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self { bytes }
    }

    /// Create a digest from a byte slice.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; DIGEST_SIZE] = slice
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: DIGEST_SIZE,
                actual: slice.len(),
            })?;
        Ok(Self { bytes })
    }

    /// Get the raw bytes of this digest.
    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for HashDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HashDigest({})", hex::encode(self.bytes))
    }
}

impl std::fmt::Display for HashDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.bytes))
    }
}
