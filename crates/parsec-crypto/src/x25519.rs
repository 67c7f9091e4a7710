//! X25519 key agreement (RFC 7748).
//!
//! Used by the greeting handshake: both sides exchange ephemeral public keys
//! during the wait-peer step and derive the shared secret that protects the
//! rest of the conduit. The server only ever sees the public halves.

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// An X25519 secret key.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct PrivateKey {
    inner: StaticSecret,
}

/// An X25519 public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct X25519PublicKey {
    bytes: [u8; 32],
}

/// An X25519 shared secret.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct SharedSecret {
    bytes: [u8; 32],
}

impl PrivateKey {
    /// Generate a new random secret key.
    pub fn generate() -> Self {
        Self {
            inner: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            inner: StaticSecret::from(bytes),
        }
    }

    /// Compute the corresponding public key.
    pub fn public_key(&self) -> X25519PublicKey {
        let pk = PublicKey::from(&self.inner);
        X25519PublicKey {
            bytes: pk.to_bytes(),
        }
    }

    /// Perform Diffie-Hellman with a peer public key.
    pub fn diffie_hellman(&self, peer: &X25519PublicKey) -> SharedSecret {
        let peer = PublicKey::from(peer.bytes);
        SharedSecret {
            bytes: self.inner.diffie_hellman(&peer).to_bytes(),
        }
    }
}

impl X25519PublicKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Create from a byte slice.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = slice
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                actual: slice.len(),
            })?;
        Ok(Self { bytes })
    }

    /// Get the raw bytes of this public key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.bytes
    }
}

impl SharedSecret {
    /// Get the raw bytes of this shared secret.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_agreement() {
        let a = PrivateKey::generate();
        let b = PrivateKey::generate();
        let ab = a.diffie_hellman(&b.public_key());
        let ba = b.diffie_hellman(&a.public_key());
        assert_eq!(ab.to_bytes(), ba.to_bytes());
    }
}
