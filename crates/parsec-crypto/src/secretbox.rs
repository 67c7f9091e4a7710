//! ChaCha20-Poly1305 AEAD encryption (RFC 8439).
//!
//! Symmetric encryption with a random nonce prepended to the ciphertext.
//! Realm keys, key canaries and encrypted realm names all use this layout,
//! so a single `SecretKey::decrypt` works on any of them.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// Nonce size for ChaCha20-Poly1305 (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Key size for ChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// A ChaCha20-Poly1305 secret key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
#[zeroize(drop)]
pub struct SecretKey {
    #[serde(with = "serde_bytes")]
    bytes: Vec<u8>,
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

impl SecretKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Create a key from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    /// Get the raw bytes of this key.
    pub fn to_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encrypt, returning `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.bytes));
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::AeadEncryption)?;
        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a `nonce || ciphertext || tag` payload.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_SIZE {
            return Err(CryptoError::AeadDecryption);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.bytes));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::AeadDecryption)
    }

    /// Produce a key canary: an encryption of the empty string that lets a
    /// reader check it holds the right key without exposing anything.
    pub fn canary(&self) -> Result<Vec<u8>> {
        self.encrypt(b"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = SecretKey::generate();
        let encrypted = key.encrypt(b"workspace manifest").expect("encrypts");
        assert_eq!(key.decrypt(&encrypted).expect("decrypts"), b"workspace manifest");
    }

    #[test]
    fn test_wrong_key_rejected() {
        let key = SecretKey::generate();
        let other = SecretKey::generate();
        let encrypted = key.encrypt(b"data").expect("encrypts");
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_canary_checks_key() {
        let key = SecretKey::generate();
        let canary = key.canary().expect("encrypts");
        assert_eq!(key.decrypt(&canary).expect("decrypts"), b"");
        assert!(SecretKey::generate().decrypt(&canary).is_err());
    }
}
