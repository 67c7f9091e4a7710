//! Ed25519 signing and verification (RFC 8032).
//!
//! Every certificate in an organization is an Ed25519-signed MessagePack
//! payload. The signed container keeps the raw bytes self-describing: the
//! 64-byte signature is prepended to the payload so a certificate can be
//! stored, re-emitted and re-verified without an out-of-band signature.
//!
//! This module wraps `ed25519-dalek` with Parsec-specific types.

use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// An Ed25519 signing key (private key).
pub struct SigningKey {
    inner: ed25519_dalek::SigningKey,
}

impl Clone for SigningKey {
    fn clone(&self) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(&self.inner.to_bytes()),
        }
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        let mut bytes = self.inner.to_bytes();
        bytes.zeroize();
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

/// An Ed25519 verification key (public key).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyKey {
    inner: ed25519_dalek::VerifyingKey,
}

/// An Ed25519 signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    inner: ed25519_dalek::Signature,
}

impl SigningKey {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            inner: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    /// Create a signing key from raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(bytes),
        }
    }

    /// Get the raw bytes of this signing key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Get the corresponding verification key.
    pub fn verify_key(&self) -> VerifyKey {
        VerifyKey {
            inner: self.inner.verifying_key(),
        }
    }

    /// Sign a message, returning a detached signature.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            inner: self.inner.sign(message),
        }
    }

    /// Sign a payload into the self-contained `signature || payload` format.
    pub fn sign_payload(&self, payload: &[u8]) -> Vec<u8> {
        let signature = self.inner.sign(payload);
        let mut signed = Vec::with_capacity(SIGNATURE_SIZE + payload.len());
        signed.extend_from_slice(&signature.to_bytes());
        signed.extend_from_slice(payload);
        signed
    }
}

impl VerifyKey {
    /// Create a verification key from raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map(|inner| Self { inner })
            .map_err(|_| CryptoError::InvalidInput("invalid ed25519 public key".to_string()))
    }

    /// Get the raw bytes of this verification key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Verify a detached signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        self.inner
            .verify(message, &signature.inner)
            .map_err(|_| CryptoError::SignatureVerification)
    }

    /// Verify a `signature || payload` container and return the payload.
    pub fn verify_payload<'a>(&self, signed: &'a [u8]) -> Result<&'a [u8]> {
        if signed.len() < SIGNATURE_SIZE {
            return Err(CryptoError::TruncatedPayload);
        }
        let (raw_signature, payload) = signed.split_at(SIGNATURE_SIZE);
        let signature = ed25519_dalek::Signature::from_slice(raw_signature)
            .map_err(|_| CryptoError::SignatureVerification)?;
        self.inner
            .verify(payload, &signature)
            .map_err(|_| CryptoError::SignatureVerification)?;
        Ok(payload)
    }

    /// Extract the payload of a signed container *without* verifying it.
    ///
    /// Only for display and debugging purposes, never trust the result.
    pub fn unsecure_payload(signed: &[u8]) -> Result<&[u8]> {
        if signed.len() < SIGNATURE_SIZE {
            return Err(CryptoError::TruncatedPayload);
        }
        Ok(&signed[SIGNATURE_SIZE..])
    }
}

impl Signature {
    /// Create a signature from raw bytes.
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self {
            inner: ed25519_dalek::Signature::from_bytes(bytes),
        }
    }

    /// Get the raw bytes of this signature.
    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes()
    }
}
