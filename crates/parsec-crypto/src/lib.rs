//! # parsec-crypto
//!
//! Cryptographic primitives for the Parsec server core. The suite is fixed:
//! no algorithm negotiation happens on the wire, clients and server agree on
//! the algorithms through the certificate schemas.
//!
//! ## Modules
//!
//! - [`ed25519`]: Ed25519 signing and verification (RFC 8032), including
//!   the signed-payload container used by certificates
//! - [`x25519`]: X25519 key agreement (RFC 7748), used by the greeting
//!   handshake's ephemeral key exchange
//! - [`secretbox`]: ChaCha20-Poly1305 AEAD with a random prefixed nonce,
//!   used for realm key canaries and encrypted names
//! - [`hash`]: BLAKE3 content hashing
//! - [`shamir`]: GF(256) Shamir secret splitting for recovery setups
//! - [`sas`]: Short Authentication String derivation from conduit nonces

pub mod ed25519;
pub mod hash;
pub mod sas;
pub mod secretbox;
pub mod shamir;
pub mod x25519;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ed25519 signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    AeadEncryption,

    /// AEAD decryption failed (authentication tag mismatch).
    #[error("AEAD decryption failed")]
    AeadDecryption,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// A signed container is too short to hold a signature.
    #[error("signed payload is truncated")]
    TruncatedPayload,

    /// Shamir share set cannot reconstruct the secret.
    #[error("shamir recovery failed: {0}")]
    ShamirRecovery(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
