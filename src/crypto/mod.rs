//! Cryptographic primitives for the pairing protocol
//!
//! All primitives come from aws-lc-rs:
//!
//! - [`ecdh`]: ephemeral P-384 key agreement and HKDF-SHA256 key derivation
//! - [`aead`]: ChaCha20-Poly1305 sealing under the derived key
//!
//! Error values never carry key material.

pub mod aead;
pub mod ecdh;

pub use aead::{Sealed, SymmetricKey, NONCE_LEN};
pub use ecdh::{CompletedEcdh, EcdhPublicKey, EphemeralKeyPair, DERIVED_KEY_LEN};

use thiserror::Error;

/// Cryptographic failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Ephemeral key generation failed
    #[error("key generation failed")]
    KeyGeneration,

    /// A peer public key could not be decoded
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Key agreement or key derivation failed
    #[error("key agreement failed")]
    Agreement,

    /// Symmetric key material was rejected
    #[error("invalid symmetric key")]
    InvalidKey,

    /// Nonce was not the expected size
    #[error("invalid nonce length: expected {expected} bytes, got {actual}")]
    InvalidNonce {
        /// Required nonce length
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// Encryption failed
    #[error("encryption failed")]
    Seal,

    /// Decryption or authentication failed (wrong key, nonce or tampering)
    #[error("decryption failed")]
    Open,

    /// The system random number generator failed
    #[error("random generation failed")]
    Random,
}
