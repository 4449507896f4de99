//! ChaCha20-Poly1305 sealing of pairing payloads
//!
//! Every message is sealed under a fresh random 12-byte nonce. The nonce is
//! sent alongside the ciphertext and also bound in as associated data.

use std::fmt;

use aws_lc_rs::aead::{Aad, LessSafeKey, Nonce, UnboundKey, CHACHA20_POLY1305};

use super::CryptoError;

/// ChaCha20-Poly1305 nonce length
pub const NONCE_LEN: usize = 12;

/// A ciphertext and the nonce it was sealed with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Ciphertext with the 16-byte tag appended
    pub ciphertext: Vec<u8>,
    /// Nonce used for this message
    pub nonce: [u8; NONCE_LEN],
}

/// Symmetric AEAD key
pub struct SymmetricKey {
    key: LessSafeKey,
}

impl SymmetricKey {
    /// Build from 32 bytes of key material
    pub fn new(key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let unbound =
            UnboundKey::new(&CHACHA20_POLY1305, key_bytes).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
        })
    }

    /// Seal under a freshly generated nonce
    pub fn seal(&self, plaintext: &[u8]) -> Result<Sealed, CryptoError> {
        let nonce = generate_nonce()?;
        self.seal_with_nonce(nonce, plaintext)
    }

    /// Seal under a caller-supplied nonce
    ///
    /// The caller must never reuse a nonce with the same key.
    pub fn seal_with_nonce(
        &self,
        nonce: [u8; NONCE_LEN],
        plaintext: &[u8],
    ) -> Result<Sealed, CryptoError> {
        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::from(nonce),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Seal)?;

        Ok(Sealed {
            ciphertext: in_out,
            nonce,
        })
    }

    /// Authenticate and decrypt
    pub fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce: [u8; NONCE_LEN] =
            nonce
                .try_into()
                .map_err(|_| CryptoError::InvalidNonce {
                    expected: NONCE_LEN,
                    actual: nonce.len(),
                })?;

        let mut in_out = ciphertext.to_vec();
        let len = self
            .key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce),
                Aad::from(nonce),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Open)?
            .len();
        in_out.truncate(len);
        Ok(in_out)
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey { .. }")
    }
}

fn generate_nonce() -> Result<[u8; NONCE_LEN], CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    aws_lc_rs::rand::fill(&mut nonce).map_err(|_| CryptoError::Random)?;
    Ok(nonce)
}
