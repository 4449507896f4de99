//! Anonymous elliptic-curve Diffie-Hellman
//!
//! Each side generates an [`EphemeralKeyPair`], sends its public key as a PEM
//! SubjectPublicKeyInfo, and combines its private key with the peer's public
//! key into a [`CompletedEcdh`]. Both sides of an untampered exchange derive
//! the same 32-byte key; nothing secret crosses the wire.
//!
//! The raw ECDH output is never used directly: it is run through
//! HKDF-SHA256 (empty salt, info `"handshake data"`).

use std::fmt;

use aws_lc_rs::agreement::{self, EphemeralPrivateKey, UnparsedPublicKey, ECDH_P384};
use aws_lc_rs::encoding::{AsDer, PublicKeyX509Der};
use aws_lc_rs::hkdf;
use aws_lc_rs::rand::SystemRandom;
use x509_parser::oid_registry::OID_KEY_TYPE_EC_PUBLIC_KEY;
use x509_parser::prelude::FromDer;
use x509_parser::x509::SubjectPublicKeyInfo;
use zeroize::Zeroizing;

use super::{CryptoError, SymmetricKey};
use crate::sas::Sas;

/// Length of the derived symmetric key
pub const DERIVED_KEY_LEN: usize = 32;

/// HKDF info string binding the derived key to this handshake
const HKDF_INFO: &[u8] = b"handshake data";

/// Uncompressed SEC1 point length for P-384 (0x04 || X || Y)
const P384_POINT_LEN: usize = 97;

const PEM_TAG: &str = "PUBLIC KEY";

/// A P-384 public key exchanged during ECDH
#[derive(Clone, PartialEq, Eq)]
pub struct EcdhPublicKey {
    /// Uncompressed SEC1 point
    point: Vec<u8>,
    /// SubjectPublicKeyInfo DER
    spki_der: Vec<u8>,
}

impl EcdhPublicKey {
    /// Decode a PEM `PUBLIC KEY` block
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self, CryptoError> {
        let parsed = pem::parse(pem_bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(format!("failed to parse PEM: {}", e)))?;

        if parsed.tag() != PEM_TAG {
            return Err(CryptoError::InvalidPublicKey(format!(
                "expected PEM tag {}, got {}",
                PEM_TAG,
                parsed.tag()
            )));
        }

        Self::from_spki_der(parsed.contents())
    }

    /// Decode a DER SubjectPublicKeyInfo
    pub fn from_spki_der(der: &[u8]) -> Result<Self, CryptoError> {
        let (rest, spki) = SubjectPublicKeyInfo::from_der(der).map_err(|e| {
            CryptoError::InvalidPublicKey(format!("failed to parse SubjectPublicKeyInfo: {}", e))
        })?;

        if !rest.is_empty() {
            return Err(CryptoError::InvalidPublicKey(
                "trailing data after SubjectPublicKeyInfo".to_string(),
            ));
        }

        if spki.algorithm.algorithm != OID_KEY_TYPE_EC_PUBLIC_KEY {
            return Err(CryptoError::InvalidPublicKey(
                "not an elliptic curve public key".to_string(),
            ));
        }

        let point = spki.subject_public_key.data.to_vec();
        if point.len() != P384_POINT_LEN || point[0] != 0x04 {
            return Err(CryptoError::InvalidPublicKey(
                "expected an uncompressed P-384 point".to_string(),
            ));
        }

        Ok(Self {
            point,
            spki_der: der.to_vec(),
        })
    }

    /// Encode as a PEM `PUBLIC KEY` block (the wire format)
    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new(PEM_TAG, self.spki_der.clone()))
    }

    /// Uncompressed SEC1 point
    pub fn as_point(&self) -> &[u8] {
        &self.point
    }
}

impl fmt::Debug for EcdhPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcdhPublicKey")
            .field("len", &self.point.len())
            .finish()
    }
}

/// A fresh key pair for one exchange attempt
///
/// The private half never leaves this value and is consumed by [`agree`].
///
/// [`agree`]: EphemeralKeyPair::agree
pub struct EphemeralKeyPair {
    private: EphemeralPrivateKey,
    public: EcdhPublicKey,
}

impl EphemeralKeyPair {
    /// Generate a new P-384 key pair from the system RNG
    pub fn generate() -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();
        let private = EphemeralPrivateKey::generate(&ECDH_P384, &rng)
            .map_err(|_| CryptoError::KeyGeneration)?;
        let public = private
            .compute_public_key()
            .map_err(|_| CryptoError::KeyGeneration)?;
        let der: PublicKeyX509Der<'static> =
            public.as_der().map_err(|_| CryptoError::KeyGeneration)?;
        let public = EcdhPublicKey::from_spki_der(der.as_ref())?;

        Ok(Self { private, public })
    }

    /// The public half, to send to the peer
    pub fn public_key(&self) -> &EcdhPublicKey {
        &self.public
    }

    /// Combine with the peer's public key and derive the shared key
    pub fn agree(self, remote: &EcdhPublicKey) -> Result<CompletedEcdh, CryptoError> {
        let peer = UnparsedPublicKey::new(&ECDH_P384, remote.as_point());
        let local = self.public;

        let derived_key =
            agreement::agree_ephemeral(self.private, &peer, CryptoError::Agreement, derive_key)?;

        Ok(CompletedEcdh {
            local_public: Some(local),
            remote_public: Some(remote.clone()),
            derived_key,
        })
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

struct DerivedKeyLen;

impl hkdf::KeyType for DerivedKeyLen {
    fn len(&self) -> usize {
        DERIVED_KEY_LEN
    }
}

fn derive_key(shared_secret: &[u8]) -> Result<Zeroizing<[u8; DERIVED_KEY_LEN]>, CryptoError> {
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &[]);
    let prk = salt.extract(shared_secret);
    let okm = prk
        .expand(&[HKDF_INFO], DerivedKeyLen)
        .map_err(|_| CryptoError::Agreement)?;

    let mut key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    okm.fill(&mut key[..]).map_err(|_| CryptoError::Agreement)?;
    Ok(key)
}

/// The result of a finished key agreement
///
/// Immutable once built. The derived key is wiped from memory on drop.
#[derive(Clone)]
pub struct CompletedEcdh {
    local_public: Option<EcdhPublicKey>,
    remote_public: Option<EcdhPublicKey>,
    derived_key: Zeroizing<[u8; DERIVED_KEY_LEN]>,
}

impl CompletedEcdh {
    /// Build from an already-agreed key, with no public keys attached
    ///
    /// Used for bootstrap and test flows that pre-seed the key instead of
    /// running an exchange.
    pub fn from_derived_key(derived_key: [u8; DERIVED_KEY_LEN]) -> Self {
        Self {
            local_public: None,
            remote_public: None,
            derived_key: Zeroizing::new(derived_key),
        }
    }

    /// Our ephemeral public key
    pub fn local_public_key(&self) -> Option<&EcdhPublicKey> {
        self.local_public.as_ref()
    }

    /// The peer's ephemeral public key
    pub fn remote_public_key(&self) -> Option<&EcdhPublicKey> {
        self.remote_public.as_ref()
    }

    /// The shared symmetric key
    pub fn derived_key(&self) -> &[u8; DERIVED_KEY_LEN] {
        &self.derived_key
    }

    /// The short authenticated string both humans compare
    pub fn sas(&self) -> Sas {
        Sas::from_key(&self.derived_key[..])
    }

    /// AEAD key for sealing pairing payloads
    pub fn symmetric_key(&self) -> Result<SymmetricKey, CryptoError> {
        SymmetricKey::new(&self.derived_key[..])
    }
}

impl fmt::Debug for CompletedEcdh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Don't expose the derived key in debug output
        f.debug_struct("CompletedEcdh")
            .field("sas", &self.sas().to_string())
            .finish_non_exhaustive()
    }
}
