//! Key agreement responder

use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use crate::crypto::{CompletedEcdh, EcdhPublicKey, EphemeralKeyPair};
use crate::proto::ecdh_service_server::{EcdhService, EcdhServiceServer};
use crate::proto::{Ack, EcdhKey};
use crate::store::TimedStore;
use crate::{Error, PeerId, Result, DEFAULT_ECDH_CAPACITY, DEFAULT_ECDH_TTL, MAX_PUBKEY_BYTES};

/// Decides whether a finished key agreement may proceed
///
/// Called synchronously inside `ServerPubkey`. Implementations should queue
/// any human interaction and return quickly.
#[cfg_attr(test, automock)]
pub trait EcdhVerifier: Send + Sync {
    /// Return false to reject the exchange
    fn verify(&self, peer: &PeerId, ecdh: &CompletedEcdh) -> bool;
}

impl<F> EcdhVerifier for F
where
    F: Fn(&PeerId, &CompletedEcdh) -> bool + Send + Sync,
{
    fn verify(&self, peer: &PeerId, ecdh: &CompletedEcdh) -> bool {
        self(peer, ecdh)
    }
}

/// Responder side of the key agreement
pub struct EcdhServicer {
    peers: TimedStore<PeerId, EcdhPublicKey>,
    verifier: Arc<dyn EcdhVerifier>,
}

impl EcdhServicer {
    /// Create a servicer with the default store bounds (60 s, 16 peers)
    pub fn new(verifier: Arc<dyn EcdhVerifier>) -> Self {
        Self::with_store(
            TimedStore::new(DEFAULT_ECDH_TTL, DEFAULT_ECDH_CAPACITY),
            verifier,
        )
    }

    /// Create a servicer around an existing store
    pub fn with_store(
        peers: TimedStore<PeerId, EcdhPublicKey>,
        verifier: Arc<dyn EcdhVerifier>,
    ) -> Self {
        Self { peers, verifier }
    }

    /// Registered initiator keys awaiting `ServerPubkey`
    pub fn store(&self) -> &TimedStore<PeerId, EcdhPublicKey> {
        &self.peers
    }

    /// Record an initiator's public key (`ClientPubkey`)
    pub fn register_client_key(&self, peer: PeerId, pubkey_pem: &[u8]) -> Result<()> {
        if pubkey_pem.len() > MAX_PUBKEY_BYTES {
            warn!(peer = %peer, len = pubkey_pem.len(), "Public key too large");
            return Err(Error::invalid_argument("public key too large"));
        }

        let key = EcdhPublicKey::from_pem(pubkey_pem).map_err(|e| {
            warn!(peer = %peer, error = %e, "Rejecting malformed public key");
            Error::invalid_argument("malformed public key")
        })?;

        debug!(peer = %peer, "Registered initiator public key");
        self.peers.set(peer, key);
        Ok(())
    }

    /// Finish the exchange for `peer` and return our public key (`ServerPubkey`)
    ///
    /// The registration is consumed whether or not this succeeds.
    pub fn complete_exchange(&self, peer: &PeerId) -> Result<EcdhPublicKey> {
        let remote = self.peers.take(peer).ok_or_else(|| {
            warn!(peer = %peer, "No registered public key");
            Error::permission_denied("no corresponding client public key")
        })?;

        let pair = EphemeralKeyPair::generate()?;
        let local = pair.public_key().clone();
        let ecdh = pair.agree(&remote)?;

        if !self.verifier.verify(peer, &ecdh) {
            info!(peer = %peer, "Key agreement rejected by verifier");
            return Err(Error::permission_denied("key agreement rejected"));
        }

        info!(peer = %peer, "Key agreement complete");
        Ok(local)
    }

    /// Convert to a tonic service
    pub fn into_service(self) -> EcdhServiceServer<Self> {
        EcdhServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl EcdhService for EcdhServicer {
    #[instrument(skip(self, request))]
    async fn client_pubkey(
        &self,
        request: Request<EcdhKey>,
    ) -> std::result::Result<Response<Ack>, Status> {
        let peer = PeerId::from_request(&request)?;
        self.register_client_key(peer, &request.into_inner().pubkey)?;
        Ok(Response::new(Ack {}))
    }

    #[instrument(skip(self, request))]
    async fn server_pubkey(
        &self,
        request: Request<Ack>,
    ) -> std::result::Result<Response<EcdhKey>, Status> {
        let peer = PeerId::from_request(&request)?;
        let local = self.complete_exchange(&peer)?;
        Ok(Response::new(EcdhKey {
            pubkey: local.to_pem().into_bytes(),
        }))
    }
}
