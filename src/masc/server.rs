//! Certificate issuance responder

use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use super::PendingVerification;
use crate::pki::CertificateAuthority;
use crate::proto::masc_service_server::{MascService, MascServiceServer};
use crate::proto::{IssueCertificateReply, IssueCertificateRequest};
use crate::store::TimedStore;
use crate::{
    Error, PeerId, Result, DEFAULT_PENDING_CAPACITY, DEFAULT_PENDING_TTL, MAX_ENCRYPTED_CSR_BYTES,
};

/// Told about every certificate the agent is about to hand out
///
/// Called after the reply has been sealed. Returning false withholds the
/// certificate and fails the call.
#[cfg_attr(test, automock)]
pub trait IssuanceObserver: Send + Sync {
    /// Accept or refuse the newly paired peer
    fn certificate_issued(&self, peer: &PeerId, cert_pem: &str) -> bool;
}

impl<F> IssuanceObserver for F
where
    F: Fn(&PeerId, &str) -> bool + Send + Sync,
{
    fn certificate_issued(&self, peer: &PeerId, cert_pem: &str) -> bool {
        self(peer, cert_pem)
    }
}

/// Responder side of certificate issuance
pub struct MascServicer {
    pending: TimedStore<PeerId, PendingVerification>,
    ca: Arc<CertificateAuthority>,
    observer: Arc<dyn IssuanceObserver>,
}

impl MascServicer {
    /// Create a servicer with the default store bounds (60 s, 4 peers)
    pub fn new(ca: Arc<CertificateAuthority>, observer: Arc<dyn IssuanceObserver>) -> Self {
        Self::with_store(
            TimedStore::new(DEFAULT_PENDING_TTL, DEFAULT_PENDING_CAPACITY),
            ca,
            observer,
        )
    }

    /// Create a servicer around an existing store
    pub fn with_store(
        pending: TimedStore<PeerId, PendingVerification>,
        ca: Arc<CertificateAuthority>,
        observer: Arc<dyn IssuanceObserver>,
    ) -> Self {
        Self {
            pending,
            ca,
            observer,
        }
    }

    /// Pending verifications
    pub fn store(&self) -> &TimedStore<PeerId, PendingVerification> {
        &self.pending
    }

    /// Record the verification state for a peer, replacing any earlier one
    pub fn add_pending(&self, peer: PeerId, state: PendingVerification) {
        debug!(peer = %peer, approved = state.is_approved(), "Recording verification state");
        self.pending.set(peer, state);
    }

    /// Drop a peer's pending verification
    pub fn revoke(&self, peer: &PeerId) -> bool {
        let removed = self.pending.delete(peer).is_some();
        if removed {
            debug!(peer = %peer, "Revoked pending verification");
        }
        removed
    }

    /// Handle one `IssueCertificate` call
    ///
    /// The peer's entry (or, failing that, the wildcard entry) is consumed
    /// before anything else happens.
    pub fn issue_certificate(
        &self,
        peer: &PeerId,
        encrypted_csr: &[u8],
        nonce: &[u8],
    ) -> Result<IssueCertificateReply> {
        if encrypted_csr.len() > MAX_ENCRYPTED_CSR_BYTES {
            warn!(peer = %peer, len = encrypted_csr.len(), "Encrypted CSR too large");
            return Err(Error::invalid_argument("certificate signing request too large"));
        }

        let mut pending = self.pending.lock();
        let entry = pending
            .take(peer)
            .or_else(|| pending.take(&PeerId::wildcard()));
        drop(pending);

        let ecdh = match entry {
            None => {
                warn!(peer = %peer, "No pending verification");
                return Err(Error::permission_denied("no corresponding ECDH"));
            }
            Some(PendingVerification::AwaitingApproval) => {
                info!(peer = %peer, "Issuance requested before approval");
                return Err(Error::Pending);
            }
            Some(PendingVerification::Approved(ecdh)) => ecdh,
        };

        let key = ecdh.symmetric_key()?;
        let csr = key.open(nonce, encrypted_csr).map_err(|e| {
            warn!(peer = %peer, error = %e, "Could not decrypt CSR");
            Error::permission_denied("could not decrypt request")
        })?;

        let csr_pem = String::from_utf8(csr)
            .map_err(|_| Error::invalid_argument("malformed certificate signing request"))?;

        let cert_pem = self.ca.issue_from_csr(&csr_pem).map_err(|e| {
            warn!(peer = %peer, error = %e, "Could not issue certificate");
            Error::from(e)
        })?;

        let client = key.seal(cert_pem.as_bytes())?;
        let server = key.seal(self.ca.ca_cert_pem().as_bytes())?;

        if !self.observer.certificate_issued(peer, &cert_pem) {
            info!(peer = %peer, "Issued certificate refused by observer");
            return Err(Error::permission_denied("pairing refused"));
        }

        info!(peer = %peer, "Issued certificate");
        Ok(IssueCertificateReply {
            encrypted_client_certificate: client.ciphertext,
            encrypted_client_certificate_nonce: client.nonce.to_vec(),
            encrypted_server_certificate: server.ciphertext,
            encrypted_server_certificate_nonce: server.nonce.to_vec(),
        })
    }

    /// Convert to a tonic service
    pub fn into_service(self) -> MascServiceServer<Self> {
        MascServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl MascService for MascServicer {
    #[instrument(skip(self, request))]
    async fn issue_certificate(
        &self,
        request: Request<IssueCertificateRequest>,
    ) -> std::result::Result<Response<IssueCertificateReply>, Status> {
        let peer = PeerId::from_request(&request)?;
        let body = request.into_inner();
        let reply = MascServicer::issue_certificate(
            self,
            &peer,
            &body.encrypted_csr,
            &body.encrypted_csr_nonce,
        )?;
        Ok(Response::new(reply))
    }
}
