//! Agent-side pairing
//!
//! [`PairingAgent`] owns the key agreement and issuance servicers and wires
//! them to a human.
//!
//! # Flow
//!
//! 1. A controller finishes the key agreement. The agent records the peer as
//!    awaiting approval and queues an [`ApprovalRequest`] carrying the SAS
//! 2. Whatever drives the UI shows the SAS and calls [`PairingAgent::resolve`]
//!    with the human's [`Decision`]
//! 3. On accept, the controller's next `IssueCertificate` succeeds
//!
//! Hosts the human marks as unsolicited are blocked from further key
//! agreements for the lifetime of the agent.
//!
//! # Security Model
//!
//! Both services run without TLS. Public keys are public, and everything
//! else is sealed under a key only the two ends of the agreement hold.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::crypto::CompletedEcdh;
use crate::ecdh::{EcdhServicer, EcdhVerifier};
use crate::masc::{IssuanceObserver, MascServicer, PendingVerification};
use crate::pki::CertificateAuthority;
use crate::proto::ecdh_service_server::EcdhServiceServer;
use crate::proto::masc_service_server::MascServiceServer;
use crate::sas::Sas;
use crate::store::TimedStore;
use crate::{PeerId, Result};

/// A finished key agreement waiting for a human
#[derive(Clone, Debug)]
pub struct ApprovalRequest {
    /// Who is asking
    pub peer: PeerId,
    /// The exchange to approve
    pub ecdh: CompletedEcdh,
    /// What the human should compare
    pub sas: Sas,
}

/// The human's answer to an [`ApprovalRequest`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// The SAS matches
    Accept,
    /// The SAS does not match
    Reject,
    /// The request was unsolicited; refuse this host from now on
    Block,
}

type BlockedHosts = Arc<RwLock<HashSet<String>>>;

/// Verifier that queues every exchange for a human
struct ApprovalQueue {
    masc: Arc<MascServicer>,
    blocked: BlockedHosts,
    requests: mpsc::Sender<ApprovalRequest>,
}

impl EcdhVerifier for ApprovalQueue {
    fn verify(&self, peer: &PeerId, ecdh: &CompletedEcdh) -> bool {
        if self.blocked.read().contains(peer.host()) {
            warn!(peer = %peer, "Refusing key agreement from blocked host");
            return false;
        }

        self.masc
            .add_pending(peer.clone(), PendingVerification::AwaitingApproval);

        let request = ApprovalRequest {
            peer: peer.clone(),
            ecdh: ecdh.clone(),
            sas: ecdh.sas(),
        };

        match self.requests.try_send(request) {
            Ok(()) => {
                info!(peer = %peer, "Queued pairing request for approval");
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(peer = %peer, "Too many pairing requests awaiting approval");
                self.masc.revoke(peer);
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(peer = %peer, "Nobody is handling pairing requests");
                self.masc.revoke(peer);
                false
            }
        }
    }
}

/// Agent that serves pairing and routes approvals to a human
pub struct PairingAgent {
    config: AgentConfig,
    ca: Arc<CertificateAuthority>,
    ecdh: Arc<EcdhServicer>,
    masc: Arc<MascServicer>,
    blocked: BlockedHosts,
}

impl PairingAgent {
    /// Create an agent that accepts every certificate it issues
    ///
    /// Returns the receiving end of the approval queue.
    pub fn new(
        config: AgentConfig,
        ca: CertificateAuthority,
    ) -> (Self, mpsc::Receiver<ApprovalRequest>) {
        Self::with_observer(config, ca, Arc::new(|_: &PeerId, _: &str| true))
    }

    /// Create an agent with an issuance observer
    pub fn with_observer(
        config: AgentConfig,
        ca: CertificateAuthority,
        observer: Arc<dyn IssuanceObserver>,
    ) -> (Self, mpsc::Receiver<ApprovalRequest>) {
        let ca = Arc::new(ca);
        let blocked: BlockedHosts = Arc::new(RwLock::new(HashSet::new()));
        let (requests, approvals) = mpsc::channel(config.approval_queue.max(1));

        let masc = Arc::new(MascServicer::with_store(
            TimedStore::new(config.pending_store.ttl, config.pending_store.capacity),
            ca.clone(),
            observer,
        ));

        let queue = ApprovalQueue {
            masc: masc.clone(),
            blocked: blocked.clone(),
            requests,
        };

        let ecdh = Arc::new(EcdhServicer::with_store(
            TimedStore::new(config.ecdh_store.ttl, config.ecdh_store.capacity),
            Arc::new(queue),
        ));

        let agent = Self {
            config,
            ca,
            ecdh,
            masc,
            blocked,
        };
        (agent, approvals)
    }

    /// The agent's certificate, handed to paired controllers
    pub fn ca_cert_pem(&self) -> &str {
        self.ca.ca_cert_pem()
    }

    /// Key agreement servicer
    pub fn ecdh_servicer(&self) -> &Arc<EcdhServicer> {
        &self.ecdh
    }

    /// Issuance servicer
    pub fn masc_servicer(&self) -> &Arc<MascServicer> {
        &self.masc
    }

    /// Apply the human's decision for a queued request
    pub fn resolve(&self, peer: &PeerId, ecdh: CompletedEcdh, decision: Decision) {
        match decision {
            Decision::Accept => {
                info!(peer = %peer, "Pairing approved");
                self.masc
                    .add_pending(peer.clone(), PendingVerification::Approved(ecdh));
            }
            Decision::Reject => {
                info!(peer = %peer, "Pairing rejected");
                self.masc.revoke(peer);
            }
            Decision::Block => {
                warn!(
                    peer = %peer,
                    host = %peer.host(),
                    "Pairing marked unsolicited, blocking host"
                );
                self.masc.revoke(peer);
                self.block_host(peer.host());
            }
        }
    }

    /// Refuse all future key agreements from a host
    ///
    /// The set is never pruned. Hosts only enter it through a `Block` answer.
    pub fn block_host(&self, host: &str) {
        self.blocked.write().insert(host.to_string());
    }

    /// Allow a previously blocked host again
    pub fn unblock_host(&self, host: &str) -> bool {
        self.blocked.write().remove(host)
    }

    /// Whether a peer's host is blocked
    pub fn is_blocked(&self, peer: &PeerId) -> bool {
        self.blocked.read().contains(peer.host())
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn serve(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve_with_incoming(listener, shutdown).await
    }

    /// Serve both services on an already bound listener
    pub async fn serve_with_incoming(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let addr = listener.local_addr()?;
        let max = self.config.max_message_bytes;

        info!(%addr, "Serving pairing services");

        let ecdh = EcdhServiceServer::from_arc(self.ecdh.clone()).max_decoding_message_size(max);
        let masc = MascServiceServer::from_arc(self.masc.clone()).max_decoding_message_size(max);

        Server::builder()
            .add_service(ecdh)
            .add_service(masc)
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await?;

        Ok(())
    }
}
