//! Certificate issuance gated by human verification
//!
//! Per peer the agent moves through:
//!
//! ```text
//! (absent) --key agreement--> AwaitingApproval --human accepts--> Approved
//!                                   |                                 |
//!                                   +--- IssueCertificate -> Pending  +--- IssueCertificate -> issued
//! ```
//!
//! Every `IssueCertificate` call consumes the peer's entry, whatever its
//! outcome. A controller that hits "pending" needs the agent's human to
//! approve (again) before its next attempt can succeed. Entries expire after
//! the store TTL.

pub mod client;
pub mod server;

pub use client::MascClient;
pub use server::{IssuanceObserver, MascServicer};

use crate::crypto::CompletedEcdh;

/// Verification state of a finished key agreement
#[derive(Clone, Debug)]
pub enum PendingVerification {
    /// Key agreement finished, human decision outstanding
    AwaitingApproval,
    /// Human approved; the exchange may be used for one issuance
    Approved(CompletedEcdh),
}

impl PendingVerification {
    /// Whether a human has approved this exchange
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved(_))
    }
}

/// Result of a successful issuance, as seen by the controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairedCertificates {
    /// Certificate issued to the controller, signed by the agent CA
    pub client_cert_pem: String,
    /// The agent's own certificate
    pub server_cert_pem: String,
}
