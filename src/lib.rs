//! MASC pairing - SAS-verified anonymous ECDH and certificate issuance
//!
//! A controller with no prior trust in an agent runs an anonymous key
//! agreement against it. Both sides render the derived key as a short
//! authenticated string (SAS) for their humans to compare. Once the agent's
//! human approves, the controller sends a CSR sealed under the derived key
//! and receives, sealed the same way, a certificate signed by the agent's
//! CA together with the agent's own certificate.
//!
//! # Architecture
//!
//! - The agent is stateful: it remembers half-finished exchanges and
//!   pending verifications in bounded, expiring stores keyed by peer address
//! - The controller is stateless across calls apart from its ephemeral key
//!   and the resulting [`crypto::CompletedEcdh`]
//! - Every store entry is consumed exactly once, so a failed step always
//!   means restarting from the key agreement
//!
//! # Modules
//!
//! - [`store`] - Expiring, size-bounded map with a scoped lock
//! - [`crypto`] - P-384 ECDH, HKDF and ChaCha20-Poly1305
//! - [`sas`] - Short authenticated string rendering
//! - [`pki`] - Agent certificate authority and CSR generation
//! - [`ecdh`] - Key agreement servicer and client
//! - [`masc`] - Certificate issuance servicer and client
//! - [`agent`] - Agent-side glue: approval queue, blocking, serving
//! - [`controller`] - Controller-side orchestration
//! - [`retry`] - Bounded retry with a hard deadline
//! - [`config`] - Agent and controller configuration
//! - [`telemetry`] - Tracing initialisation
//! - [`proto`] - gRPC protocol definitions
//! - [`error`] - Error types and RPC status mapping

#![deny(missing_docs)]

pub mod agent;
pub mod config;
pub mod controller;
pub mod crypto;
pub mod ecdh;
pub mod error;
pub mod masc;
pub mod peer;
pub mod pki;
pub mod proto;
pub mod retry;
pub mod sas;
pub mod store;
pub mod telemetry;

pub use error::Error;
pub use peer::PeerId;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

use std::time::Duration;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// Shared by config defaults, servicer constructors and test fixtures.

/// Default port the agent serves both pairing services on
pub const DEFAULT_LISTEN_PORT: u16 = 40052;

/// How long a registered initiator public key waits for `ServerPubkey`
pub const DEFAULT_ECDH_TTL: Duration = Duration::from_secs(60);

/// Maximum number of half-finished key agreements held at once
pub const DEFAULT_ECDH_CAPACITY: usize = 16;

/// How long a finished key agreement waits for verification and issuance
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(60);

/// Maximum number of pending verifications held at once
pub const DEFAULT_PENDING_CAPACITY: usize = 4;

/// Largest accepted PEM public key
pub const MAX_PUBKEY_BYTES: usize = 4 * 1024;

/// Largest accepted encrypted CSR
pub const MAX_ENCRYPTED_CSR_BYTES: usize = 64 * 1024;

/// Largest gRPC message the agent decodes
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 128 * 1024;

/// Delay between issuance attempts while verification is pending
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(4);

/// Wall-clock ceiling for the issuance retry loop
pub const DEFAULT_RETRY_DEADLINE: Duration = Duration::from_secs(60);

/// Default timeout for connecting to an agent
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default common name of a freshly created agent CA
pub const DEFAULT_CA_COMMON_NAME: &str = "masc-agent.local";
