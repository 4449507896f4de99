//! gRPC protocol definitions for pairing
//!
//! Generated Protobuf and tonic code for the two pairing services:
//!
//! - `EcdhService`: anonymous two-call key agreement
//!   (`ClientPubkey`, then `ServerPubkey`)
//! - `MascService`: certificate issuance sealed under the agreed key
//!   (`IssueCertificate`)
//!
//! Both services are served on one listener, so a controller talking over a
//! single channel presents the same peer address to both.
//!
//! # Example
//!
//! ```ignore
//! use masc_pairing::proto::ecdh_service_client::EcdhServiceClient;
//!
//! let mut client = EcdhServiceClient::connect("http://agent.local:40052").await?;
//! client.client_pubkey(EcdhKey { pubkey }).await?;
//! let reply = client.server_pubkey(Ack {}).await?;
//! ```

#![allow(missing_docs)] // Generated code doesn't have docs

/// Generated protobuf and gRPC code for pairing
pub mod pairing {
    /// Version 1 of the pairing protocol
    pub mod v1 {
        tonic::include_proto!("masc.pairing.v1");
    }
}

// Re-export commonly used types at the module level for convenience
pub use pairing::v1::*;
