//! Anonymous key agreement over gRPC
//!
//! Two unary calls. The initiator registers its ephemeral public key with
//! `ClientPubkey`; `ServerPubkey` then consumes that registration, derives
//! the shared key on the responder, hands the result to an [`EcdhVerifier`]
//! and returns the responder's ephemeral public key.
//!
//! Nothing here is authenticated. The derived key only becomes trusted once
//! the humans on both ends have compared its SAS.

pub mod client;
pub mod server;

pub use client::EcdhClient;
pub use server::{EcdhServicer, EcdhVerifier};
