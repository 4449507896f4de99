//! Pairing stories told over the wire
//!
//! # Test Organization
//!
//! - `pairing_flow`: A controller pairs with an agent whose human approves,
//!   before or after the first issuance attempt
//!
//! - `failure_modes`: Rejection, expiry, blocking, replayed calls and
//!   mismatched keys all end in PermissionDenied
//!
//! - `capacity`: The agent's bounded stores under many simultaneous
//!   controllers

mod capacity;
mod failure_modes;
mod helpers;
mod pairing_flow;
