//! Agent and controller configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::retry::RetryConfig;
use crate::{
    DEFAULT_CA_COMMON_NAME, DEFAULT_CONNECT_TIMEOUT, DEFAULT_ECDH_CAPACITY, DEFAULT_ECDH_TTL,
    DEFAULT_LISTEN_PORT, DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_PENDING_CAPACITY, DEFAULT_PENDING_TTL,
};

/// Bounds of one expiring store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreLimits {
    /// Maximum entry age
    pub ttl: Duration,
    /// Maximum number of entries
    pub capacity: usize,
}

/// Configuration for the agent (responder)
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Address both pairing services listen on
    pub listen_addr: SocketAddr,
    /// Registered initiator public keys awaiting `ServerPubkey`
    pub ecdh_store: StoreLimits,
    /// Finished exchanges awaiting verification and issuance
    pub pending_store: StoreLimits,
    /// Common name (and SAN) of a freshly created CA
    pub ca_common_name: String,
    /// Largest gRPC message decoded
    pub max_message_bytes: usize,
    /// Approval requests that may queue for the human before new ones are refused
    pub approval_queue: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_LISTEN_PORT)),
            ecdh_store: StoreLimits {
                ttl: DEFAULT_ECDH_TTL,
                capacity: DEFAULT_ECDH_CAPACITY,
            },
            pending_store: StoreLimits {
                ttl: DEFAULT_PENDING_TTL,
                capacity: DEFAULT_PENDING_CAPACITY,
            },
            ca_common_name: DEFAULT_CA_COMMON_NAME.to_string(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            approval_queue: DEFAULT_PENDING_CAPACITY,
        }
    }
}

/// Configuration for the controller (initiator)
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Agent endpoint, e.g. `http://living-room.local:40052`
    pub endpoint: String,
    /// Timeout for establishing the connection
    pub connect_timeout: Duration,
    /// Retry policy for certificate issuance
    pub retry: RetryConfig,
}

impl ControllerConfig {
    /// Config for an agent endpoint with default timeouts
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            endpoint: format!("http://127.0.0.1:{}", DEFAULT_LISTEN_PORT),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}
