//! Wire-level peer identity

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use tonic::Request;

use crate::Error;

/// Identity a store is keyed by: the caller's `ip:port`
///
/// The special value `*` is never produced by a real connection. Bootstrap
/// and test flows register under it and it is consulted as a fallback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Fallback identity used by bootstrap and test flows
    pub const WILDCARD: &'static str = "*";

    /// Wrap an arbitrary identity string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The wildcard identity
    pub fn wildcard() -> Self {
        Self(Self::WILDCARD.to_string())
    }

    /// Whether this is the wildcard identity
    pub fn is_wildcard(&self) -> bool {
        self.0 == Self::WILDCARD
    }

    /// Identity of the caller of an RPC
    pub fn from_request<T>(request: &Request<T>) -> Result<Self, Error> {
        request
            .remote_addr()
            .map(Self::from)
            .ok_or_else(|| Error::permission_denied("caller address unknown"))
    }

    /// The identity with its port stripped
    ///
    /// Blocking applies per host, not per connection.
    pub fn host(&self) -> &str {
        // A bare IPv6 literal has colons but no port
        if self.0.parse::<IpAddr>().is_ok() {
            return &self.0;
        }
        match self.0.rsplit_once(':') {
            Some((host, port)) if port.parse::<u16>().is_ok() => host
                .strip_prefix('[')
                .and_then(|h| h.strip_suffix(']'))
                .unwrap_or(host),
            _ => &self.0,
        }
    }

    /// The identity as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for PeerId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
