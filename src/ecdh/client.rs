//! Key agreement initiator

use tonic::transport::Channel;
use tracing::debug;

use crate::crypto::{CompletedEcdh, EcdhPublicKey, EphemeralKeyPair};
use crate::proto::ecdh_service_client::EcdhServiceClient;
use crate::proto::{Ack, EcdhKey};
use crate::{Error, Result};

/// Initiator side of the key agreement
///
/// Holds no state between exchanges; every call to [`exchange`] uses a
/// fresh key pair.
///
/// [`exchange`]: EcdhClient::exchange
#[derive(Clone, Debug)]
pub struct EcdhClient {
    inner: EcdhServiceClient<Channel>,
}

impl EcdhClient {
    /// Wrap a channel to the agent
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: EcdhServiceClient::new(channel),
        }
    }

    /// Run both calls and derive the shared key
    pub async fn exchange(&mut self) -> Result<CompletedEcdh> {
        let pair = EphemeralKeyPair::generate()?;

        self.inner
            .client_pubkey(EcdhKey {
                pubkey: pair.public_key().to_pem().into_bytes(),
            })
            .await
            .map_err(Error::from_status)?;

        let reply = self
            .inner
            .server_pubkey(Ack {})
            .await
            .map_err(Error::from_status)?
            .into_inner();

        let remote = EcdhPublicKey::from_pem(&reply.pubkey)
            .map_err(|e| Error::protocol(format!("agent sent an invalid public key: {}", e)))?;

        let ecdh = pair.agree(&remote)?;
        debug!(sas = %ecdh.sas(), "Key agreement complete");
        Ok(ecdh)
    }
}
