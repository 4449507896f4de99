//! Controller-side pairing
//!
//! The controller runs the key agreement, shows the SAS to its human, and on
//! confirmation asks the agent for a certificate. Both steps share one
//! channel so the agent sees a single peer address throughout.

use tonic::transport::{Channel, Endpoint};
use tracing::{info, instrument, warn};

use crate::config::ControllerConfig;
use crate::crypto::CompletedEcdh;
use crate::ecdh::EcdhClient;
use crate::masc::{MascClient, PairedCertificates};
use crate::sas::Sas;
use crate::{Error, Result};

/// Pairing initiator bound to one agent
#[derive(Clone, Debug)]
pub struct Controller {
    config: ControllerConfig,
    ecdh: EcdhClient,
    masc: MascClient,
}

impl Controller {
    /// Connect to the agent at `config.endpoint`
    pub async fn connect(config: ControllerConfig) -> Result<Self> {
        let channel = Endpoint::from_shared(config.endpoint.clone())?
            .connect_timeout(config.connect_timeout)
            .connect()
            .await?;

        info!(endpoint = %config.endpoint, "Connected to agent");
        Ok(Self::from_channel(channel, config))
    }

    /// Use an existing channel
    pub fn from_channel(channel: Channel, config: ControllerConfig) -> Self {
        Self {
            ecdh: EcdhClient::new(channel.clone()),
            masc: MascClient::new(channel),
            config,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run the key agreement
    pub async fn exchange(&mut self) -> Result<CompletedEcdh> {
        self.ecdh.exchange().await
    }

    /// Request a certificate, retrying while the agent's human decides
    pub async fn issue(&self, ecdh: &CompletedEcdh, csr_pem: &str) -> Result<PairedCertificates> {
        self.masc
            .masc_with_retry(ecdh, csr_pem, &self.config.retry)
            .await
    }

    /// Full pairing: key agreement, local SAS confirmation, issuance
    ///
    /// `confirm` sees the SAS this side derived. Returning false abandons the
    /// pairing before anything is sent to the agent.
    #[instrument(skip(self, csr_pem, confirm), fields(endpoint = %self.config.endpoint))]
    pub async fn pair<F>(&mut self, csr_pem: &str, confirm: F) -> Result<PairedCertificates>
    where
        F: FnOnce(&Sas) -> bool,
    {
        let ecdh = self.exchange().await?;

        if !confirm(&ecdh.sas()) {
            warn!("SAS not confirmed, abandoning pairing");
            return Err(Error::permission_denied("SAS not confirmed"));
        }

        let certs = self.issue(&ecdh, csr_pem).await?;
        info!("Pairing complete");
        Ok(certs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn malformed_endpoint_is_a_transport_error() {
        let result = Controller::connect(ControllerConfig::new("not a uri")).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn unreachable_agent_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = ControllerConfig::new(format!("http://{}", addr));
        config.connect_timeout = Duration::from_secs(2);

        let result = Controller::connect(config).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
