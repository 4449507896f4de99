//! Certificate issuance initiator

use tonic::transport::Channel;
use tracing::debug;

use super::PairedCertificates;
use crate::crypto::{CompletedEcdh, SymmetricKey};
use crate::proto::masc_service_client::MascServiceClient;
use crate::proto::IssueCertificateRequest;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, Result};

/// Initiator side of certificate issuance
#[derive(Clone, Debug)]
pub struct MascClient {
    inner: MascServiceClient<Channel>,
}

impl MascClient {
    /// Wrap a channel to the agent
    ///
    /// Use the channel the key agreement ran over so the agent sees the same
    /// peer address.
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: MascServiceClient::new(channel),
        }
    }

    /// One issuance attempt
    ///
    /// [`Error::Pending`] means the agent's human has not approved yet; any
    /// other error means pairing must restart from the key agreement.
    pub async fn masc(
        &mut self,
        ecdh: &CompletedEcdh,
        csr_pem: &str,
    ) -> Result<PairedCertificates> {
        let key = ecdh.symmetric_key()?;
        let sealed = key.seal(csr_pem.as_bytes())?;

        let reply = self
            .inner
            .issue_certificate(IssueCertificateRequest {
                encrypted_csr: sealed.ciphertext,
                encrypted_csr_nonce: sealed.nonce.to_vec(),
            })
            .await
            .map_err(Error::from_status)?
            .into_inner();

        let client_cert_pem = open_certificate(
            &key,
            &reply.encrypted_client_certificate_nonce,
            &reply.encrypted_client_certificate,
            "client",
        )?;
        let server_cert_pem = open_certificate(
            &key,
            &reply.encrypted_server_certificate_nonce,
            &reply.encrypted_server_certificate,
            "server",
        )?;

        debug!("Received paired certificates");
        Ok(PairedCertificates {
            client_cert_pem,
            server_cert_pem,
        })
    }

    /// Issuance attempts repeated while the agent reports pending
    pub async fn masc_with_retry(
        &self,
        ecdh: &CompletedEcdh,
        csr_pem: &str,
        config: &RetryConfig,
    ) -> Result<PairedCertificates> {
        retry_with_backoff(config, "issue_certificate", || {
            let mut client = self.clone();
            async move { client.masc(ecdh, csr_pem).await }
        })
        .await
    }
}

fn open_certificate(
    key: &SymmetricKey,
    nonce: &[u8],
    ciphertext: &[u8],
    which: &str,
) -> Result<String> {
    let plaintext = key
        .open(nonce, ciphertext)
        .map_err(|e| Error::protocol(format!("could not decrypt {} certificate: {}", which, e)))?;
    String::from_utf8(plaintext)
        .map_err(|_| Error::protocol(format!("{} certificate is not valid PEM", which)))
}
