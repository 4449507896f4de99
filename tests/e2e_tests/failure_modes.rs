//! Pairings that must not complete
//!
//! Every failure after the key agreement is terminal: the controller has to
//! start again from `ClientPubkey`.

use std::time::Duration;

use tonic::Code;

use masc_pairing::agent::Decision;
use masc_pairing::config::{AgentConfig, StoreLimits};
use masc_pairing::crypto::{CompletedEcdh, EphemeralKeyPair};
use masc_pairing::ecdh::EcdhClient;
use masc_pairing::masc::MascClient;
use masc_pairing::pki::PeerCertRequest;
use masc_pairing::proto::ecdh_service_client::EcdhServiceClient;
use masc_pairing::proto::masc_service_client::MascServiceClient;
use masc_pairing::proto::{Ack, EcdhKey, IssueCertificateRequest};
use masc_pairing::Error;

use super::helpers::TestAgent;

fn csr() -> PeerCertRequest {
    PeerCertRequest::new("example.local").unwrap()
}

/// Story: the agent's human never answers. Once the pending entry outlives
/// its TTL the controller is refused.
#[tokio::test]
async fn story_unanswered_pairing_expires_into_permission_denied() {
    let config = AgentConfig {
        pending_store: StoreLimits {
            ttl: Duration::from_millis(200),
            capacity: 4,
        },
        ..AgentConfig::default()
    };
    let mut agent = TestAgent::start_with(config).await;
    let mut controller = agent.controller().await;

    let ecdh = controller.exchange().await.unwrap();
    let request = agent.next_approval().await;
    assert!(agent.agent.masc_servicer().store().contains(&request.peer));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!agent.agent.masc_servicer().store().contains(&request.peer));

    let result = controller.issue(&ecdh, csr().csr_pem()).await;
    assert!(matches!(result, Err(Error::PermissionDenied(_))));
    assert!(!result.unwrap_err().is_retryable());
}

/// Story: the SAS on the agent differs, so its human rejects.
#[tokio::test]
async fn story_rejected_pairing_is_permission_denied() {
    let mut agent = TestAgent::start().await;
    let mut controller = agent.controller().await;

    let ecdh = controller.exchange().await.unwrap();
    let request = agent.next_approval().await;
    agent
        .agent
        .resolve(&request.peer, request.ecdh, Decision::Reject);

    let result = controller.issue(&ecdh, csr().csr_pem()).await;
    assert!(matches!(result, Err(Error::PermissionDenied(_))));
}

/// Story: the human did not start a pairing at all and blocks the host.
/// Later attempts from that host fail at the key agreement without bothering
/// the human again.
#[tokio::test]
async fn story_blocked_host_cannot_start_another_pairing() {
    let mut agent = TestAgent::start().await;
    let mut first = agent.controller().await;

    first.exchange().await.unwrap();
    let request = agent.next_approval().await;
    agent
        .agent
        .resolve(&request.peer, request.ecdh, Decision::Block);
    assert!(agent.agent.is_blocked(&request.peer));

    let mut second = agent.controller().await;
    let result = second.exchange().await;
    assert!(matches!(result, Err(Error::PermissionDenied(_))));
    assert!(agent.approvals.try_recv().is_err());
}

#[tokio::test]
async fn server_pubkey_twice_is_denied() {
    let agent = TestAgent::start().await;
    let mut client = EcdhServiceClient::new(agent.channel().await);
    let pair = EphemeralKeyPair::generate().unwrap();

    client
        .client_pubkey(EcdhKey {
            pubkey: pair.public_key().to_pem().into_bytes(),
        })
        .await
        .unwrap();

    assert!(client.server_pubkey(Ack {}).await.is_ok());

    let second = client.server_pubkey(Ack {}).await.unwrap_err();
    assert_eq!(second.code(), Code::PermissionDenied);
}

#[tokio::test]
async fn server_pubkey_without_client_pubkey_is_denied() {
    let agent = TestAgent::start().await;
    let mut client = EcdhServiceClient::new(agent.channel().await);

    let status = client.server_pubkey(Ack {}).await.unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);
}

#[tokio::test]
async fn malformed_public_keys_are_invalid_argument() {
    let agent = TestAgent::start().await;
    let mut client = EcdhServiceClient::new(agent.channel().await);

    let garbage = client
        .client_pubkey(EcdhKey {
            pubkey: b"not a key".to_vec(),
        })
        .await
        .unwrap_err();
    assert_eq!(garbage.code(), Code::InvalidArgument);

    let oversized = client
        .client_pubkey(EcdhKey {
            pubkey: vec![b'A'; 8 * 1024],
        })
        .await
        .unwrap_err();
    assert_eq!(oversized.code(), Code::InvalidArgument);

    // Nothing was registered, so there is nothing to complete
    let status = client.server_pubkey(Ack {}).await.unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);
}

/// Story: the reply to a successful issuance is lost and the controller
/// sends the same request again. The entry is already gone.
#[tokio::test]
async fn story_replayed_issuance_is_denied() {
    let mut agent = TestAgent::start().await;
    let channel = agent.channel().await;
    let mut ecdh_client = EcdhClient::new(channel.clone());
    let mut masc = MascClient::new(channel);

    let ecdh = ecdh_client.exchange().await.unwrap();
    let request = agent.next_approval().await;
    agent
        .agent
        .resolve(&request.peer, request.ecdh, Decision::Accept);

    let csr = csr();
    masc.masc(&ecdh, csr.csr_pem()).await.unwrap();

    let replay = masc.masc(&ecdh, csr.csr_pem()).await;
    assert!(matches!(replay, Err(Error::PermissionDenied(_))));
}

/// Story: the approved entry holds a different key than the one the CSR was
/// sealed under. Decryption fails and the entry is spent.
#[tokio::test]
async fn story_csr_sealed_under_another_key_is_denied() {
    let mut agent = TestAgent::start().await;
    let mut controller = agent.controller().await;

    let ecdh = controller.exchange().await.unwrap();
    let request = agent.next_approval().await;
    agent.agent.resolve(
        &request.peer,
        CompletedEcdh::from_derived_key([9; 32]),
        Decision::Accept,
    );

    let result = controller.issue(&ecdh, csr().csr_pem()).await;
    assert!(matches!(result, Err(Error::PermissionDenied(_))));
    assert!(!agent.agent.masc_servicer().store().contains(&request.peer));
}

#[tokio::test]
async fn short_nonce_is_denied_and_consumes_the_entry() {
    let mut agent = TestAgent::start().await;
    let channel = agent.channel().await;
    let mut ecdh_client = EcdhClient::new(channel.clone());
    let mut masc = MascServiceClient::new(channel);

    let ecdh = ecdh_client.exchange().await.unwrap();
    let request = agent.next_approval().await;
    agent
        .agent
        .resolve(&request.peer, request.ecdh, Decision::Accept);

    let sealed = ecdh
        .symmetric_key()
        .unwrap()
        .seal(csr().csr_pem().as_bytes())
        .unwrap();

    let status = masc
        .issue_certificate(IssueCertificateRequest {
            encrypted_csr: sealed.ciphertext,
            encrypted_csr_nonce: sealed.nonce[..5].to_vec(),
        })
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::PermissionDenied);
    assert!(!agent.agent.masc_servicer().store().contains(&request.peer));
}
