//! Successful pairings
//!
//! A controller runs the key agreement, both humans compare the SAS, and the
//! controller walks away with a certificate signed by the agent.

use masc_pairing::agent::Decision;
use masc_pairing::pki::{certificate_hostname, dns_names, verify_issued_by, PeerCertRequest};
use masc_pairing::Error;

use super::helpers::TestAgent;

/// Story: the agent's human approves before the controller asks for a
/// certificate, and the controller gets one for the name it requested.
#[tokio::test]
async fn story_approved_pairing_issues_certificate_for_requested_name() {
    let mut agent = TestAgent::start().await;
    let mut controller = agent.controller().await;

    // Chapter 1: Key agreement; both sides render the same SAS
    let ecdh = controller.exchange().await.unwrap();
    let request = agent.next_approval().await;
    assert_eq!(request.sas, ecdh.sas());
    assert_eq!(request.sas.to_string(), ecdh.sas().to_string());
    assert_eq!(request.sas.numeric(), ecdh.sas().numeric());

    // Chapter 2: The human on the agent side accepts
    agent
        .agent
        .resolve(&request.peer, request.ecdh, Decision::Accept);

    // Chapter 3: The controller sends its sealed CSR and opens the reply
    let csr = PeerCertRequest::new("example.local").unwrap();
    let certs = controller.issue(&ecdh, csr.csr_pem()).await.unwrap();

    assert_eq!(
        dns_names(&certs.client_cert_pem).unwrap(),
        vec!["example.local".to_string()]
    );
    assert_eq!(
        certificate_hostname(&certs.client_cert_pem).unwrap(),
        "example.local"
    );

    let verification =
        verify_issued_by(&certs.client_cert_pem, agent.agent.ca_cert_pem()).unwrap();
    assert!(verification.valid, "{:?}", verification.reason);

    // Chapter 4: The controller also learns the agent's own certificate
    assert_eq!(certs.server_cert_pem, agent.agent.ca_cert_pem());

    // Chapter 5: Nothing is left behind on the agent
    assert!(!agent.agent.masc_servicer().store().contains(&request.peer));
    assert!(!agent.agent.ecdh_servicer().store().contains(&request.peer));
}

/// Story: the controller is faster than the agent's human. The first attempt
/// reports pending; once the human approves, the next attempt succeeds.
#[tokio::test]
async fn story_issuance_before_approval_is_pending_then_succeeds() {
    let mut agent = TestAgent::start().await;
    let channel = agent.channel().await;
    let mut masc = masc_pairing::masc::MascClient::new(channel.clone());
    let mut ecdh_client = masc_pairing::ecdh::EcdhClient::new(channel);

    let ecdh = ecdh_client.exchange().await.unwrap();
    let request = agent.next_approval().await;
    let csr = PeerCertRequest::new("example.local").unwrap();

    // Chapter 1: No approval yet
    let first = masc.masc(&ecdh, csr.csr_pem()).await;
    assert!(matches!(first, Err(Error::Pending)));
    assert!(first.unwrap_err().is_retryable());

    // Chapter 2: The human approves after all
    agent
        .agent
        .resolve(&request.peer, request.ecdh, Decision::Accept);

    // Chapter 3: The identical request now succeeds
    let certs = masc.masc(&ecdh, csr.csr_pem()).await.unwrap();
    assert_eq!(
        dns_names(&certs.client_cert_pem).unwrap(),
        vec!["example.local".to_string()]
    );
}

/// Story: `Controller::pair` drives the whole flow while a human on the agent
/// side approves whenever the request shows up.
#[tokio::test]
async fn story_pair_retries_until_the_agent_approves() {
    let mut agent = TestAgent::start().await;
    let mut controller = agent.controller().await;

    let approver = {
        let served = agent.agent.clone();
        let mut approvals = agent.take_approvals();
        tokio::spawn(async move {
            if let Some(request) = approvals.recv().await {
                served.resolve(&request.peer, request.ecdh, Decision::Accept);
            }
        })
    };

    let csr = PeerCertRequest::new("controller.local").unwrap();
    let mut shown = None;
    let certs = controller
        .pair(csr.csr_pem(), |sas| {
            shown = Some(*sas);
            true
        })
        .await
        .unwrap();

    approver.await.unwrap();
    assert!(shown.is_some());
    assert_eq!(
        certificate_hostname(&certs.client_cert_pem).unwrap(),
        "controller.local"
    );
}

/// Story: the controller's human sees a different SAS and backs out; the
/// agent never receives a CSR.
#[tokio::test]
async fn story_unconfirmed_sas_abandons_before_issuance() {
    let mut agent = TestAgent::start().await;
    let mut controller = agent.controller().await;

    let csr = PeerCertRequest::new("controller.local").unwrap();
    let result = controller.pair(csr.csr_pem(), |_| false).await;
    assert!(matches!(result, Err(Error::PermissionDenied(_))));

    // The agent still holds the request, untouched
    let request = agent.next_approval().await;
    assert!(agent.agent.masc_servicer().store().contains(&request.peer));
}
