//! Bounded agent state under load

use futures::future::join_all;
use tonic::Code;

use masc_pairing::config::AgentConfig;
use masc_pairing::crypto::EphemeralKeyPair;
use masc_pairing::proto::ecdh_service_client::EcdhServiceClient;
use masc_pairing::proto::{Ack, EcdhKey};

use super::helpers::TestAgent;

const CONTROLLERS: usize = 17;

/// Story: seventeen controllers register keys with an agent that remembers
/// sixteen. The oldest registration is evicted, so exactly sixteen key
/// agreements can be completed.
#[tokio::test]
async fn story_seventeenth_registration_evicts_the_oldest() {
    let config = AgentConfig {
        approval_queue: 32,
        ..AgentConfig::default()
    };
    let agent = TestAgent::start_with(config).await;
    assert_eq!(agent.agent.ecdh_servicer().store().capacity(), 16);

    // Chapter 1: Each controller gets its own connection, hence its own peer id
    let mut clients = Vec::with_capacity(CONTROLLERS);
    for _ in 0..CONTROLLERS {
        clients.push(EcdhServiceClient::new(agent.channel().await));
    }

    // Chapter 2: All of them register at once
    let registrations = clients.iter().cloned().map(|mut client| async move {
        let pair = EphemeralKeyPair::generate().unwrap();
        client
            .client_pubkey(EcdhKey {
                pubkey: pair.public_key().to_pem().into_bytes(),
            })
            .await
    });
    for result in join_all(registrations).await {
        assert!(result.is_ok());
    }
    assert_eq!(agent.agent.ecdh_servicer().store().len(), 16);

    // Chapter 3: Everyone tries to finish; one registration is gone
    let completions = clients
        .iter()
        .cloned()
        .map(|mut client| async move { client.server_pubkey(Ack {}).await });
    let results = join_all(completions).await;

    let completed = results.iter().filter(|r| r.is_ok()).count();
    let denied = results
        .iter()
        .filter(|r| matches!(r, Err(status) if status.code() == Code::PermissionDenied))
        .count();

    assert_eq!(completed, 16);
    assert_eq!(denied, 1);
    assert!(agent.agent.ecdh_servicer().store().is_empty());
}
