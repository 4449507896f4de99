//! Shared fixtures: a running agent and connected controllers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tonic::transport::Channel;

use masc_pairing::agent::{ApprovalRequest, PairingAgent};
use masc_pairing::config::{AgentConfig, ControllerConfig};
use masc_pairing::controller::Controller;
use masc_pairing::pki::CertificateAuthority;
use masc_pairing::retry::RetryConfig;

/// Timeout for waiting on an approval request
pub const APPROVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// An agent serving on a loopback port
pub struct TestAgent {
    pub agent: Arc<PairingAgent>,
    pub approvals: mpsc::Receiver<ApprovalRequest>,
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<masc_pairing::Result<()>>,
}

impl TestAgent {
    /// Start an agent with the default configuration
    pub async fn start() -> Self {
        Self::start_with(AgentConfig::default()).await
    }

    /// Start an agent with a custom configuration
    pub async fn start_with(config: AgentConfig) -> Self {
        let ca = CertificateAuthority::new("agent.local").unwrap();
        let (agent, approvals) = PairingAgent::new(config, ca);
        let agent = Arc::new(agent);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, stop) = oneshot::channel::<()>();

        let server = agent.clone();
        let handle = tokio::spawn(async move {
            server
                .serve_with_incoming(listener, async {
                    let _ = stop.await;
                })
                .await
        });

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            agent,
            approvals,
            addr,
            shutdown: Some(shutdown),
            handle,
        }
    }

    /// Next approval request, failing the test if none arrives
    pub async fn next_approval(&mut self) -> ApprovalRequest {
        tokio::time::timeout(APPROVAL_TIMEOUT, self.approvals.recv())
            .await
            .expect("timed out waiting for approval request")
            .expect("approval queue closed")
    }

    /// Hand the approval queue to another task
    pub fn take_approvals(&mut self) -> mpsc::Receiver<ApprovalRequest> {
        let (_, closed) = mpsc::channel(1);
        std::mem::replace(&mut self.approvals, closed)
    }

    /// A fresh connection to the agent, i.e. a new peer identity
    pub async fn channel(&self) -> Channel {
        Channel::from_shared(format!("http://{}", self.addr))
            .unwrap()
            .connect()
            .await
            .unwrap()
    }

    /// A controller on its own connection with a short retry policy
    pub async fn controller(&self) -> Controller {
        let config = ControllerConfig {
            endpoint: format!("http://{}", self.addr),
            retry: fast_retry(),
            ..ControllerConfig::default()
        };
        Controller::from_channel(self.channel().await, config)
    }
}

impl Drop for TestAgent {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.handle.abort();
    }
}

/// Retry policy that keeps tests quick
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        initial_delay: Duration::from_millis(200),
        max_delay: Duration::from_millis(200),
        jitter: 0.0,
        deadline: Some(Duration::from_secs(5)),
        ..RetryConfig::default()
    }
}
