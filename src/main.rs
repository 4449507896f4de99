//! MASC pairing - pair a controller with an agent over SAS-verified ECDH

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};

use masc_pairing::agent::{ApprovalRequest, Decision, PairingAgent};
use masc_pairing::config::{AgentConfig, ControllerConfig, StoreLimits};
use masc_pairing::controller::Controller;
use masc_pairing::pki::{CertificateAuthority, PeerCertRequest};
use masc_pairing::retry::RetryConfig;
use masc_pairing::telemetry::{init_tracing, TelemetryConfig};
use masc_pairing::{
    DEFAULT_CA_COMMON_NAME, DEFAULT_CONNECT_TIMEOUT, DEFAULT_ECDH_CAPACITY, DEFAULT_ECDH_TTL,
    DEFAULT_LISTEN_PORT, DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_PENDING_CAPACITY, DEFAULT_PENDING_TTL,
    DEFAULT_RETRY_DEADLINE, DEFAULT_RETRY_DELAY,
};

/// SAS-verified pairing between a controller and an agent
#[derive(Parser, Debug)]
#[command(name = "masc-pairing", version, about, long_about = None)]
struct Cli {
    /// Log filter, e.g. `info,masc_pairing=debug`
    #[arg(long, env = "MASC_LOG")]
    log: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "MASC_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve pairing requests and ask for approval on this console
    ///
    /// Each finished key agreement prints the peer and its SAS. Answer `y`
    /// if it matches what the controller shows, `n` if it does not, and `b`
    /// if you did not start a pairing at all; `b` blocks the host.
    Agent(AgentArgs),

    /// Pair with an agent and obtain a certificate signed by it
    Pair(PairArgs),
}

#[derive(Parser, Debug)]
struct AgentArgs {
    /// Address to listen on
    #[arg(long, env = "MASC_LISTEN", default_value_t = default_listen())]
    listen: SocketAddr,

    /// CA certificate to sign with; a fresh CA is created when omitted
    #[arg(long, env = "MASC_CA_CERT", requires = "ca_key")]
    ca_cert: Option<PathBuf>,

    /// Private key of `--ca-cert`
    #[arg(long, env = "MASC_CA_KEY", requires = "ca_cert")]
    ca_key: Option<PathBuf>,

    /// Common name of a freshly created CA
    #[arg(long, env = "MASC_CA_NAME", default_value = DEFAULT_CA_COMMON_NAME)]
    ca_name: String,

    /// Seconds a registered controller key waits for `ServerPubkey`
    #[arg(long, env = "MASC_ECDH_TTL_SECS", default_value_t = DEFAULT_ECDH_TTL.as_secs())]
    ecdh_ttl_secs: u64,

    /// Half-finished key agreements held at once
    #[arg(long, env = "MASC_ECDH_CAPACITY", default_value_t = DEFAULT_ECDH_CAPACITY)]
    ecdh_capacity: usize,

    /// Seconds a finished key agreement waits for approval and issuance
    #[arg(long, env = "MASC_PENDING_TTL_SECS", default_value_t = DEFAULT_PENDING_TTL.as_secs())]
    pending_ttl_secs: u64,

    /// Pending verifications held at once
    #[arg(long, env = "MASC_PENDING_CAPACITY", default_value_t = DEFAULT_PENDING_CAPACITY)]
    pending_capacity: usize,

    /// Pairing requests that may wait on this console
    #[arg(long, env = "MASC_APPROVAL_QUEUE", default_value_t = DEFAULT_PENDING_CAPACITY)]
    approval_queue: usize,

    /// Largest gRPC message decoded, in bytes
    #[arg(long, env = "MASC_MAX_MESSAGE_BYTES", default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    max_message_bytes: usize,
}

#[derive(Parser, Debug)]
struct PairArgs {
    /// Agent endpoint
    #[arg(long, env = "MASC_ENDPOINT", default_value_t = default_endpoint())]
    endpoint: String,

    /// DNS name to put in the certificate request
    #[arg(long, env = "MASC_NAME")]
    name: String,

    /// Directory to write `client.pem`, `client.key` and `agent.pem` into;
    /// printed to stdout when omitted
    #[arg(long, env = "MASC_OUT_DIR")]
    out_dir: Option<PathBuf>,

    /// Seconds to wait for the connection to the agent
    #[arg(long, env = "MASC_CONNECT_TIMEOUT_SECS", default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs())]
    connect_timeout_secs: u64,

    /// Seconds between issuance attempts while the agent's human decides
    #[arg(long, env = "MASC_RETRY_DELAY_SECS", default_value_t = DEFAULT_RETRY_DELAY.as_secs())]
    retry_delay_secs: u64,

    /// Seconds after which a pending issuance is given up
    #[arg(long, env = "MASC_RETRY_DEADLINE_SECS", default_value_t = DEFAULT_RETRY_DEADLINE.as_secs())]
    retry_deadline_secs: u64,
}

impl PairArgs {
    fn controller_config(&self) -> ControllerConfig {
        let delay = Duration::from_secs(self.retry_delay_secs);
        ControllerConfig {
            endpoint: self.endpoint.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            retry: RetryConfig {
                initial_delay: delay,
                max_delay: delay,
                deadline: Some(Duration::from_secs(self.retry_deadline_secs)),
                ..RetryConfig::default()
            },
        }
    }
}

impl AgentArgs {
    fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            listen_addr: self.listen,
            ecdh_store: StoreLimits {
                ttl: Duration::from_secs(self.ecdh_ttl_secs),
                capacity: self.ecdh_capacity,
            },
            pending_store: StoreLimits {
                ttl: Duration::from_secs(self.pending_ttl_secs),
                capacity: self.pending_capacity,
            },
            ca_common_name: self.ca_name.clone(),
            max_message_bytes: self.max_message_bytes,
            approval_queue: self.approval_queue,
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_LISTEN_PORT))
}

fn default_endpoint() -> String {
    format!("http://127.0.0.1:{}", DEFAULT_LISTEN_PORT)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TelemetryConfig {
        filter: cli.log.clone(),
        json: cli.log_json,
    })?;

    match cli.command {
        Commands::Agent(args) => run_agent(args).await,
        Commands::Pair(args) => run_pair(args).await,
    }
}

/// Lines typed on stdin
///
/// Read on a plain thread so a pending read never holds up shutdown.
type Console = mpsc::UnboundedReceiver<String>;

fn open_console() -> Console {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Print a question and read one trimmed, lower-cased answer
async fn ask(console: &mut Console, question: &str) -> anyhow::Result<Option<String>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(question.as_bytes()).await?;
    stdout.flush().await?;

    let line = console.recv().await;
    Ok(line.map(|l| l.trim().to_lowercase()))
}

/// Resolves once ctrl-c has been seen
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn load_ca(args: &AgentArgs) -> anyhow::Result<CertificateAuthority> {
    match (&args.ca_cert, &args.ca_key) {
        (Some(cert), Some(key)) => {
            let cert_pem = tokio::fs::read_to_string(cert)
                .await
                .with_context(|| format!("failed to read CA certificate {:?}", cert))?;
            let key_pem = tokio::fs::read_to_string(key)
                .await
                .with_context(|| format!("failed to read CA key {:?}", key))?;
            Ok(CertificateAuthority::from_pem(&cert_pem, &key_pem)?)
        }
        _ => {
            tracing::info!(common_name = %args.ca_name, "Creating in-memory CA");
            Ok(CertificateAuthority::new(&args.ca_name)?)
        }
    }
}

/// Run the agent until ctrl-c
async fn run_agent(args: AgentArgs) -> anyhow::Result<()> {
    let ca = load_ca(&args).await?;
    let (agent, mut approvals) = PairingAgent::new(args.agent_config(), ca);
    let agent = Arc::new(agent);
    let mut console = open_console();

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
        let _ = stop_tx.send(true);
    });

    // The console prompt blocks the loop below, so serve from its own task
    let mut server = tokio::spawn({
        let agent = agent.clone();
        let shutdown = stopped(stop_rx.clone());
        async move { agent.serve(shutdown).await }
    });

    loop {
        tokio::select! {
            result = &mut server => {
                result??;
                return Ok(());
            }
            Some(request) = approvals.recv() => {
                // Ctrl-c must not wait for an answer that may never come
                let decision = tokio::select! {
                    decision = prompt_decision(&mut console, &request) => decision?,
                    _ = stopped(stop_rx.clone()) => break,
                };
                agent.resolve(&request.peer, request.ecdh, decision);
            }
        }
    }

    server.await??;
    Ok(())
}

async fn prompt_decision(
    console: &mut Console,
    request: &ApprovalRequest,
) -> anyhow::Result<Decision> {
    println!();
    println!("Pairing request from {}", request.peer);
    println!("  SAS:     {}", request.sas);
    println!("  Numeric: {}", request.sas.numeric());

    loop {
        let answer = ask(console, "Does this match the controller? [y]es / [n]o / [b]lock: ")
            .await?;
        match answer.as_deref() {
            Some("y") | Some("yes") => return Ok(Decision::Accept),
            Some("n") | Some("no") | None => return Ok(Decision::Reject),
            Some("b") | Some("block") => return Ok(Decision::Block),
            Some(_) => continue,
        }
    }
}

/// Pair with an agent and emit the resulting credentials
async fn run_pair(args: PairArgs) -> anyhow::Result<()> {
    let request = PeerCertRequest::new(&args.name)?;
    let mut controller = Controller::connect(args.controller_config())
        .await
        .with_context(|| format!("failed to connect to {}", args.endpoint))?;

    let ecdh = match controller.exchange().await {
        Ok(ecdh) => ecdh,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return Err(e.into());
        }
    };

    println!("SAS:     {}", ecdh.sas());
    println!("Numeric: {}", ecdh.sas().numeric());

    let mut console = open_console();
    let answer = ask(&mut console, "Does the agent show the same code? [y/N]: ").await?;
    if !matches!(answer.as_deref(), Some("y") | Some("yes")) {
        anyhow::bail!("pairing abandoned: SAS not confirmed");
    }

    println!("Waiting for the agent to approve...");
    let certs = match controller.issue(&ecdh, request.csr_pem()).await {
        Ok(certs) => certs,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return Err(e.into());
        }
    };

    match args.out_dir {
        Some(dir) => {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(dir.join("client.pem"), &certs.client_cert_pem).await?;
            tokio::fs::write(dir.join("client.key"), request.private_key_pem()).await?;
            tokio::fs::write(dir.join("agent.pem"), &certs.server_cert_pem).await?;
            println!("Credentials written to {:?}", dir);
        }
        None => {
            print!("{}", certs.client_cert_pem);
            print!("{}", request.private_key_pem());
            print!("{}", certs.server_cert_pem);
        }
    }

    Ok(())
}
