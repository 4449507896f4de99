//! Tracing initialisation

use thiserror::Error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,masc_pairing=debug,tower=warn,hyper=warn";

/// Telemetry errors
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directive could not be parsed
    #[error("invalid log filter: {0}")]
    Filter(String),

    /// A global subscriber is already installed
    #[error("failed to install subscriber: {0}")]
    Install(String),
}

/// Logging options
#[derive(Clone, Debug, Default)]
pub struct TelemetryConfig {
    /// Filter directive; `RUST_LOG`, then [`DEFAULT_FILTER`] when unset
    pub filter: Option<String>,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    match &config.filter {
        Some(directive) => {
            EnvFilter::try_new(directive).map_err(|e| TelemetryError::Filter(e.to_string()))
        }
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
            .map_err(|e| TelemetryError::Filter(e.to_string())),
    }
}

/// Install the global tracing subscriber
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    result.map_err(|e| TelemetryError::Install(e.to_string()))
}
