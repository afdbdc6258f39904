//! Vigil Daemon - anomaly detection over observability telemetry
//!
//! The daemon provides:
//! - NDJSON ingress of metric samples and log lines
//! - Window sealing and scoring on a fixed cadence
//! - Periodic model retraining sweeps
//! - Alert and score egress as structured logs (optionally JSON lines)

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_daemon::{Server, VigilConfig};

/// Vigil Daemon CLI
#[derive(Parser)]
#[command(name = "vigild")]
#[command(about = "Vigil Daemon - anomaly detection and alerting", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "VIGIL_CONFIG")]
    config: Option<String>,

    /// NDJSON input file, `-` for stdin
    #[arg(short, long, env = "VIGIL_INPUT")]
    input: Option<PathBuf>,

    /// Log event templates (JSON array)
    #[arg(short, long, env = "VIGIL_TEMPLATES")]
    templates: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "VIGIL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "VIGIL_LOG_JSON")]
    json: bool,

    /// Write pipeline events to stdout as JSON lines
    #[arg(long)]
    emit_events: bool,

    /// Exit when the input is exhausted
    #[arg(long)]
    exit_on_eof: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = VigilConfig::load(cli.config.as_deref())
        .with_context(|| format!("loading configuration {:?}", cli.config))?;

    // Override with CLI args
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    if cli.input.is_some() {
        config.ingress.input = cli.input;
    }
    if cli.templates.is_some() {
        config.ingress.templates_file = cli.templates;
    }

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?cli.config,
        "Starting vigild"
    );

    let server = Server::new(config)
        .await
        .context("initializing pipeline")?
        .with_event_output(cli.emit_events)
        .with_exit_on_eof(cli.exit_on_eof);

    server.run().await.context("daemon run failed")
}
