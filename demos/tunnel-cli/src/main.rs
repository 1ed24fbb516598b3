//! Launcher for queue-tunnel endpoints.
//!
//! Run with: cargo run -p tunnel-cli -- <client|server|loopback>
//!
//! Configuration comes from `QUEUE_TUNNEL_*` environment variables and an
//! optional JSON file named by `QUEUE_TUNNEL_CONFIG`. `client` and `server`
//! talk to the store at `QUEUE_TUNNEL_STORE_URL`; `loopback` runs both
//! endpoints in this process over an in-memory queue.

use std::{
    fs::OpenOptions,
    process::ExitCode,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use queue_tunnel_core::TunnelConfig;
use queue_tunnel_session::{ShellSession, Shutdown, TerminalSession};
use queue_tunnel_transport::{MemoryQueue, RestQueue};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log destination; stderr when unset.
const LOG_FILE_ENV: &str = "QUEUE_TUNNEL_LOG_FILE";

/// Terminal tunnel over a remote ordered queue.
#[derive(Debug, Parser)]
#[command(name = "queue-tunnel", version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Mode {
    /// Attach this terminal to a remote shell session.
    Client,
    /// Serve a local shell to a remote client.
    Server,
    /// Run both endpoints in this process over an in-memory queue.
    Loopback,
}

impl Mode {
    /// Log filter used when `RUST_LOG` is unset.
    const fn default_filter(self) -> &'static str {
        match self {
            Self::Server => "info",
            Self::Client | Self::Loopback => "warn",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let Cli { mode } = Cli::parse();

    if let Err(e) = init_tracing(mode) {
        eprintln!("queue-tunnel: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(mode).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("queue-tunnel: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(mode: Mode) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| mode.default_filter().into());

    let (stderr_layer, file_layer) = match std::env::var_os(LOG_FILE_ENV) {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.to_string_lossy()))?;
            let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
            (None, Some(layer))
        }
        None => (Some(fmt::layer().with_writer(std::io::stderr)), None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

async fn run(mode: Mode) -> Result<()> {
    let config = TunnelConfig::load().context("Failed to load configuration")?;
    let shutdown = Shutdown::new();
    shutdown
        .trigger_on_signals()
        .context("Failed to install signal handlers")?;

    match mode {
        Mode::Client => {
            let transport = Arc::new(rest_queue(&config)?);
            let report = TerminalSession::new(transport, config).run(&shutdown).await?;
            tracing::info!(?report, "Client finished");
        }
        Mode::Server => {
            let transport = Arc::new(rest_queue(&config)?);
            let outcome = ShellSession::new(transport, config).run(&shutdown).await?;
            tracing::info!(exit_code = ?outcome.exit_code, "Server finished");
        }
        Mode::Loopback => loopback(config, &shutdown).await?,
    }
    Ok(())
}

fn rest_queue(config: &TunnelConfig) -> Result<RestQueue> {
    let url = config
        .store_url
        .as_deref()
        .context("QUEUE_TUNNEL_STORE_URL is required for client and server modes")?;
    Ok(RestQueue::new(
        url,
        config.auth_token.clone(),
        config.request_timeout(),
    )?)
}

/// Both endpoints over one in-memory queue. Either side ending stops the
/// other.
async fn loopback(mut config: TunnelConfig, shutdown: &Shutdown) -> Result<()> {
    if config.session.is_none() {
        config.session = Some("loopback".to_string());
    }
    let queue = Arc::new(MemoryQueue::new());

    let server = ShellSession::new(Arc::clone(&queue), config.clone());
    let client = TerminalSession::new(queue, config);

    let server = async {
        let _stop = shutdown.trigger_on_drop();
        server.run(shutdown).await
    };
    let client = async {
        let _stop = shutdown.trigger_on_drop();
        client.run(shutdown).await
    };
    let (server, client) = tokio::join!(server, client);

    let outcome = server.context("Shell endpoint failed")?;
    client.context("Terminal endpoint failed")?;
    tracing::info!(exit_code = ?outcome.exit_code, "Loopback finished");
    Ok(())
}
