//! Standalone speech service driven over the control protocol.
//!
//! Listens for one client at a time on a TCP port, speaks `MSG` lines and
//! answers configuration queries. The service exits on `EXT`, when the
//! client disconnects, or on Ctrl+C.
//!
//! All tracing output goes to stderr.

use anyhow::Context;
use chatvoice::config::{DEFAULT_CONTROL_PORT, RelayConfig};
use chatvoice::control::ControlServer;
use chatvoice::speech::engine_from_config;
use chatvoice::SpeechService;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Speech synthesis service for chatvoice clients.
#[derive(Parser)]
#[command(name = "chatvoice-speechd", version, about)]
struct Args {
    /// TCP port to listen on.
    #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Reply to unknown commands instead of ignoring them.
    #[arg(long)]
    strict: bool,

    /// TOML configuration file for synthesizer settings.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chatvoice=info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => RelayConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RelayConfig::default(),
    };

    tracing::info!("chatvoice-speechd starting");

    let speech_config = config.speech.clone();
    let service = SpeechService::start(
        move || engine_from_config(&speech_config),
        Duration::from_millis(config.speech.tick_interval_ms),
    )?;
    if let Some(e) = service.init_error() {
        tracing::warn!(error = e, "continuing without speech");
    }

    let addr = format!("{}:{}", args.bind, args.port);
    let server = ControlServer::bind(&addr, service.handle(), args.strict)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    server.run(cancel).await.map_err(|e| {
        tracing::error!(error = %e, "chatvoice-speechd exited with error");
        anyhow::anyhow!("chatvoice-speechd failed: {e}")
    })?;

    tokio::task::spawn_blocking(move || service.shutdown()).await?;
    tracing::info!("chatvoice-speechd shut down cleanly");
    Ok(())
}
