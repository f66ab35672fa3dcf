//! CLI binary for chatvoice.

use anyhow::Context;
use chatvoice::chat::clean_log_file;
use chatvoice::forward::rate_limit::RateLimiter;
use chatvoice::forward::{
    DiscordForwarder, ForwardQueue, ForwardSink, ForwardTarget, run_forward_consumer,
};
use chatvoice::speech::engine_from_config;
use chatvoice::{Pipeline, RelayConfig, Router, Sinks, SourceSet, SpeechService};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// chatvoice: read game chat aloud and relay it to Discord.
#[derive(Parser)]
#[command(name = "chatvoice", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Tail the configured logs and relay chat until Ctrl+C.
    Run,

    /// List the voices of the configured synthesizer.
    Voices,

    /// Write the chat messages of each log to `<name>-cleaned.txt`.
    Clean {
        /// Log files to clean.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Write a default configuration file if none exists.
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatvoice=info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(RelayConfig::default_config_path);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_relay(load_config(&config_path)?, config_path).await,
        Command::Voices => list_voices(load_config(&config_path)?).await,
        Command::Clean { files } => clean_logs(&files),
        Command::Init => init_config(&config_path),
    }
}

fn load_config(path: &Path) -> anyhow::Result<RelayConfig> {
    if path.exists() {
        RelayConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))
    } else {
        info!(path = %path.display(), "no config file; using defaults");
        Ok(RelayConfig::default())
    }
}

fn start_speech(config: &RelayConfig) -> anyhow::Result<SpeechService> {
    let speech_config = config.speech.clone();
    let service = SpeechService::start(
        move || engine_from_config(&speech_config),
        Duration::from_millis(config.speech.tick_interval_ms),
    )?;
    if let Some(e) = service.init_error() {
        warn!(error = e, "continuing without speech");
    }
    Ok(service)
}

async fn run_relay(config: RelayConfig, config_path: PathBuf) -> anyhow::Result<()> {
    println!("chatvoice v{}", env!("CARGO_PKG_VERSION"));
    if config.sources.is_empty() {
        println!(
            "No sources configured. Add [[sources]] entries to {}",
            config_path.display()
        );
    }

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    let speech = start_speech(&config)?;
    let queue = ForwardQueue::new();
    let target = ForwardTarget::new(config.forward.channel_id.clone());

    if config.forward.enabled {
        let forwarder = Arc::new(DiscordForwarder::new(&config.forward));
        let sink: Arc<dyn ForwardSink> = Arc::clone(&forwarder) as Arc<dyn ForwardSink>;
        tokio::spawn(run_forward_consumer(
            queue.clone(),
            target.clone(),
            sink,
            RateLimiter::new(config.forward.max_messages_per_minute),
            cancel.child_token(),
        ));

        let commands_target = target.clone();
        let commands_cancel = cancel.child_token();
        tokio::spawn(async move {
            forwarder.run_commands(commands_target, commands_cancel).await;
        });

        tokio::spawn(persist_target_changes(
            target.clone(),
            config.clone(),
            config_path.clone(),
            cancel.child_token(),
        ));
    }

    let sources = SourceSet::from_configs(config.sources.clone())?;
    let sinks = if config.forward.enabled {
        Sinks::new(speech.handle(), queue, target)
    } else {
        Sinks::without_forwarding(speech.handle())
    };
    let pipeline = Pipeline::new(sources, Router::new(sinks), config.max_lines_per_poll);

    println!("\nRelaying chat. Press Ctrl+C to stop.\n");
    pipeline
        .run(Duration::from_millis(config.poll_interval_ms), cancel.clone())
        .await;

    cancel.cancel();
    tokio::task::spawn_blocking(move || speech.shutdown())
        .await
        .context("speech worker shutdown failed")?;
    Ok(())
}

/// Save the forward target to the config file whenever it moves.
async fn persist_target_changes(
    target: ForwardTarget,
    mut config: RelayConfig,
    path: PathBuf,
    cancel: CancellationToken,
) {
    let mut changes = target.subscribe();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                config.forward.channel_id = changes.borrow_and_update().clone();
                match config.save_to_file(&path) {
                    Ok(()) => info!(path = %path.display(), "saved forward target"),
                    Err(e) => error!(error = %e, "failed to save forward target"),
                }
            }
        }
    }
}

async fn list_voices(config: RelayConfig) -> anyhow::Result<()> {
    let speech = start_speech(&config)?;
    let voices = speech.handle().voices_async().await?;
    if voices.is_empty() {
        println!("No voices available.");
    }
    for voice in &voices {
        println!("  {:<24} {}", voice.id, voice.name);
    }
    tokio::task::spawn_blocking(move || speech.shutdown()).await?;
    Ok(())
}

fn clean_logs(files: &[PathBuf]) -> anyhow::Result<()> {
    let mut failed = 0;
    for file in files {
        match clean_log_file(file) {
            Ok((output, count)) => println!("{}: {count} messages", output.display()),
            Err(e) => {
                eprintln!("{}: {e}", file.display());
                failed += 1;
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} files could not be cleaned", files.len());
    }
    Ok(())
}

fn init_config(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        println!("{} already exists.", path.display());
        return Ok(());
    }
    RelayConfig::default().save_to_file(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
