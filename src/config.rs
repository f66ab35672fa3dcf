//! Configuration types for the chat relay.

use crate::error::{RelayError, Result};
use crate::sources::WatchedSourceConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default TCP port of the speech control service.
pub const DEFAULT_CONTROL_PORT: u16 = 53827;

/// Top-level configuration for the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Period of the source polling timer in milliseconds.
    pub poll_interval_ms: u64,
    /// Upper bound on lines read from one source during a single tick.
    pub max_lines_per_poll: usize,
    /// Watched log files and their sink flags.
    pub sources: Vec<WatchedSourceConfig>,
    /// Speech consumer settings.
    pub speech: SpeechConfig,
    /// Forwarding service settings.
    pub forward: ForwardConfig,
    /// Control protocol server settings.
    pub control: ControlConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            max_lines_per_poll: 64,
            sources: Vec::new(),
            speech: SpeechConfig::default(),
            forward: ForwardConfig::default(),
            control: ControlConfig::default(),
        }
    }
}

/// Which speech engine backs the speech consumer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpeechBackend {
    /// Pick the first command-line synthesizer found on `PATH`.
    #[default]
    Auto,
    /// `espeak-ng` (or legacy `espeak`).
    Espeak,
    /// macOS `say`.
    Say,
    /// speech-dispatcher's `spd-say`.
    SpdSay,
    /// Discard everything.
    None,
}

/// Speech consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Engine backend.
    pub backend: SpeechBackend,
    /// Initial voice id (None = engine default).
    pub voice: Option<String>,
    /// Speaking rate in words per minute.
    pub rate: f32,
    /// Volume in `[0.0, 1.0]`.
    pub volume: f32,
    /// How long the worker waits for new work before pumping the engine again.
    pub tick_interval_ms: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            backend: SpeechBackend::default(),
            voice: None,
            rate: 200.0,
            volume: 1.0,
            tick_interval_ms: 10,
        }
    }
}

/// Forwarding (Discord) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Whether the forwarding service is started at all.
    pub enabled: bool,
    /// Bot token used for the REST API and gateway.
    pub bot_token: String,
    /// Last known target channel; moved at runtime by the `here` command.
    pub channel_id: Option<String>,
    /// Outbound rate limit.
    pub max_messages_per_minute: u32,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            channel_id: None,
            max_messages_per_minute: 30,
        }
    }
}

/// Control protocol server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Interface to bind.
    pub bind: String,
    /// TCP port.
    pub port: u16,
    /// Reply to unknown commands instead of ignoring them.
    pub strict: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_owned(),
            port: DEFAULT_CONTROL_PORT,
            strict: false,
        }
    }
}

impl ControlConfig {
    /// `bind:port` string suitable for `TcpListener::bind`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| RelayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| RelayError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/chatvoice/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("chatvoice")
            .join("config.toml")
    }

    /// Check cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Config` for duplicate source paths, an empty
    /// source path, a poll interval outside 10..=1000 ms, a zero line budget,
    /// a speech tick outside 1..=1000 ms, forwarding without a bot token,
    /// or an out-of-range volume.
    pub fn validate(&self) -> Result<()> {
        if !(10..=1000).contains(&self.poll_interval_ms) {
            return Err(RelayError::Config(format!(
                "poll_interval_ms must be within 10..=1000, got {}",
                self.poll_interval_ms
            )));
        }
        if self.max_lines_per_poll == 0 {
            return Err(RelayError::Config(
                "max_lines_per_poll must be greater than zero".to_owned(),
            ));
        }
        if !(1..=1000).contains(&self.speech.tick_interval_ms) {
            return Err(RelayError::Config(format!(
                "speech.tick_interval_ms must be within 1..=1000, got {}",
                self.speech.tick_interval_ms
            )));
        }
        if self.forward.enabled && self.forward.bot_token.trim().is_empty() {
            return Err(RelayError::Config(
                "forward.enabled requires forward.bot_token".to_owned(),
            ));
        }
        if !(0.0..=1.0).contains(&self.speech.volume) {
            return Err(RelayError::Config(format!(
                "speech.volume must be within 0.0..=1.0, got {}",
                self.speech.volume
            )));
        }
        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.path.trim().is_empty() {
                return Err(RelayError::Config("source path is empty".to_owned()));
            }
            if !seen.insert(source.path.as_str()) {
                return Err(RelayError::Config(format!(
                    "duplicate source path: {}",
                    source.path
                )));
            }
        }
        Ok(())
    }
}
