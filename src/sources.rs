//! Watched log sources and their per-sink flags.

use crate::error::{RelayError, Result};
use crate::tail::Tailer;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Externally supplied description of one watched log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedSourceConfig {
    /// File path; the sole identity key of a source.
    pub path: String,
    /// Whether the file is tailed at all.
    #[serde(default = "default_true")]
    pub tailing_enabled: bool,
    /// Whether chat events are spoken.
    #[serde(default = "default_true")]
    pub speech_enabled: bool,
    /// Whether chat events are forwarded.
    #[serde(default)]
    pub forward_enabled: bool,
}

impl WatchedSourceConfig {
    /// Tailing and speech on, forwarding off.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            tailing_enabled: true,
            speech_enabled: true,
            forward_enabled: false,
        }
    }

    /// Speech and forward flags as one value.
    #[must_use]
    pub fn sink_flags(&self) -> SinkFlags {
        SinkFlags {
            speech: self.speech_enabled,
            forward: self.forward_enabled,
        }
    }
}

/// Which sinks receive events from a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkFlags {
    pub speech: bool,
    pub forward: bool,
}

/// Change requested by whatever layer owns the list of watched files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceUpdate {
    /// Start watching a new path.
    Add(WatchedSourceConfig),
    /// Stop watching a path and release its handle.
    Remove(String),
    /// Replace the flags of an existing path.
    SetFlags(WatchedSourceConfig),
    /// Give an existing source a new path.
    SetPath { from: String, to: String },
}

/// What the scheduler should do after applying an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Nothing beyond the update itself.
    Applied,
    /// Tailing was switched off (or the source removed); pending sink work is stale.
    TailingStopped,
}

/// A watched file: its configuration plus the runtime-only tail state.
#[derive(Debug)]
pub struct WatchedSource {
    config: WatchedSourceConfig,
    tailer: Tailer,
}

impl WatchedSource {
    /// Source with a closed tailer; the first poll opens at end-of-file.
    #[must_use]
    pub fn new(config: WatchedSourceConfig) -> Self {
        let tailer = Tailer::new(&config.path);
        Self { config, tailer }
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &WatchedSourceConfig {
        &self.config
    }

    /// Tail state of this source.
    #[must_use]
    pub fn tailer(&self) -> &Tailer {
        &self.tailer
    }

    /// Poll the file once if tailing is enabled.
    pub fn poll(&mut self) -> Option<String> {
        if !self.config.tailing_enabled {
            return None;
        }
        self.tailer.poll()
    }

    /// Release the file handle; the next enabled poll reopens at end-of-file.
    pub fn close(&mut self) {
        self.tailer.close();
    }

    fn set_flags(&mut self, config: WatchedSourceConfig) -> UpdateOutcome {
        let stopped = self.config.tailing_enabled && !config.tailing_enabled;
        self.config.tailing_enabled = config.tailing_enabled;
        self.config.speech_enabled = config.speech_enabled;
        self.config.forward_enabled = config.forward_enabled;
        if stopped {
            self.tailer.close();
            UpdateOutcome::TailingStopped
        } else {
            UpdateOutcome::Applied
        }
    }

    fn set_path(&mut self, path: String) {
        self.tailer.set_path(&path);
        self.config.path = path;
    }
}

/// Ordered set of watched sources keyed by path.
#[derive(Debug, Default)]
pub struct SourceSet {
    sources: Vec<WatchedSource>,
}

impl SourceSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from configuration, rejecting duplicate paths.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Config` if a path appears twice.
    pub fn from_configs(configs: impl IntoIterator<Item = WatchedSourceConfig>) -> Result<Self> {
        let mut set = Self::new();
        for config in configs {
            set.add(config)?;
        }
        Ok(set)
    }

    /// Number of watched sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether no source is watched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Source watching `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&WatchedSource> {
        self.sources.iter().find(|s| s.config.path == path)
    }

    /// Sources in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &WatchedSource> {
        self.sources.iter()
    }

    /// Mutable sources in insertion order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut WatchedSource> {
        self.sources.iter_mut()
    }

    /// Add a source.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Config` if the path is empty or already watched.
    pub fn add(&mut self, config: WatchedSourceConfig) -> Result<()> {
        if config.path.trim().is_empty() {
            return Err(RelayError::Config("source path is empty".to_owned()));
        }
        if self.get(&config.path).is_some() {
            return Err(RelayError::Config(format!(
                "source already watched: {}",
                config.path
            )));
        }
        self.sources.push(WatchedSource::new(config));
        Ok(())
    }

    /// Remove a source, closing its handle. Returns whether it existed.
    pub fn remove(&mut self, path: &str) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.config.path != path);
        self.sources.len() != before
    }

    /// Apply an externally requested change.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Config` for unknown or duplicate paths.
    pub fn apply(&mut self, update: SourceUpdate) -> Result<UpdateOutcome> {
        match update {
            SourceUpdate::Add(config) => {
                self.add(config)?;
                Ok(UpdateOutcome::Applied)
            }
            SourceUpdate::Remove(path) => {
                let was_tailing = self
                    .get(&path)
                    .map(|s| s.config.tailing_enabled)
                    .ok_or_else(|| unknown_source(&path))?;
                self.remove(&path);
                Ok(if was_tailing {
                    UpdateOutcome::TailingStopped
                } else {
                    UpdateOutcome::Applied
                })
            }
            SourceUpdate::SetFlags(config) => {
                let source = self
                    .sources
                    .iter_mut()
                    .find(|s| s.config.path == config.path)
                    .ok_or_else(|| unknown_source(&config.path))?;
                Ok(source.set_flags(config))
            }
            SourceUpdate::SetPath { from, to } => {
                if from == to {
                    return Ok(UpdateOutcome::Applied);
                }
                if self.get(&to).is_some() {
                    return Err(RelayError::Config(format!("source already watched: {to}")));
                }
                let source = self
                    .sources
                    .iter_mut()
                    .find(|s| s.config.path == from)
                    .ok_or_else(|| unknown_source(&from))?;
                source.set_path(to);
                Ok(UpdateOutcome::Applied)
            }
        }
    }
}

fn unknown_source(path: &str) -> RelayError {
    RelayError::Config(format!("unknown source: {path}"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::tail::TailState;

    #[test]
    fn duplicate_paths_are_rejected() {
        let mut set = SourceSet::new();
        set.add(WatchedSourceConfig::new("a.log")).unwrap();
        assert!(set.add(WatchedSourceConfig::new("a.log")).is_err());
        assert!(set.add(WatchedSourceConfig::new("  ")).is_err());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn turning_tailing_off_closes_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.log");
        std::fs::write(&path, "").unwrap();
        let path = path.to_string_lossy().into_owned();

        let mut set = SourceSet::from_configs([WatchedSourceConfig::new(path.clone())]).unwrap();
        for source in set.iter_mut() {
            source.poll();
        }
        assert_eq!(
            set.get(&path).unwrap().tailer().state(),
            TailState::OpenAtEnd
        );

        let mut off = WatchedSourceConfig::new(path.clone());
        off.tailing_enabled = false;
        let outcome = set.apply(SourceUpdate::SetFlags(off)).unwrap();
        assert_eq!(outcome, UpdateOutcome::TailingStopped);
        assert_eq!(set.get(&path).unwrap().tailer().state(), TailState::Closed);
    }

    #[test]
    fn flag_changes_without_tailing_change_are_plain() {
        let mut set = SourceSet::from_configs([WatchedSourceConfig::new("a.log")]).unwrap();
        let mut update = WatchedSourceConfig::new("a.log");
        update.speech_enabled = false;
        update.forward_enabled = true;
        assert_eq!(
            set.apply(SourceUpdate::SetFlags(update)).unwrap(),
            UpdateOutcome::Applied
        );
        let flags = set.get("a.log").unwrap().config().sink_flags();
        assert_eq!(
            flags,
            SinkFlags {
                speech: false,
                forward: true
            }
        );
    }

    #[test]
    fn set_path_keeps_identity_unique() {
        let mut set = SourceSet::from_configs([
            WatchedSourceConfig::new("a.log"),
            WatchedSourceConfig::new("b.log"),
        ])
        .unwrap();
        let clash = SourceUpdate::SetPath {
            from: "a.log".to_owned(),
            to: "b.log".to_owned(),
        };
        assert!(set.apply(clash).is_err());

        let rename = SourceUpdate::SetPath {
            from: "a.log".to_owned(),
            to: "c.log".to_owned(),
        };
        set.apply(rename).unwrap();
        assert!(set.get("a.log").is_none());
        assert_eq!(
            set.get("c.log").unwrap().tailer().path(),
            std::path::Path::new("c.log")
        );
    }

    #[test]
    fn remove_reports_unknown_paths() {
        let mut set = SourceSet::from_configs([WatchedSourceConfig::new("a.log")]).unwrap();
        assert!(set.apply(SourceUpdate::Remove("missing.log".to_owned())).is_err());
        assert_eq!(
            set.apply(SourceUpdate::Remove("a.log".to_owned())).unwrap(),
            UpdateOutcome::TailingStopped
        );
        assert!(set.is_empty());
    }
}
