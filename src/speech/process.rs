//! Speech engine backed by a command-line synthesizer.
//!
//! Every utterance runs as one child process. Speaking never blocks: the
//! worker learns about completion by polling the child with `try_wait`.

use super::engine::{SpeakOutcome, SpeechEngine, Voice};
use crate::config::{SpeechBackend, SpeechConfig};
use crate::error::{RelayError, Result};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

/// Supported synthesizer programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthProgram {
    EspeakNg,
    Espeak,
    Say,
    SpdSay,
}

impl SynthProgram {
    /// Executable looked up on `PATH`.
    #[must_use]
    pub fn binary_name(self) -> &'static str {
        match self {
            Self::EspeakNg => "espeak-ng",
            Self::Espeak => "espeak",
            Self::Say => "say",
            Self::SpdSay => "spd-say",
        }
    }

    fn candidates(backend: SpeechBackend) -> &'static [SynthProgram] {
        match backend {
            SpeechBackend::Auto => &[Self::EspeakNg, Self::Espeak, Self::Say, Self::SpdSay],
            SpeechBackend::Espeak => &[Self::EspeakNg, Self::Espeak],
            SpeechBackend::Say => &[Self::Say],
            SpeechBackend::SpdSay => &[Self::SpdSay],
            SpeechBackend::None => &[],
        }
    }

    /// Arguments that make the program speak `text` with the given settings.
    fn speak_args(self, text: &str, voice: Option<&str>, rate: f32, volume: f32) -> Vec<String> {
        let mut args = Vec::new();
        match self {
            Self::EspeakNg | Self::Espeak => {
                args.push("-s".to_owned());
                args.push(format!("{}", rate.round().max(1.0) as u32));
                args.push("-a".to_owned());
                args.push(format!("{}", (volume * 100.0).round() as u32));
                if let Some(voice) = voice {
                    args.push("-v".to_owned());
                    args.push(voice.to_owned());
                }
            }
            Self::Say => {
                args.push("-r".to_owned());
                args.push(format!("{}", rate.round().max(1.0) as u32));
                if let Some(voice) = voice {
                    args.push("-v".to_owned());
                    args.push(voice.to_owned());
                }
            }
            Self::SpdSay => {
                // Wait for completion so the child lives as long as the utterance.
                args.push("-w".to_owned());
                args.push("-r".to_owned());
                args.push(format!("{}", spd_rate(rate)));
                args.push("-i".to_owned());
                args.push(format!("{}", (volume * 200.0 - 100.0).round() as i32));
                if let Some(voice) = voice {
                    args.push("-y".to_owned());
                    args.push(voice.to_owned());
                }
            }
        }
        // A leading space keeps text that starts with '-' from being read as an option.
        args.push(format!(" {text}"));
        args
    }

    /// Arguments of a follow-up call that silences speech the killed child
    /// already handed to a daemon.
    fn cancel_args(self) -> Option<&'static [&'static str]> {
        match self {
            Self::SpdSay => Some(&["-C"][..]),
            Self::EspeakNg | Self::Espeak | Self::Say => None,
        }
    }

    fn list_voices_args(self) -> &'static [&'static str] {
        match self {
            Self::EspeakNg | Self::Espeak => &["--voices"],
            Self::Say => &["-v", "?"],
            Self::SpdSay => &["-L"],
        }
    }

    fn parse_voices(self, listing: &str) -> Vec<Voice> {
        match self {
            Self::EspeakNg | Self::Espeak => parse_espeak_voices(listing),
            Self::Say => parse_say_voices(listing),
            Self::SpdSay => parse_spd_voices(listing),
        }
    }
}

/// Map words per minute onto speech-dispatcher's `-100..=100` scale (200 wpm = 0).
fn spd_rate(rate: f32) -> i32 {
    ((rate - 200.0) / 2.0).round().clamp(-100.0, 100.0) as i32
}

/// Command-line synthesizer engine.
#[derive(Debug)]
pub struct ProcessEngine {
    program: SynthProgram,
    binary: PathBuf,
    child: Option<Child>,
    voices: Vec<Voice>,
    voice: Option<String>,
    rate: f32,
    volume: f32,
}

impl ProcessEngine {
    /// Locate a synthesizer for `config.backend` on `PATH` and load its voices.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Speech` when no candidate program is installed.
    pub fn detect(config: &SpeechConfig) -> Result<Self> {
        let candidates = SynthProgram::candidates(config.backend);
        let found = candidates
            .iter()
            .find_map(|program| which::which(program.binary_name()).ok().map(|p| (*program, p)));
        let Some((program, binary)) = found else {
            let names: Vec<_> = candidates.iter().map(|p| p.binary_name()).collect();
            return Err(RelayError::Speech(format!(
                "no speech synthesizer found (tried: {})",
                names.join(", ")
            )));
        };

        let mut engine = Self::with_binary(program, binary, config);
        engine.voices = engine.load_voices();
        if let Some(voice) = config.voice.as_deref()
            && !engine.set_voice(voice)
        {
            warn!(voice, "configured voice not available; using default");
        }
        info!(
            program = program.binary_name(),
            voices = engine.voices.len(),
            "speech synthesizer ready"
        );
        Ok(engine)
    }

    /// Build an engine for a known binary without probing its voice list.
    #[must_use]
    pub fn with_binary(program: SynthProgram, binary: impl Into<PathBuf>, config: &SpeechConfig) -> Self {
        Self {
            program,
            binary: binary.into(),
            child: None,
            voices: Vec::new(),
            voice: None,
            rate: config.rate,
            volume: config.volume.clamp(0.0, 1.0),
        }
    }

    /// Synthesizer in use.
    #[must_use]
    pub fn program(&self) -> SynthProgram {
        self.program
    }

    /// Resolved path of the synthesizer.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn load_voices(&self) -> Vec<Voice> {
        let output = Command::new(&self.binary)
            .args(self.program.list_voices_args())
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();
        match output {
            Ok(output) if output.status.success() => {
                self.program.parse_voices(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                warn!(status = %output.status, "voice listing failed");
                Vec::new()
            }
            Err(err) => {
                warn!(error = %err, "voice listing failed");
                Vec::new()
            }
        }
    }

    fn reap(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    debug!(%status, "synthesizer exited unsuccessfully");
                }
                self.child = None;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "lost track of synthesizer process");
                self.child = None;
            }
        }
    }
}

impl SpeechEngine for ProcessEngine {
    fn try_speak(&mut self, text: &str) -> Result<SpeakOutcome> {
        self.reap();
        if self.child.is_some() {
            return Ok(SpeakOutcome::Busy);
        }
        let args = self
            .program
            .speak_args(text, self.voice.as_deref(), self.rate, self.volume);
        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                RelayError::Speech(format!(
                    "failed to start {}: {e}",
                    self.program.binary_name()
                ))
            })?;
        self.child = Some(child);
        Ok(SpeakOutcome::Accepted)
    }

    fn is_idle(&mut self) -> bool {
        self.reap();
        self.child.is_none()
    }

    fn tick(&mut self) {
        self.reap();
    }

    fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let _ = child.kill();
        let _ = child.wait();

        if let Some(args) = self.program.cancel_args() {
            let status = Command::new(&self.binary)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if let Err(e) = status {
                warn!(program = self.program.binary_name(), error = %e, "failed to cancel speech");
            }
        }
    }

    fn voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    fn set_voice(&mut self, id: &str) -> bool {
        if self.voices.iter().any(|v| v.id == id) {
            self.voice = Some(id.to_owned());
            true
        } else {
            false
        }
    }

    fn current_voice(&self) -> Option<String> {
        self.voice.clone()
    }

    fn set_rate(&mut self, rate: f32) {
        self.rate = rate;
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }
}

/// Parse `espeak-ng --voices`:
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  af              --/M      Afrikaans          gmw/af
/// ```
fn parse_espeak_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let _priority = cols.next()?;
            let language = cols.next()?;
            let _gender = cols.next()?;
            let name = cols.next()?;
            Some(Voice::new(language, name.replace('_', " ")))
        })
        .collect()
}

/// Parse `say -v ?`:
///
/// ```text
/// Bad News            en_US    # The light you see at the end of the tunnel is ...
/// ```
fn parse_say_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .filter_map(|line| {
            let head = line.split('#').next()?.trim();
            let (name, _locale) = head.rsplit_once(char::is_whitespace)?;
            let name = name.trim();
            (!name.is_empty()).then(|| Voice::new(name, name))
        })
        .collect()
}

/// Parse `spd-say -L`:
///
/// ```text
///              NAME     LANGUAGE      VARIANT
///           english           en         none
/// ```
fn parse_spd_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let name = cols.next()?;
            let language = cols.next()?;
            (name != "NAME").then(|| Voice::new(name, format!("{name} ({language})")))
        })
        .collect()
}
