//! Capability interface over speech synthesizers.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// One entry of an engine's voice catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    /// Identifier accepted by [`SpeechEngine::set_voice`].
    pub id: String,
    /// Human-readable name.
    pub name: String,
}

impl Voice {
    /// Voice with an engine id and a display name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Result of a non-blocking speak request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// The engine started (or queued) the utterance.
    Accepted,
    /// The engine is still busy; retry once it reports idle.
    Busy,
}

/// A synthesizer driven by the speech worker.
///
/// Engines are owned by a single thread and never shared, so implementations
/// need not be `Send`. None of the methods may block for the duration of an
/// utterance: asynchronous engines make progress in [`SpeechEngine::tick`],
/// process- or callback-driven ones may treat it as a no-op.
pub trait SpeechEngine {
    /// Start speaking `text` without waiting for it to finish.
    fn try_speak(&mut self, text: &str) -> Result<SpeakOutcome>;

    /// Whether no utterance is in progress.
    fn is_idle(&mut self) -> bool;

    /// Advance any internal event loop by one step.
    fn tick(&mut self);

    /// Abort the utterance in progress, if any.
    fn stop(&mut self);

    /// Available voices.
    fn voices(&self) -> Vec<Voice>;

    /// Select a voice. Unknown ids leave the current voice unchanged.
    fn set_voice(&mut self, id: &str) -> bool;

    /// Id of the voice in effect, if the engine has one.
    fn current_voice(&self) -> Option<String>;

    /// Speaking rate in words per minute.
    fn set_rate(&mut self, rate: f32);

    /// Volume in `[0.0, 1.0]`.
    fn set_volume(&mut self, volume: f32);

    /// Release engine resources. Called once when the worker exits.
    fn shutdown(&mut self) {
        self.stop();
    }
}

/// Engine that accepts everything and says nothing.
///
/// Stands in when no synthesizer is available so the rest of the relay keeps
/// running with speech as a no-op sink.
#[derive(Debug, Default)]
pub struct NullEngine;

impl SpeechEngine for NullEngine {
    fn try_speak(&mut self, _text: &str) -> Result<SpeakOutcome> {
        Ok(SpeakOutcome::Accepted)
    }

    fn is_idle(&mut self) -> bool {
        true
    }

    fn tick(&mut self) {}

    fn stop(&mut self) {}

    fn voices(&self) -> Vec<Voice> {
        Vec::new()
    }

    fn set_voice(&mut self, _id: &str) -> bool {
        false
    }

    fn current_voice(&self) -> Option<String> {
        None
    }

    fn set_rate(&mut self, _rate: f32) {}

    fn set_volume(&mut self, _volume: f32) {}
}
