//! Speech sink: a single worker thread that owns the synthesizer.
//!
//! Producers talk to the worker through a [`SpeechHandle`]. Payloads go onto
//! the job queue; directives go onto the command bus, which the worker always
//! drains first. `SetVoice` and `GetVoices` carry a reply slot the caller
//! waits on.

pub mod engine;
pub mod process;
mod worker;

pub use engine::{NullEngine, SpeakOutcome, SpeechEngine, Voice};
pub use process::{ProcessEngine, SynthProgram};
pub use worker::SpeechService;

use crate::config::{SpeechBackend, SpeechConfig};
use crate::error::{RelayError, Result};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

/// Entry of the speech queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechJob {
    /// Text to speak.
    Speak(String),
    /// Marks how far a `Clear` with the same id discards.
    ClearBoundary(u64),
}

/// Directive on the worker's command bus.
#[derive(Debug)]
pub enum SpeechCommand {
    /// Stop speaking and discard queued jobs up to the matching boundary marker.
    Clear { boundary: u64 },
    /// Release the engine and end the worker.
    Exit,
    /// Select a voice; the reply carries the voice actually in effect.
    SetVoice {
        id: String,
        reply: oneshot::Sender<String>,
    },
    SetVolume(f32),
    SetRate(f32),
    GetVoices {
        reply: oneshot::Sender<Vec<Voice>>,
    },
}

/// Cloneable producer side of the speech sink.
#[derive(Debug, Clone)]
pub struct SpeechHandle {
    jobs: Sender<SpeechJob>,
    commands: Sender<SpeechCommand>,
    next_boundary: Arc<AtomicU64>,
}

/// Create an unconnected handle plus the receivers a worker would own.
#[must_use]
pub fn speech_channel() -> (SpeechHandle, Receiver<SpeechJob>, Receiver<SpeechCommand>) {
    let (job_tx, job_rx) = crossbeam_channel::unbounded();
    let (command_tx, command_rx) = crossbeam_channel::unbounded();
    let handle = SpeechHandle {
        jobs: job_tx,
        commands: command_tx,
        next_boundary: Arc::new(AtomicU64::new(0)),
    };
    (handle, job_rx, command_rx)
}

impl SpeechHandle {
    /// Queue text for speaking. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Channel` once the worker has exited.
    pub fn speak(&self, text: impl Into<String>) -> Result<()> {
        self.jobs
            .send(SpeechJob::Speak(text.into()))
            .map_err(|_| RelayError::Channel("speech worker has exited".to_owned()))
    }

    /// Stop the current utterance and drop everything queued so far.
    ///
    /// Returns the boundary id. Jobs queued after this call survive.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Channel` once the worker has exited.
    pub fn clear(&self) -> Result<u64> {
        let boundary = self.next_boundary.fetch_add(1, Ordering::SeqCst) + 1;
        // Command first: a worker that dequeues the marker is then
        // guaranteed to find the command on the bus.
        self.command(SpeechCommand::Clear { boundary })?;
        self.jobs
            .send(SpeechJob::ClearBoundary(boundary))
            .map_err(|_| RelayError::Channel("speech worker has exited".to_owned()))?;
        Ok(boundary)
    }

    /// Set the volume (`0.0..=1.0`) ahead of any speech queued afterwards.
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        self.command(SpeechCommand::SetVolume(volume))
    }

    /// Set the speaking rate in words per minute.
    pub fn set_rate(&self, rate: f32) -> Result<()> {
        self.command(SpeechCommand::SetRate(rate))
    }

    /// Ask the worker to exit. Sending to a worker that is already gone is not an error.
    pub fn exit(&self) {
        let _ = self.commands.send(SpeechCommand::Exit);
    }

    /// Select a voice and block until the worker reports the effective voice.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`SpeechHandle::set_voice_async`] there.
    pub fn set_voice(&self, id: impl Into<String>) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.command(SpeechCommand::SetVoice {
            id: id.into(),
            reply,
        })?;
        rx.blocking_recv().map_err(reply_dropped)
    }

    /// Async form of [`SpeechHandle::set_voice`].
    pub async fn set_voice_async(&self, id: impl Into<String>) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.command(SpeechCommand::SetVoice {
            id: id.into(),
            reply,
        })?;
        rx.await.map_err(reply_dropped)
    }

    /// Fetch the voice catalog, blocking until the worker answers.
    pub fn voices(&self) -> Result<Vec<Voice>> {
        let (reply, rx) = oneshot::channel();
        self.command(SpeechCommand::GetVoices { reply })?;
        rx.blocking_recv().map_err(reply_dropped)
    }

    /// Async form of [`SpeechHandle::voices`].
    pub async fn voices_async(&self) -> Result<Vec<Voice>> {
        let (reply, rx) = oneshot::channel();
        self.command(SpeechCommand::GetVoices { reply })?;
        rx.await.map_err(reply_dropped)
    }

    fn command(&self, command: SpeechCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| RelayError::Channel("speech worker has exited".to_owned()))
    }
}

fn reply_dropped(err: oneshot::error::RecvError) -> RelayError {
    RelayError::Channel(format!("speech reply dropped: {err}"))
}

/// Build the engine described by `config`. Runs on the worker thread.
///
/// # Errors
///
/// Returns `RelayError::Speech` when the configured synthesizer is missing.
pub fn engine_from_config(config: &SpeechConfig) -> Result<Box<dyn SpeechEngine>> {
    match config.backend {
        SpeechBackend::None => Ok(Box::new(NullEngine)),
        _ => Ok(Box::new(ProcessEngine::detect(config)?)),
    }
}
