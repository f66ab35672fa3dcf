//! The speech consumer loop.

use super::engine::{NullEngine, SpeakOutcome, SpeechEngine};
use super::{SpeechCommand, SpeechHandle, SpeechJob, speech_channel};
use crate::error::{RelayError, Result};
use crossbeam_channel::{Receiver, Select, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Upper bound on the gap between a `Clear` command and its marker.
const MARKER_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Exit,
}

/// Owns the engine; runs on exactly one thread.
pub(crate) struct Worker {
    engine: Box<dyn SpeechEngine>,
    jobs: Receiver<SpeechJob>,
    commands: Receiver<SpeechCommand>,
    /// Text the engine refused as busy; retried before the next dequeue.
    pending: Option<String>,
    /// Highest boundary marker already taken off the job queue.
    boundary_seen: u64,
    commands_closed: bool,
    tick_interval: Duration,
}

impl Worker {
    pub(crate) fn new(
        engine: Box<dyn SpeechEngine>,
        jobs: Receiver<SpeechJob>,
        commands: Receiver<SpeechCommand>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            engine,
            jobs,
            commands,
            pending: None,
            boundary_seen: 0,
            commands_closed: false,
            tick_interval,
        }
    }

    pub(crate) fn run(mut self) {
        info!("speech worker started");
        while self.step() == Step::Continue {}
        self.engine.shutdown();
        info!("speech worker stopped");
    }

    /// One loop iteration: a command, else a job, else an engine tick.
    fn step(&mut self) -> Step {
        if let Some(command) = self.try_command() {
            return self.apply(command);
        }
        if self.engine.is_idle() {
            return self.start_next();
        }
        self.engine.tick();
        self.wait(false);
        Step::Continue
    }

    fn try_command(&mut self) -> Option<SpeechCommand> {
        if self.commands_closed {
            return None;
        }
        match self.commands.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                debug!("all speech handles dropped; finishing queued jobs");
                self.commands_closed = true;
                None
            }
        }
    }

    /// Hand the next job to the idle engine. A command sent before the job
    /// was queued may still be in flight once the job is dequeued, so the
    /// bus is checked again and such a command runs first.
    fn start_next(&mut self) -> Step {
        if self.pending.is_none() {
            self.pending = self.next_text();
            if self.pending.is_some()
                && let Some(command) = self.try_command()
            {
                return self.apply(command);
            }
        }
        match self.pending.take() {
            Some(text) => {
                self.speak(text);
                Step::Continue
            }
            None if self.commands_closed => Step::Exit,
            None => {
                self.wait(true);
                Step::Continue
            }
        }
    }

    fn speak(&mut self, text: String) {
        match self.engine.try_speak(&text) {
            Ok(SpeakOutcome::Accepted) => debug!(chars = text.len(), "speaking"),
            Ok(SpeakOutcome::Busy) => {
                self.pending = Some(text);
                self.wait(false);
            }
            Err(e) => error!(error = %e, "speech engine rejected utterance"),
        }
    }

    /// Next text job, consuming any boundary markers in front of it.
    fn next_text(&mut self) -> Option<String> {
        loop {
            match self.jobs.try_recv().ok()? {
                SpeechJob::Speak(text) => return Some(text),
                SpeechJob::ClearBoundary(id) => self.boundary_seen = self.boundary_seen.max(id),
            }
        }
    }

    /// Sleep until something arrives or one tick passes. The job queue only
    /// wakes the worker when it could start speaking.
    fn wait(&self, idle: bool) {
        if self.commands_closed {
            std::thread::sleep(self.tick_interval);
            return;
        }
        let mut select = Select::new();
        select.recv(&self.commands);
        if idle {
            select.recv(&self.jobs);
        }
        let _ = select.ready_timeout(self.tick_interval);
    }

    fn apply(&mut self, command: SpeechCommand) -> Step {
        match command {
            SpeechCommand::Clear { boundary } => self.clear(boundary),
            SpeechCommand::Exit => {
                info!("speech worker exiting");
                self.engine.stop();
                return Step::Exit;
            }
            SpeechCommand::SetVoice { id, reply } => {
                if !self.engine.set_voice(&id) {
                    warn!(voice = %id, "unknown voice; keeping current");
                }
                let effective = self
                    .engine
                    .current_voice()
                    .unwrap_or_else(|| "default".to_owned());
                let _ = reply.send(effective);
            }
            SpeechCommand::SetVolume(volume) => {
                debug!(volume, "volume set");
                self.engine.set_volume(volume);
            }
            SpeechCommand::SetRate(rate) => {
                debug!(rate, "rate set");
                self.engine.set_rate(rate);
            }
            SpeechCommand::GetVoices { reply } => {
                let _ = reply.send(self.engine.voices());
            }
        }
        Step::Continue
    }

    /// Stop the utterance and drop queued jobs up to the `boundary` marker.
    ///
    /// The handle sends the command before the marker, so the marker may
    /// still be on its way. A marker already taken off the queue means
    /// everything before it has been dequeued, and a retried `pending` text
    /// was queued after it.
    fn clear(&mut self, boundary: u64) {
        self.engine.stop();
        let mut discarded = 0;
        if boundary > self.boundary_seen {
            discarded += usize::from(self.pending.take().is_some());
            loop {
                match self.jobs.recv_timeout(MARKER_WAIT) {
                    Ok(SpeechJob::Speak(_)) => discarded += 1,
                    Ok(SpeechJob::ClearBoundary(id)) => {
                        self.boundary_seen = self.boundary_seen.max(id);
                        if id >= boundary {
                            break;
                        }
                    }
                    Err(_) => {
                        warn!(boundary, "clear marker never arrived");
                        break;
                    }
                }
            }
        }
        info!(discarded, boundary, "speech queue cleared");
    }
}

/// A running speech worker thread and the handle that feeds it.
pub struct SpeechService {
    handle: SpeechHandle,
    thread: Option<JoinHandle<()>>,
    init_error: Option<String>,
}

impl SpeechService {
    /// Spawn the worker thread and build the engine on it.
    ///
    /// If `factory` fails the worker runs with a [`NullEngine`]; the failure
    /// is available from [`SpeechService::init_error`].
    ///
    /// # Errors
    ///
    /// Returns an error only if the thread cannot be spawned or dies during start-up.
    pub fn start<F>(factory: F, tick_interval: Duration) -> Result<Self>
    where
        F: FnOnce() -> Result<Box<dyn SpeechEngine>> + Send + 'static,
    {
        let (handle, jobs, commands) = speech_channel();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Option<String>>(1);

        let thread = std::thread::Builder::new()
            .name("chatvoice-speech".to_owned())
            .spawn(move || {
                let engine = match factory() {
                    Ok(engine) => {
                        let _ = ready_tx.send(None);
                        engine
                    }
                    Err(e) => {
                        error!(error = %e, "speech engine failed to start; speech disabled");
                        let _ = ready_tx.send(Some(e.to_string()));
                        Box::new(NullEngine)
                    }
                };
                Worker::new(engine, jobs, commands, tick_interval).run();
            })
            .map_err(|e| RelayError::Speech(format!("failed to spawn speech worker: {e}")))?;

        let init_error = ready_rx
            .recv()
            .map_err(|_| RelayError::Channel("speech worker died during start-up".to_owned()))?;

        Ok(Self {
            handle,
            thread: Some(thread),
            init_error,
        })
    }

    /// A new producer handle for this worker.
    #[must_use]
    pub fn handle(&self) -> SpeechHandle {
        self.handle.clone()
    }

    /// Engine start-up failure, if the worker fell back to silence.
    #[must_use]
    pub fn init_error(&self) -> Option<&str> {
        self.init_error.as_deref()
    }

    /// Wait for the worker thread to end without asking it to.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("speech worker panicked");
        }
    }

    /// Send `Exit` and wait for the worker thread.
    pub fn shutdown(self) {
        self.handle.exit();
        self.join();
    }
}
