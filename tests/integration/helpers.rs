//! Shared helpers for integration tests.

use chatvoice::Result;
use chatvoice::SpeechService;
use chatvoice::speech::{SpeakOutcome, SpeechEngine, Voice};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Tape {
    spoken: Vec<String>,
    busy: bool,
    stops: usize,
}

/// Read side of a [`RecordingEngine`].
#[derive(Debug, Clone, Default)]
pub(crate) struct Recorder {
    tape: Arc<Mutex<Tape>>,
}

impl Recorder {
    pub(crate) fn spoken(&self) -> Vec<String> {
        self.tape.lock().unwrap().spoken.clone()
    }

    pub(crate) fn stops(&self) -> usize {
        self.tape.lock().unwrap().stops
    }

    /// Finish the utterance in progress.
    pub(crate) fn finish(&self) {
        self.tape.lock().unwrap().busy = false;
    }
}

/// In-memory engine recording every accepted utterance. With `hold` set an
/// utterance stays in progress until [`Recorder::finish`] or a stop.
pub(crate) struct RecordingEngine {
    tape: Arc<Mutex<Tape>>,
    hold: bool,
}

impl SpeechEngine for RecordingEngine {
    fn try_speak(&mut self, text: &str) -> Result<SpeakOutcome> {
        let mut tape = self.tape.lock().unwrap();
        if tape.busy {
            return Ok(SpeakOutcome::Busy);
        }
        tape.spoken.push(text.to_owned());
        tape.busy = self.hold;
        Ok(SpeakOutcome::Accepted)
    }

    fn is_idle(&mut self) -> bool {
        !self.tape.lock().unwrap().busy
    }

    fn tick(&mut self) {}

    fn stop(&mut self) {
        let mut tape = self.tape.lock().unwrap();
        if tape.busy {
            tape.stops += 1;
        }
        tape.busy = false;
    }

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

/// Start a speech worker backed by a [`RecordingEngine`].
pub(crate) fn recording_speech(hold: bool) -> (SpeechService, Recorder) {
    let recorder = Recorder::default();
    let tape = Arc::clone(&recorder.tape);
    let service = SpeechService::start(
        move || Ok(Box::new(RecordingEngine { tape, hold }) as Box<dyn SpeechEngine>),
        Duration::from_millis(2),
    )
    .expect("start speech worker");
    (service, recorder)
}

/// Append `text` to `path`, creating the file if needed.
pub(crate) fn append(path: &Path, text: &str) {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .expect("open log for append");
    file.write_all(text.as_bytes()).expect("append to log");
    file.flush().expect("flush log");
}

/// Poll `check` until it holds or `timeout` passes.
pub(crate) async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
