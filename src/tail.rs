//! Incremental reader for append-only log files.
//!
//! A [`Tailer`] only ever observes content appended after it opened the file:
//! the first successful open seeks to end-of-file. Each [`Tailer::poll`] makes
//! at most one read attempt and yields at most one complete line.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lifecycle of a tailed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    /// No handle is open.
    Closed,
    /// Handle just opened and positioned at end-of-file.
    OpenAtEnd,
    /// At least one read has been attempted on the open handle.
    Reading,
}

/// Per-source tail state machine. Exclusively owns the file handle.
#[derive(Debug)]
pub struct Tailer {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    state: TailState,
    offset: u64,
    pending: Vec<u8>,
    unavailable_logged: bool,
}

impl Tailer {
    /// Create a closed tailer for `path`; nothing is opened until the first poll.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reader: None,
            state: TailState::Closed,
            offset: 0,
            pending: Vec::new(),
            unavailable_logged: false,
        }
    }

    /// Path currently tailed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current state of the tail state machine.
    #[must_use]
    pub fn state(&self) -> TailState {
        self.state
    }

    /// Byte offset of the next unread byte in the open file.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Point the tailer at a different file. A changed path drops the old
    /// handle; the next poll reopens at the new file's end.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if path != self.path {
            self.close();
            self.path = path;
        }
    }

    /// Release the handle and any partially read line.
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!(path = %self.path.display(), "closed tailed file");
        }
        self.state = TailState::Closed;
        self.offset = 0;
        self.pending.clear();
    }

    /// Attempt one read. Returns a complete line (terminator included) or
    /// `None` when nothing new is available.
    pub fn poll(&mut self) -> Option<String> {
        if self.reader.is_none() {
            self.open_at_end();
            return None;
        }

        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.len() < self.offset => {
                info!(
                    path = %self.path.display(),
                    offset = self.offset,
                    len = meta.len(),
                    "log file shrank; reopening"
                );
                self.close();
                self.open_at_end();
                return None;
            }
            Ok(_) => {}
            Err(err) => {
                self.note_unavailable(&err);
                return None;
            }
        }

        let reader = self.reader.as_mut()?;
        self.state = TailState::Reading;
        match reader.read_until(b'\n', &mut self.pending) {
            Ok(read) => {
                self.offset += read as u64;
                self.unavailable_logged = false;
                if self.pending.last() == Some(&b'\n') {
                    let line = String::from_utf8_lossy(&self.pending).into_owned();
                    self.pending.clear();
                    Some(line)
                } else {
                    None
                }
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "read failed; closing");
                self.close();
                None
            }
        }
    }

    fn open_at_end(&mut self) {
        let opened = File::open(&self.path).and_then(|mut file| {
            let end = file.seek(SeekFrom::End(0))?;
            Ok((file, end))
        });
        match opened {
            Ok((file, end)) => {
                info!(path = %self.path.display(), offset = end, "tailing file");
                self.reader = Some(BufReader::new(file));
                self.offset = end;
                self.state = TailState::OpenAtEnd;
                self.unavailable_logged = false;
            }
            Err(err) => self.note_unavailable(&err),
        }
    }

    fn note_unavailable(&mut self, err: &std::io::Error) {
        if self.unavailable_logged {
            return;
        }
        self.unavailable_logged = true;
        if err.kind() == ErrorKind::NotFound {
            debug!(path = %self.path.display(), "log file not present yet");
        } else {
            warn!(path = %self.path.display(), error = %err, "log file unavailable");
        }
    }
}
