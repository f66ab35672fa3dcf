//! Chat line parsing.
//!
//! Game client logs interleave chat with everything else. A chat line carries
//! the `[CHAT]` marker followed by the message text, which may contain
//! `§`-prefixed formatting codes and an optional `<speaker>` frame:
//!
//! ```text
//! [12:00:01] [Render thread/INFO]: [CHAT] §a<Steve> §rhello
//! ```

use crate::error::{RelayError, Result};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Marker token that identifies chat lines.
pub const CHAT_MARKER: &str = "[CHAT]";

/// Formatting escape character; it and the following code character are removed.
pub const FORMAT_ESCAPE: char = '§';

/// A single chat message extracted from a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    speaker: Option<String>,
    body: String,
    forward: String,
}

impl ChatEvent {
    /// Speaker name, present only when the line used the `<speaker>` frame.
    #[must_use]
    pub fn speaker(&self) -> Option<&str> {
        self.speaker.as_deref()
    }

    /// Message body with formatting codes stripped and brackets neutralised.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Text handed to the speech sink, e.g. `Steve says hello`.
    #[must_use]
    pub fn rendered_message(&self) -> String {
        match &self.speaker {
            Some(speaker) => format!("{speaker} says {}", self.body),
            None => self.body.clone(),
        }
    }

    /// Text handed to the forward sink: formatting stripped, speaker markup kept.
    #[must_use]
    pub fn forward_message(&self) -> &str {
        &self.forward
    }

    /// Render the event back into a minimal log line that parses to the same event.
    #[must_use]
    pub fn to_log_line(&self) -> String {
        match &self.speaker {
            Some(speaker) => format!("{CHAT_MARKER} <{speaker}> {}", self.body),
            None => format!("{CHAT_MARKER} {}", self.body),
        }
    }
}

/// Parse one raw log line. Returns `None` for anything that is not a chat message.
#[must_use]
pub fn parse_line(line: &str) -> Option<ChatEvent> {
    let start = line.find(CHAT_MARKER)? + CHAT_MARKER.len();
    let message = skip_one_char(&line[start..]);
    let stripped = strip_formatting(message);
    let stripped = stripped.trim_end_matches(['\r', '\n']);

    let (speaker, raw_body) = match split_speaker(stripped) {
        Some((speaker, rest)) => (Some(speaker.to_owned()), rest),
        None => (None, stripped),
    };

    let body = raw_body.replace(['<', '>'], " ");
    if body.is_empty() {
        return None;
    }

    Some(ChatEvent {
        speaker,
        body,
        forward: stripped.to_owned(),
    })
}

/// Remove every `§x` formatting pair from `text`.
#[must_use]
pub fn strip_formatting(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == FORMAT_ESCAPE {
            chars.next();
        } else {
            out.push(c);
        }
    }
    out
}

fn skip_one_char(text: &str) -> &str {
    let mut chars = text.chars();
    chars.next();
    chars.as_str()
}

/// Split `<speaker> body` into its parts. The closing bracket must come before
/// any whitespace so that a `<` opening an ordinary sentence is not mistaken
/// for a speaker frame.
fn split_speaker(text: &str) -> Option<(&str, &str)> {
    let inner = text.strip_prefix('<')?;
    let close = inner.find('>')?;
    let name = &inner[..close];
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return None;
    }
    Some((name, skip_one_char(&inner[close + 1..])))
}

/// Path of the cleaned transcript written for `input`: `<stem>-cleaned.txt`.
#[must_use]
pub fn cleaned_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{stem}-cleaned.txt"))
}

/// Write every chat message of `input` to its cleaned transcript file.
///
/// Returns the output path and the number of messages written.
///
/// # Errors
///
/// Fails if the output already exists or either file cannot be accessed.
pub fn clean_log_file(input: &Path) -> Result<(PathBuf, usize)> {
    let output = cleaned_output_path(input);
    if output.exists() {
        return Err(RelayError::Config(format!(
            "{} already exists",
            output.display()
        )));
    }

    let reader = BufReader::new(std::fs::File::open(input)?);
    let mut writer = std::io::BufWriter::new(
        std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&output)?,
    );

    let mut count = 0;
    for raw in reader.split(b'\n') {
        let raw = raw?;
        if let Some(event) = parse_line(&String::from_utf8_lossy(&raw)) {
            writeln!(writer, "{}", event.rendered_message())?;
            count += 1;
        }
    }
    writer.flush()?;
    Ok((output, count))
}
