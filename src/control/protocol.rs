//! Wire format of the speech control protocol.
//!
//! One request per line: a three-letter token, optionally followed by a
//! single space and an argument. Every handled request gets a one-line reply.

use crate::speech::Voice;

pub const REPLY_EXITING: &str = "Exiting...";
pub const REPLY_CLEARING: &str = "Clearing queue";
pub const REPLY_MESSAGE_RECEIVED: &str = "Message received";

/// Request tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Exit,
    Clear,
    Message,
    Voice,
    GetVoices,
    Volume,
    Rate,
}

impl Token {
    /// Render token to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exit => "EXT",
            Self::Clear => "CLR",
            Self::Message => "MSG",
            Self::Voice => "VOC",
            Self::GetVoices => "GVC",
            Self::Volume => "VOL",
            Self::Rate => "RTE",
        }
    }

    /// Parse a wire token. Tokens are case-sensitive.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "EXT" => Some(Self::Exit),
            "CLR" => Some(Self::Clear),
            "MSG" => Some(Self::Message),
            "VOC" => Some(Self::Voice),
            "GVC" => Some(Self::GetVoices),
            "VOL" => Some(Self::Volume),
            "RTE" => Some(Self::Rate),
            _ => None,
        }
    }
}

/// A well-formed request.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    Exit,
    Clear,
    Speak(String),
    SetVoice(String),
    GetVoices,
    SetVolume(f64),
    SetRate(f64),
}

/// Result of parsing one line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Request(ControlRequest),
    /// Token not in the command table.
    Unknown(String),
    /// Known token with a bad or missing argument; carries the reply.
    Invalid(String),
    /// Blank line.
    Empty,
}

/// Split `line` on its first space and validate the argument.
#[must_use]
pub fn parse_line(line: &str) -> ParsedLine {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return ParsedLine::Empty;
    }
    let (raw_token, arg) = match line.split_once(' ') {
        Some((token, arg)) => (token, Some(arg)),
        None => (line, None),
    };
    let Some(token) = Token::parse(raw_token) else {
        return ParsedLine::Unknown(raw_token.to_owned());
    };

    let required = || match arg {
        Some(arg) if !arg.trim().is_empty() => Ok(arg),
        _ => Err(ParsedLine::Invalid(format!(
            "Missing argument for {}",
            token.as_str()
        ))),
    };

    let request = match token {
        Token::Exit => ControlRequest::Exit,
        Token::Clear => ControlRequest::Clear,
        Token::GetVoices => ControlRequest::GetVoices,
        Token::Message => match required() {
            Ok(text) => ControlRequest::Speak(text.to_owned()),
            Err(invalid) => return invalid,
        },
        Token::Voice => match required() {
            Ok(id) => ControlRequest::SetVoice(id.trim().to_owned()),
            Err(invalid) => return invalid,
        },
        Token::Volume => match required() {
            Ok(raw) => match parse_number(raw) {
                Some(v) => ControlRequest::SetVolume(v),
                None => return ParsedLine::Invalid(format!("Invalid volume: {raw}")),
            },
            Err(invalid) => return invalid,
        },
        Token::Rate => match required() {
            Ok(raw) => match parse_number(raw) {
                Some(v) => ControlRequest::SetRate(v),
                None => return ParsedLine::Invalid(format!("Invalid rate: {raw}")),
            },
            Err(invalid) => return invalid,
        },
    };
    ParsedLine::Request(request)
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Render a number the way the protocol's clients expect: whole values keep
/// one decimal place (`1.0`, `150.0`), others print in shortest form.
#[must_use]
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// `Voices: {"id": "name", ...}` in catalog order.
#[must_use]
pub fn format_voices(voices: &[Voice]) -> String {
    let entries: Vec<String> = voices
        .iter()
        .map(|v| format!("{}: {}", json_string(&v.id), json_string(&v.name)))
        .collect();
    format!("Voices: {{{}}}", entries.join(", "))
}

fn json_string(s: &str) -> String {
    serde_json::Value::String(s.to_owned()).to_string()
}

/// Reply to `VOC`.
#[must_use]
pub fn voice_reply(effective: &str) -> String {
    format!("Voice set to {effective}")
}

/// Reply to `VOL`.
#[must_use]
pub fn volume_reply(volume: f64) -> String {
    format!("Volume set to {}", format_number(volume))
}

/// Reply to `RTE`.
#[must_use]
pub fn rate_reply(rate: f64) -> String {
    format!("Rate set to {}", format_number(rate))
}

/// Strict-mode reply to an unknown token.
#[must_use]
pub fn unknown_reply(token: &str) -> String {
    format!("Unknown command: {token}")
}
