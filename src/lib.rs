//! chatvoice: reads game chat aloud and relays it to a chat service.
//!
//! The relay tails one or more game client logs and fans every chat line out
//! to independently toggleable sinks:
//! log file → Tailer → Parser → Router → {Speech, Forward}
//!
//! # Architecture
//!
//! - **Tailer** (`tail`): per-file state machine yielding newly appended lines
//! - **Parser** (`chat`): turns a raw line into a [`ChatEvent`]
//! - **Router** (`router`): enqueues onto the sinks enabled for the source
//! - **Speech** (`speech`): one worker thread owning the synthesizer, fed by
//!   a job queue and a priority command bus
//! - **Forward** (`forward`): rate-limited delivery to the current target
//! - **Control** (`control`): line protocol for driving the speech worker
//!   over TCP

pub mod chat;
pub mod config;
pub mod control;
pub mod error;
pub mod forward;
pub mod pipeline;
pub mod router;
pub mod sources;
pub mod speech;
pub mod tail;

pub use chat::{ChatEvent, parse_line};
pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use pipeline::Pipeline;
pub use router::{Router, Sinks};
pub use sources::{SourceSet, SourceUpdate, WatchedSourceConfig};
pub use speech::{SpeechHandle, SpeechService};
