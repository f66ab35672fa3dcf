//! Line-oriented control service for driving the speech worker remotely.

pub mod protocol;
pub mod server;

pub use protocol::{ControlRequest, ParsedLine, Token};
pub use server::{ControlServer, SessionAction, handle_line};
