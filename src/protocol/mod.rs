//! Wire-level protocol for the chat server
//!
//! The protocol is line oriented: every inbound chunk is treated as one
//! logical line once trailing line terminators are stripped, and every
//! reply the server produces is a single newline-terminated chunk.

pub mod command;

pub use command::{parse, Command, ParseError};

/// Strip trailing carriage returns, newlines, and NUL bytes from an inbound
/// chunk and return the remaining text, or `None` if nothing is left.
///
/// Chunks are byte buffers straight off the wire; invalid UTF-8 is replaced
/// rather than rejected so a garbled client cannot wedge the dispatcher.
pub fn trim_chunk(data: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(data);
    let trimmed = text.trim_end_matches(['\r', '\n', '\0']);
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
