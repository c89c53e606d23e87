//! Newline-delimited framing for the attach protocol and process output.
//!
//! Wire format: one UTF-8 JSON object per `\n`-terminated line.

use crate::error::{McpeError, McpeResult};
use crate::messages::{Event, Request};

/// Encode a serializable value as a single protocol line (without the newline).
pub fn encode_line<T: serde::Serialize>(value: &T) -> McpeResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode one inbound line into a [`Request`].
///
/// Blank lines yield `None`. Lines that do not start with `{` are bare
/// command text and become an untimed `exec`.
pub fn decode_request(line: &str) -> McpeResult<Option<Request>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if !line.starts_with('{') {
        return Ok(Some(Request::Exec {
            command: line.to_string(),
            timeout_ms: None,
        }));
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| McpeError::InvalidMessage(format!("bad request: {e}")))
}

/// Decode one outbound line into an [`Event`].
pub fn decode_event(line: &str) -> McpeResult<Event> {
    serde_json::from_str(line.trim())
        .map_err(|e| McpeError::InvalidMessage(format!("bad event: {e}")))
}

/// Streaming line splitter: accumulates raw bytes and yields complete lines.
///
/// Trailing `\r` is removed (PTYs emit `\r\n`). Invalid UTF-8 is replaced.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed bytes into the decoder and return every line completed by them.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(data);
        let mut lines = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            lines.push(String::from_utf8_lossy(&raw).into_owned());
        }

        lines
    }

    /// Number of bytes of an incomplete line held back.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
