//! Inbound message framing
//!
//! tsserver writes `Content-Length: <N>\r\n\r\n<N bytes of JSON>`. Bytes are
//! accumulated until a complete header and body are present; a partial
//! message blocks further dispatch until more data arrives. Output depends
//! only on the concatenated byte stream, never on how it was chunked.

use serde_json::Value;
use tracing::{trace, warn};

const CONTENT_LENGTH: &[u8] = b"Content-Length:";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Accumulating decoder for `Content-Length` framed JSON messages
#[derive(Debug, Default)]
pub struct MessageFramer {
    buffer: Vec<u8>,
}

impl MessageFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received but not yet consumed by a complete frame
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Append a chunk and return every message completed by it, in order.
    ///
    /// Frames whose body is not valid JSON are logged and dropped; decoding
    /// resumes at the next frame boundary.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();

        loop {
            let Some(header_start) = find(&self.buffer, CONTENT_LENGTH) else {
                // Keep a tail that could still be the start of a split header
                let keep = CONTENT_LENGTH.len() - 1;
                if self.buffer.len() > keep {
                    let discard = self.buffer.len() - keep;
                    self.discard_prefix(discard);
                }
                break;
            };
            if header_start > 0 {
                self.discard_prefix(header_start);
            }

            let Some(header_end) = find(&self.buffer, HEADER_TERMINATOR) else {
                break;
            };
            let body_start = header_end + HEADER_TERMINATOR.len();

            let Some(length) = parse_content_length(&self.buffer[..header_end]) else {
                warn!(
                    header = %String::from_utf8_lossy(&self.buffer[..header_end]),
                    "Malformed tsserver frame header, skipping"
                );
                self.buffer.drain(..body_start);
                continue;
            };

            let body_end = body_start + length;
            if self.buffer.len() < body_end {
                break;
            }

            match serde_json::from_slice::<Value>(&self.buffer[body_start..body_end]) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    warn!(
                        error = %e,
                        length,
                        "Dropping tsserver message with malformed JSON body"
                    );
                }
            }
            self.buffer.drain(..body_end);
        }

        messages
    }

    fn discard_prefix(&mut self, len: usize) {
        let discarded = &self.buffer[..len];
        if discarded.iter().any(|b| !b.is_ascii_whitespace()) {
            trace!(
                bytes = len,
                "Discarding unframed bytes from tsserver output"
            );
        }
        self.buffer.drain(..len);
    }
}

/// Encode a body the way tsserver frames its output; used by fakes and tests
pub fn encode_frame(body: &str) -> Vec<u8> {
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(body.as_bytes());
    frame
}

fn parse_content_length(header: &[u8]) -> Option<usize> {
    let header = std::str::from_utf8(header).ok()?;
    header.split("\r\n").find_map(|line| {
        line.strip_prefix("Content-Length:")
            .and_then(|value| value.trim().parse().ok())
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
