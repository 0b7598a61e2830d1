//! # Line Framer
//!
//! Turns the byte stream of one connection into discrete newline-terminated
//! messages. A single read may carry many frames, a fraction of one, or a
//! frame split across reads; the framer buffers the trailing fragment until
//! the delimiter arrives.
//!
//! Decoding is tolerant: malformed UTF-8 is decoded lossily rather than
//! raising, so a garbled frame can never kill its connection.

/// Per-connection accumulator for partial frames.
///
/// One framer per connection, owned by that connection's read loop. Never
/// shared, so it needs no synchronization.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        LineFramer::default()
    }

    /// Appends `bytes` and returns every complete line found, in order.
    ///
    /// Lines are returned without their `\n` delimiter; a `\r` immediately
    /// before the delimiter is stripped too (embedded firmware often sends
    /// CRLF). The trailing partial fragment, if any, stays buffered for the
    /// next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut frame: Vec<u8> = self.buf.drain(..=pos).collect();
            frame.pop(); // the delimiter itself
            if frame.last() == Some(&b'\r') {
                frame.pop();
            }
            lines.push(String::from_utf8_lossy(&frame).into_owned());
        }
        lines
    }

    /// Number of buffered bytes still waiting for a delimiter.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}
