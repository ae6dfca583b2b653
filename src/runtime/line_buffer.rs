//! Per-connection accumulation of inbound bytes into newline-terminated lines.
//!
//! Bytes arrive in arbitrary fragments. `LineBuffer` appends them to a
//! growable `BytesMut` and hands back complete lines, oldest first, each one
//! still carrying its trailing `\n`. Whatever follows the last newline stays
//! buffered until more bytes arrive.

use bytes::{Bytes, BytesMut};

/// Line terminator used for message framing.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Growable inbound buffer owned by a single client.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    /// Create an empty line buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Split off the earliest complete line, including its `\n`.
    ///
    /// Returns `None` and leaves the buffer untouched when no newline has
    /// been received yet.
    pub fn extract_line(&mut self) -> Option<Bytes> {
        let pos = self.buf.iter().position(|&b| b == LINE_TERMINATOR)?;
        Some(self.buf.split_to(pos + 1).freeze())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
}
