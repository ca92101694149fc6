use memchr::memmem;

/// Line terminator the board uses for everything it sends.
pub const TERMINATOR: &[u8] = b"\r\n";

/// Buffers input and emits a line whenever a CRLF is seen.
///
/// A partial line is held across calls to [`push`](Self::push). Emitted lines
/// have trailing whitespace removed; invalid UTF-8 is replaced rather than
/// rejected since the board only ever sends ASCII.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
        }
    }

    /// Feed a chunk of received bytes, returning every line it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(at) = memmem::find(&self.buffer[start..], TERMINATOR) {
            let end = start + at;
            let text = String::from_utf8_lossy(&self.buffer[start..end]);
            lines.push(text.trim_end().to_string());
            start = end + TERMINATOR.len();
        }
        self.buffer.drain(..start);
        lines
    }

    /// Bytes received since the last complete line.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Discard any partial line.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
