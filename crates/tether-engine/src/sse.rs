use tracing::debug;

/// Largest event block accepted by default. A block growing past the limit
/// is dropped whole.
pub const DEFAULT_MAX_BLOCK_BYTES: usize = 8 * 1024 * 1024;

/// Incremental decoder for the backend's event stream.
///
/// Wire format: each event is a block of `data:` lines terminated by a blank
/// line. Bytes arrive in arbitrary chunks, so partial lines and partial
/// blocks are buffered until complete. Only the joined `data:` payload of a
/// finished block is returned; `event:`, `id:`, `retry:` fields and `:`
/// comments are ignored.
#[derive(Debug)]
pub struct SseDecoder {
    line_buf: Vec<u8>,
    /// Prefix of `line_buf` already searched for a newline.
    scanned: usize,
    data: Vec<String>,
    data_len: usize,
    max_block: usize,
    /// Set when a line of the current block was not valid UTF-8.
    poisoned: bool,
    /// The current block went over `max_block`; skip to its blank line.
    oversized: bool,
    /// The head of the current line was thrown away; its newline ends it.
    discarding_line: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_BLOCK_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_block: usize) -> Self {
        Self {
            line_buf: Vec::new(),
            scanned: 0,
            data: Vec::new(),
            data_len: 0,
            max_block: max_block.max(1),
            poisoned: false,
            oversized: false,
            discarding_line: false,
        }
    }

    /// Feed one chunk and return the payloads of every block it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        self.line_buf.extend_from_slice(chunk);

        while let Some(offset) = self.line_buf[self.scanned..]
            .iter()
            .position(|b| *b == b'\n')
        {
            let end = self.scanned + offset;
            let mut line: Vec<u8> = self.line_buf.drain(..=end).collect();
            self.scanned = 0;
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if std::mem::take(&mut self.discarding_line) {
                continue;
            }
            if line.is_empty() {
                if let Some(payload) = self.finish_block() {
                    out.push(payload);
                }
                continue;
            }
            if self.oversized {
                continue;
            }

            match std::str::from_utf8(&line) {
                Ok(text) => self.push_line(text),
                Err(_) => self.poisoned = true,
            }
            if self.data_len > self.max_block {
                self.drop_block();
            }
        }
        self.scanned = self.line_buf.len();

        // Only an unterminated line is left in the buffer here.
        if !self.oversized && self.data_len + self.line_buf.len() > self.max_block {
            self.drop_block();
        }
        if self.oversized && self.line_buf.iter().any(|b| *b != b'\r') {
            self.line_buf.clear();
            self.scanned = 0;
            self.discarding_line = true;
        }

        out
    }

    fn push_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        if field == "data" {
            self.data_len += value.len() + 1;
            self.data.push(value.to_string());
        }
    }

    fn drop_block(&mut self) {
        debug!(limit = self.max_block, "event block too large, dropping");
        self.oversized = true;
        self.data.clear();
        self.data_len = 0;
    }

    fn finish_block(&mut self) -> Option<String> {
        let poisoned = std::mem::take(&mut self.poisoned);
        let oversized = std::mem::take(&mut self.oversized);
        self.data_len = 0;
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        if poisoned || oversized {
            return None;
        }
        Some(payload)
    }
}
