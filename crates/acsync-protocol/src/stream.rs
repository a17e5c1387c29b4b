//! Incremental decoder for the alert stream.
//!
//! The alert stream is a long-lived chunked HTTP response. Between event
//! records it carries multipart boundaries, part headers, XML keep-alives
//! and binary picture parts. Event records are JSON objects, either on one
//! line or pretty-printed across several.
//!
//! The decoder buffers bytes, splits complete lines, and collects a JSON
//! object from the first line starting with `{` until its braces balance.
//! Every other line is discarded.
//!
//! ```
//! use acsync_protocol::StreamDecoder;
//!
//! let mut decoder = StreamDecoder::new();
//! assert!(decoder.feed(b"--boundary\r\nContent-Type: application/json\r\n\r\n{\"a\":").is_empty());
//! let records = decoder.feed(b"1}\r\n");
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0]["a"], 1);
//! ```

use bytes::BytesMut;
use serde_json::Value;

/// Largest JSON record accepted before the partial record is dropped.
const MAX_RECORD_SIZE: usize = 256 * 1024;

/// Longest line buffered while waiting for a newline.
const MAX_LINE_SIZE: usize = 512 * 1024;

/// Stateful alert-stream decoder.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: BytesMut,
    record: String,
    depth: usize,
    in_string: bool,
    escaped: bool,
    skipped: u64,
}

impl StreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every record completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);
        let mut records = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            let line = String::from_utf8_lossy(&line);
            if let Some(record) = self.push_line(line.trim_end_matches(['\r', '\n'])) {
                records.push(record);
            }
        }

        if self.buffer.len() > MAX_LINE_SIZE {
            // Binary picture part without line breaks.
            self.buffer.clear();
            self.skipped += 1;
        }
        records
    }

    /// Number of fragments dropped as malformed or oversized.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Returns `true` while a record is partially collected.
    #[must_use]
    pub fn in_record(&self) -> bool {
        !self.record.is_empty()
    }

    fn push_line(&mut self, line: &str) -> Option<Value> {
        if self.record.is_empty() {
            let trimmed = line.trim_start();
            if !trimmed.starts_with('{') {
                return None;
            }
            self.scan(trimmed);
        } else {
            self.record.push('\n');
            self.scan(line);
        }

        if self.record.len() > MAX_RECORD_SIZE {
            self.reset();
            self.skipped += 1;
            return None;
        }
        if self.depth > 0 {
            return None;
        }

        let record = std::mem::take(&mut self.record);
        self.reset();
        match serde_json::from_str::<Value>(&record) {
            Ok(value) if value.is_object() => Some(value),
            _ => {
                self.skipped += 1;
                None
            }
        }
    }

    /// Append `text` to the record, tracking brace depth outside strings.
    ///
    /// Text after the closing brace of the record is dropped.
    fn scan(&mut self, text: &str) {
        for (idx, c) in text.char_indices() {
            if self.in_string {
                match (self.escaped, c) {
                    (true, _) => self.escaped = false,
                    (false, '\\') => self.escaped = true,
                    (false, '"') => self.in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => self.in_string = true,
                '{' => self.depth += 1,
                '}' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        self.record.push_str(&text[..=idx]);
                        return;
                    }
                }
                _ => {}
            }
        }
        self.record.push_str(text);
    }

    fn reset(&mut self) {
        self.record.clear();
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }
}
