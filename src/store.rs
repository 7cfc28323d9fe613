//! Decoded trace line store
//!
//! Stimulus payload bytes arrive in arbitrary chunks; the store coalesces
//! them into display lines. A line stays open for continuation until one of
//! the split criteria seals it:
//!
//! - a CR or LF in the payload (the newline byte itself is dropped),
//! - a byte for a different channel,
//! - the 256-byte line length cap,
//! - more than 0.1 s elapsed since the line started (continuation timeout).
//!
//! Lines are kept in a contiguous append-order sequence; the last entry
//! doubles as the "tail" that new bytes append to. The store is owned by
//! the UI thread; the decoder mutates it only from `process_text` calls.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::channels::{ChannelRegistry, CHANNEL_COUNT};
use crate::error::Result;

/// Hard cap on the text length of a single line; longer output splits
pub const LINE_MAX_LENGTH: usize = 256;

/// Initial text buffer reservation for a new line
const LINE_INITIAL_SIZE: usize = 32;

/// Maximum gap in seconds between parts of a continued line
pub const CONTINUATION_TIMEOUT: f64 = 0.1;

/// One decoded trace line
#[derive(Debug, Clone)]
pub struct TraceLine {
    /// Stimulus channel (or CTF stream id) the line belongs to
    pub channel: u8,
    /// Arrival timestamp of the first byte, in seconds
    pub timestamp: f64,
    text: Vec<u8>,
    timefmt: String,
    sealed: bool,
}

impl TraceLine {
    /// The raw text bytes of the line
    pub fn text_bytes(&self) -> &[u8] {
        &self.text
    }

    /// The line text; invalid UTF-8 sequences are replaced
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.text)
    }

    /// Formatted timestamp relative to the first line in the store
    pub fn time_label(&self) -> &str {
        &self.timefmt
    }

    /// Whether the line is closed for further continuation
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn push_byte(&mut self, byte: u8) {
        // On reserve failure the input byte is dropped rather than
        // panicking; trace viewing degrades, it does not abort.
        if self.text.len() == self.text.capacity() && self.text.try_reserve(self.text.len()).is_err()
        {
            return;
        }
        self.text.push(byte);
    }
}

/// Append-only store of decoded trace lines
#[derive(Debug, Default)]
pub struct TraceStore {
    lines: Vec<TraceLine>,
}

impl TraceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard all lines (the relative-time anchor resets with them)
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Whether the store holds no lines
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of lines in the store
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Line at `index`, if present
    pub fn line(&self, index: usize) -> Option<&TraceLine> {
        self.lines.get(index)
    }

    /// Iterate over the lines in append order
    pub fn lines(&self) -> impl Iterator<Item = &TraceLine> {
        self.lines.iter()
    }

    /// Timestamp of the first line; the anchor for relative time display
    pub fn time_origin(&self) -> Option<f64> {
        self.lines.first().map(|line| line.timestamp)
    }

    /// Append plain-text payload bytes for `channel`.
    ///
    /// Applies the full coalescing policy described in the module docs.
    /// Trailing NUL bytes are stripped first; they are an artifact of
    /// zero-compression expansion on the SWO link.
    pub fn append_text(&mut self, channel: u8, payload: &[u8], timestamp: f64) {
        let mut len = payload.len();
        while len > 0 && payload[len - 1] == 0 {
            len -= 1;
        }

        for &byte in &payload[..len] {
            if let Some(tail) = self.lines.last_mut() {
                if byte == b'\r' || byte == b'\n' {
                    tail.sealed = true;
                    continue;
                } else if tail.channel != channel {
                    tail.sealed = true;
                } else if tail.text.len() >= LINE_MAX_LENGTH {
                    tail.sealed = true;
                }
                if timestamp - tail.timestamp > CONTINUATION_TIMEOUT {
                    tail.sealed = true;
                }
                if !tail.sealed {
                    tail.push_byte(byte);
                    continue;
                }
            } else if byte == b'\r' || byte == b'\n' {
                // no leading empty line
                continue;
            }
            self.start_line(channel, timestamp, byte);
        }
    }

    /// Append a complete message (CTF path).
    ///
    /// `remote_timestamp` selects the high-resolution time format used for
    /// messages stamped by the target itself.
    pub fn add_message(&mut self, channel: u8, text: &str, timestamp: f64, remote_timestamp: bool) {
        let relative = timestamp - self.time_origin().unwrap_or(timestamp);
        let timefmt = if remote_timestamp {
            format!("{:.6}", relative)
        } else {
            format!("{:.3}", relative)
        };
        if self.lines.try_reserve(1).is_err() {
            return;
        }
        self.lines.push(TraceLine {
            channel,
            timestamp,
            text: text.as_bytes().to_vec(),
            timefmt,
            sealed: true,
        });
    }

    fn start_line(&mut self, channel: u8, timestamp: f64, byte: u8) {
        let relative = timestamp - self.time_origin().unwrap_or(timestamp);
        // degrade to dropping the line when memory is exhausted
        if self.lines.try_reserve(1).is_err() {
            return;
        }
        let mut text = Vec::new();
        if text.try_reserve(LINE_INITIAL_SIZE).is_err() {
            return;
        }
        text.push(byte);
        self.lines.push(TraceLine {
            channel,
            timestamp,
            text,
            timefmt: format!("{:.3}", relative),
            sealed: false,
        });
    }

    /// Case-insensitive substring search, wrapping around the list once.
    ///
    /// The search starts at the line after `start` (or at the first line
    /// when `start` is `None`) and visits every line exactly once. Returns
    /// the index of the first matching line.
    pub fn find(&self, text: &str, start: Option<usize>) -> Option<usize> {
        if self.lines.is_empty() || text.is_empty() {
            return None;
        }
        let count = self.lines.len();
        let begin = match start {
            Some(line) if line + 1 < count => line + 1,
            _ => 0,
        };
        let needle = text.as_bytes();
        for offset in 0..count {
            let index = (begin + offset) % count;
            let hay = &self.lines[index].text;
            if hay.len() >= needle.len()
                && hay
                    .windows(needle.len())
                    .any(|window| window.eq_ignore_ascii_case(needle))
            {
                return Some(index);
            }
        }
        None
    }

    /// Index of the last line whose timestamp is strictly below `timestamp`
    pub fn find_timestamp(&self, timestamp: f64) -> Option<usize> {
        let preceding = self
            .lines
            .iter()
            .take_while(|line| line.timestamp < timestamp)
            .count();
        preceding.checked_sub(1)
    }

    /// Export the store as CSV: `Number,Name,Timestamp,Text`.
    ///
    /// Name and Text fields are quoted with RFC 4180 escaping (embedded
    /// quotes doubled). Channel names come from the registry.
    pub fn save(&self, path: &Path, registry: &ChannelRegistry) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "Number,Name,Timestamp,Text")?;
        for line in &self.lines {
            let chan = line.channel as usize;
            let name = if chan < CHANNEL_COUNT {
                registry.name(chan).to_string()
            } else {
                chan.to_string()
            };
            writeln!(
                writer,
                "{},\"{}\",{:.6},\"{}\"",
                line.channel,
                csv_escape(&name),
                line.timestamp,
                csv_escape(&line.text()),
            )?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn csv_escape(field: &str) -> String {
    field.replace('"', "\"\"")
}
