//! Incremental decoder for the `event:` / `data:` stream framing.
//!
//! Events are separated by a blank line (`\n\n`, or `\r\n\r\n` from CRLF
//! producers). Chunks may split an event anywhere,
//! including inside a field prefix, a payload line, a multi-byte character or
//! the terminator itself; everything after the last terminator is kept in the
//! decoder's pending buffer until the next chunk arrives.

use crate::event::{EventKind, EventRecord};

/// Longest terminator, `\n\r\n` after the line's own `\r`.
const MAX_TERMINATOR: usize = 3;

/// Stateful event decoder. One instance per stream.
#[derive(Debug, Default)]
pub struct EventDecoder {
    pending: Vec<u8>,
    /// Prefix of `pending` already searched without finding a terminator.
    scanned: usize,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<EventRecord> {
        self.pending.extend_from_slice(chunk);

        let mut records = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some((end, next)) = find_terminator(&self.pending, from) {
            if let Some(record) = parse_block(&self.pending[start..end]) {
                records.push(record);
            }
            start = next;
            from = next;
        }
        self.pending.drain(..start);
        // A terminator may begin in the last bytes and complete next chunk.
        self.scanned = self.pending.len().saturating_sub(MAX_TERMINATOR - 1);
        records
    }

    /// Flush the pending buffer at end of stream.
    ///
    /// A producer that closes without a trailing blank line still gets its
    /// last event delivered.
    pub fn finish(&mut self) -> Option<EventRecord> {
        if self.pending.is_empty() {
            return None;
        }
        self.scanned = 0;
        let block = std::mem::take(&mut self.pending);
        let record = parse_block(&block);
        if record.is_none() {
            tracing::trace!(bytes = block.len(), "Discarding unterminated fragment");
        }
        record
    }

    /// Number of bytes waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// First blank line at or after `from`: the block end and the index just
/// past the terminator.
fn find_terminator(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while let Some(offset) = buf.get(i..)?.iter().position(|&b| b == b'\n') {
        let newline = i + offset;
        match buf.get(newline + 1) {
            Some(b'\n') => return Some((newline, newline + 2)),
            Some(b'\r') if buf.get(newline + 2) == Some(&b'\n') => {
                return Some((newline, newline + 3))
            }
            _ => i = newline + 1,
        }
    }
    None
}

/// Parse one event block (terminator excluded).
///
/// Returns `None` for keep-alives: blocks whose joined payload is empty.
fn parse_block(block: &[u8]) -> Option<EventRecord> {
    // Blocks end on a terminator, never inside a UTF-8 sequence.
    let text = String::from_utf8_lossy(block);

    let mut kind = EventKind::Message;
    let mut data: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(value) = line.strip_prefix("event:") {
            kind = EventKind::parse(value.trim());
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    let payload = data.join("\n");
    if payload.is_empty() {
        return None;
    }
    Some(EventRecord { kind, payload })
}
