//! Incremental `text/event-stream` decoder.
//!
//! The parser consumes raw body chunks as they arrive and emits a record for
//! every blank-line boundary it completes. Chunks may split a field, a line,
//! or a record anywhere (down to a single byte); unterminated trailing input
//! is buffered and prefixed onto the next chunk. The `data` payload is kept as
//! the raw accumulated text; JSON interpretation happens at dispatch.

/// The event name assigned to records that never set an `event:` field.
pub(crate) const DEFAULT_EVENT: &str = "message";

/// One decoded event-stream record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// The last `id:` field seen in the record, if any.
    pub id: Option<String>,
    /// The `event:` field, or [DEFAULT_EVENT] when absent.
    pub event: String,
    /// All `data:` lines of the record, joined with `\n`.
    pub data: String,
}

#[derive(Default)]
pub(crate) struct FrameParser {
    buf: Vec<u8>,
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
    seen_field: bool,
}

impl FrameParser {
    /// Feeds one body chunk, returning every record completed by it.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<Record> {
        self.buf.extend_from_slice(chunk);
        let mut records = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(record) = self.process_line(&line) {
                records.push(record);
            }
        }
        records
    }

    /// Drops any partially accumulated record and buffered bytes.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    fn process_line(&mut self, line: &[u8]) -> Option<Record> {
        if line.is_empty() {
            return self.flush();
        }
        if line[0] == b':' {
            // Comment line, typically a keep-alive.
            return None;
        }
        let line = String::from_utf8_lossy(line);
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        self.seen_field = true;
        None
    }

    fn flush(&mut self) -> Option<Record> {
        if !self.seen_field {
            // Blank line with no preceding fields (e.g. stream keep-alive).
            return None;
        }
        let record = Record {
            id: self.id.take(),
            event: self.event.take().unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
        };
        self.seen_field = false;
        Some(record)
    }
}
