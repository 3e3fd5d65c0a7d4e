//! Incremental decoder for the `text/event-stream` wire format.
//!
//! Records are made of lines:
//! - `event: <kind>` - event kind (defaults to `message`)
//! - `data: <json-or-text>` - payload line, repeated lines are joined with `\n`
//! - `id: <id>` - event id, echoed back as `Last-Event-ID` on reconnect
//! - `: <anything>` - comment, used by servers as keep-alive
//! - empty line - end of record
//!
//! Lines end with LF, CRLF or a bare CR, and a leading UTF-8 byte order mark is
//! skipped. Bytes may be fed in arbitrary chunks; a line, a CRLF pair or a UTF-8
//! sequence split across chunks is reassembled before it is interpreted.

use crate::error::{frame_error, Error, FrameErrorKind};
use events::{EventFrame, DEFAULT_EVENT_KIND};
use serde_json::Value;

/// Longest line kept while waiting for its terminator.
pub const MAX_LINE_LEN: usize = 1024 * 1024;

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// A single interpreted line of the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseLine {
    Event(String),
    Data(String),
    Id(String),
    Retry(String),
    Comment(String),
    Empty,
}

/// Interpret one complete line (without its terminator).
pub fn parse_line(line: &str) -> SseLine {
    if line.is_empty() {
        return SseLine::Empty;
    }
    if let Some(comment) = line.strip_prefix(':') {
        return SseLine::Comment(comment.trim_start().to_string());
    }

    let (field, value) = match line.split_once(':') {
        Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
        None => (line, ""),
    };

    match field {
        "event" => SseLine::Event(value.to_string()),
        "data" => SseLine::Data(value.to_string()),
        "id" => SseLine::Id(value.to_string()),
        "retry" => SseLine::Retry(value.to_string()),
        // Unknown fields are ignored like comments
        _ => SseLine::Comment(line.to_string()),
    }
}

/// Decode a record's data field into a frame payload.
///
/// JSON is decoded as such. Plain text is kept as a JSON string, but text that opens
/// an object or array and fails to parse is treated as a truncated or corrupt record.
pub fn decode_payload(kind: &str, data: &str) -> Result<Value, Error> {
    match serde_json::from_str(data) {
        Ok(value) => Ok(value),
        Err(e) if data.trim_start().starts_with(['{', '[']) => Err(frame_error(
            FrameErrorKind::InvalidJson,
            &format!("event `{kind}`: {e}"),
        )),
        Err(_) => Ok(Value::String(data.to_string())),
    }
}

#[derive(Debug, Default)]
struct PendingRecord {
    kind: Option<String>,
    data: Vec<String>,
    malformed: Option<FrameErrorKind>,
}

/// Stateful decoder turning transport chunks into event frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    record: PendingRecord,
    last_event_id: Option<String>,
    /// The start of the stream has been checked for a byte order mark.
    bom_checked: bool,
    /// The previous line ended in CR, so a leading LF belongs to it.
    after_cr: bool,
    /// The current line overflowed and is dropped up to its terminator.
    discarding: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent `id:` seen on this stream, kept across records.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Feed a chunk of bytes, returning every record it completed.
    ///
    /// Malformed records are returned as errors in stream position; they do not
    /// affect the records around them.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<EventFrame, Error>> {
        self.buffer.extend_from_slice(chunk);

        if !self.bom_checked {
            if self.buffer.len() < BOM.len() && BOM.starts_with(&self.buffer) {
                return Vec::new();
            }
            if self.buffer.starts_with(BOM) {
                self.buffer.drain(..BOM.len());
            }
            self.bom_checked = true;
        }

        let mut frames = Vec::new();
        let mut start = 0;
        loop {
            if self.after_cr && start < self.buffer.len() {
                self.after_cr = false;
                if self.buffer[start] == b'\n' {
                    start += 1;
                }
            }

            let Some(offset) = self.buffer[start..]
                .iter()
                .position(|b| *b == b'\n' || *b == b'\r')
            else {
                break;
            };
            let end = start + offset;
            self.after_cr = self.buffer[end] == b'\r';

            if std::mem::take(&mut self.discarding) {
                // Tail of an overflowed line
            } else {
                match std::str::from_utf8(&self.buffer[start..end]).map(parse_line) {
                    Ok(line) => {
                        if let Some(result) = self.apply(line) {
                            frames.push(result);
                        }
                    }
                    Err(_) => self.mark_malformed(FrameErrorKind::InvalidUtf8),
                }
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > MAX_LINE_LEN {
            self.buffer.clear();
            self.discarding = true;
            self.mark_malformed(FrameErrorKind::LineTooLong);
        }

        frames
    }

    /// Discard any partially received record, e.g. after the transport dropped.
    ///
    /// The last event id survives so the next stream can resume from it.
    pub fn reset(&mut self) {
        *self = Self {
            last_event_id: self.last_event_id.take(),
            ..Self::default()
        };
    }

    fn mark_malformed(&mut self, kind: FrameErrorKind) {
        self.record.malformed.get_or_insert(kind);
    }

    fn apply(&mut self, line: SseLine) -> Option<Result<EventFrame, Error>> {
        match line {
            SseLine::Event(kind) => self.record.kind = Some(kind),
            SseLine::Data(data) => self.record.data.push(data),
            // Ids containing NUL are ignored
            SseLine::Id(id) if !id.contains('\0') => self.last_event_id = Some(id),
            SseLine::Id(_) | SseLine::Retry(_) | SseLine::Comment(_) => {}
            SseLine::Empty => return self.finish_record(),
        }
        None
    }

    fn finish_record(&mut self) -> Option<Result<EventFrame, Error>> {
        let record = std::mem::take(&mut self.record);
        let kind = record
            .kind
            .filter(|kind| !kind.is_empty())
            .unwrap_or_else(|| DEFAULT_EVENT_KIND.to_string());

        if let Some(error_kind) = record.malformed {
            let reason = match error_kind {
                FrameErrorKind::LineTooLong => "a line longer than the limit",
                _ => "invalid UTF-8",
            };
            return Some(Err(frame_error(
                error_kind,
                &format!("event `{kind}` contained {reason}"),
            )));
        }
        // Records without data carry nothing to deliver
        if record.data.is_empty() {
            return None;
        }

        let data = record.data.join("\n");
        Some(decode_payload(&kind, &data).map(|payload| EventFrame {
            kind,
            payload,
            id: self.last_event_id.clone(),
        }))
    }
}
