//! Line codec for per-thread event traces.
//!
//! Every line starts with `<event_id>,<thread_id>`. The rest of the line
//! selects the event kind:
//!
//! ```text
//! 12,0,40,8,2,1 $ 4096 4103 * 8192 8199    compute: iops, flops, reads, writes,
//!                                          then write ($) and read (*) ranges
//! 13,0 # 1 7 4096 4103 # 2 3 512 519       communication: producer thread,
//!                                          producer event, address range
//! 14,0,pth_ty:1^0x1000                     pthread: op code ^ address
//! ```
//!
//! Numbers are decimal or `0x`-prefixed hexadecimal.

use crate::error::TraceError;
use crate::event::{
    AddrRange, CommEvent, ComputeEvent, Dependency, Event, EventId, EventKind, ProducerId,
    PthreadEvent, PthreadOp, ThreadId,
};
use crate::Result;

/// Tag that introduces a pthread operation.
pub const PTHREAD_TAG: &str = "pth_ty:";

/// Separates the pthread op code from its address.
pub const PTHREAD_ADDR_DELIM: char = '^';

/// Introduces one producer reference of a communication event.
pub const COMM_DELIM: char = '#';

/// Introduces a written range of a compute event.
pub const WRITE_DELIM: char = '$';

/// Introduces a read range of a compute event.
pub const READ_DELIM: char = '*';

/// Header fields of a compute line.
const COMPUTE_FIELDS: usize = 6;

/// Fields of one communication producer reference.
const COMM_FIELDS: usize = 4;

/// Parse a decimal or `0x`-prefixed hexadecimal number.
pub fn parse_number(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

/// Decodes trace lines for one thread.
#[derive(Debug, Clone, Copy)]
pub struct LineDecoder {
    thread: ThreadId,
}

impl LineDecoder {
    /// Create a decoder for `thread`'s trace.
    pub fn new(thread: ThreadId) -> Self {
        LineDecoder { thread }
    }

    /// Decode one line. Blank lines yield `Ok(None)`.
    pub fn decode(&self, line_no: u64, line: &str) -> Result<Option<Event>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let kind = if let Some(tag) = line.find(PTHREAD_TAG) {
            self.decode_pthread(line_no, line, tag)?
        } else if let Some(hash) = line.find(COMM_DELIM) {
            self.decode_comm(line_no, line, hash)?
        } else {
            self.decode_compute(line_no, line)?
        };

        let (id, thread) = self.decode_ids(line_no, line)?;
        if thread != self.thread {
            return Err(self.malformed(
                line_no,
                format!("event belongs to {} but was found in the trace of {}", thread, self.thread),
            ));
        }

        Ok(Some(Event {
            id,
            thread,
            line: line_no,
            kind,
        }))
    }

    fn malformed(&self, line_no: u64, reason: impl Into<String>) -> TraceError {
        TraceError::MalformedTrace {
            thread: self.thread,
            line: line_no,
            reason: reason.into(),
        }
    }

    fn number(&self, line_no: u64, field: &str, what: &str) -> Result<u64> {
        parse_number(field).ok_or_else(|| self.malformed(line_no, format!("invalid {}: {:?}", what, field)))
    }

    fn decode_ids(&self, line_no: u64, line: &str) -> Result<(EventId, ThreadId)> {
        let mut fields = line.split(',');
        let id = fields.next().unwrap_or_default();
        let thread = fields.next().unwrap_or_default();
        let thread = thread
            .split(|c: char| c == COMM_DELIM || c == WRITE_DELIM || c == READ_DELIM)
            .next()
            .unwrap_or_default();
        let id = self.number(line_no, id, "event id")?;
        let thread = self.number(line_no, thread, "thread id")?;
        let thread = u32::try_from(thread).map_err(|_| self.malformed(line_no, "thread id out of range"))?;
        Ok((EventId(id), ThreadId(thread)))
    }

    fn decode_pthread(&self, line_no: u64, line: &str, tag: usize) -> Result<EventKind> {
        let body = &line[tag + PTHREAD_TAG.len()..];
        let (code, address) = body
            .split_once(PTHREAD_ADDR_DELIM)
            .ok_or_else(|| self.malformed(line_no, "pthread event without '^' address"))?;
        let code = self.number(line_no, code, "pthread op code")?;
        let op = u32::try_from(code)
            .ok()
            .and_then(PthreadOp::from_code)
            .ok_or_else(|| self.malformed(line_no, format!("unknown pthread op code {}", code)))?;
        let address = self.number(line_no, address, "pthread address")?;
        Ok(EventKind::Pthread(PthreadEvent { op, address }))
    }

    fn decode_comm(&self, line_no: u64, line: &str, hash: usize) -> Result<EventKind> {
        let mut dependencies = Vec::new();
        for group in line[hash + 1..].split(COMM_DELIM) {
            let fields: Vec<&str> = group.split_whitespace().collect();
            if fields.len() != COMM_FIELDS {
                return Err(self.malformed(
                    line_no,
                    format!("communication reference needs {} fields, got {}", COMM_FIELDS, fields.len()),
                ));
            }
            let thread = self.number(line_no, fields[0], "producer thread")?;
            let thread = u32::try_from(thread).map_err(|_| self.malformed(line_no, "producer thread out of range"))?;
            let event = self.number(line_no, fields[1], "producer event")?;
            let range = self.range(line_no, fields[2], fields[3])?;
            dependencies.push(Dependency {
                producer: ProducerId::new(ThreadId(thread), EventId(event)),
                range,
            });
        }
        Ok(EventKind::Communication(CommEvent { dependencies }))
    }

    fn decode_compute(&self, line_no: u64, line: &str) -> Result<EventKind> {
        let header_end = line.find([WRITE_DELIM, READ_DELIM]).unwrap_or(line.len());
        let header: Vec<&str> = line[..header_end].split(',').collect();
        if header.len() != COMPUTE_FIELDS {
            return Err(self.malformed(
                line_no,
                format!("compute event needs {} header fields, got {}", COMPUTE_FIELDS, header.len()),
            ));
        }

        let mut event = ComputeEvent {
            iops: self.number(line_no, header[2], "integer op count")?,
            flops: self.number(line_no, header[3], "float op count")?,
            reads: self.number(line_no, header[4], "read count")?,
            writes: self.number(line_no, header[5], "write count")?,
            ..ComputeEvent::default()
        };

        let mut rest = &line[header_end..];
        while let Some(delim) = rest.chars().next() {
            let body_end = rest[1..]
                .find([WRITE_DELIM, READ_DELIM])
                .map(|i| i + 1)
                .unwrap_or(rest.len());
            let fields: Vec<&str> = rest[1..body_end].split_whitespace().collect();
            if fields.len() != 2 {
                return Err(self.malformed(line_no, format!("address range needs 2 fields, got {}", fields.len())));
            }
            let range = self.range(line_no, fields[0], fields[1])?;
            if delim == WRITE_DELIM {
                event.write_ranges.push(range);
            } else {
                event.read_ranges.push(range);
            }
            rest = &rest[body_end..];
        }

        Ok(EventKind::Compute(event))
    }

    fn range(&self, line_no: u64, start: &str, end: &str) -> Result<AddrRange> {
        let start = self.number(line_no, start, "range start")?;
        let end = self.number(line_no, end, "range end")?;
        if start > end {
            return Err(self.malformed(line_no, format!("range start {:#x} exceeds end {:#x}", start, end)));
        }
        Ok(AddrRange::new(start, end))
    }
}

/// Encode an event back into its trace line.
pub fn encode(event: &Event) -> String {
    let mut line = format!("{},{}", event.id.0, event.thread.0);
    match &event.kind {
        EventKind::Compute(c) => {
            line.push_str(&format!(",{},{},{},{}", c.iops, c.flops, c.reads, c.writes));
            for r in &c.write_ranges {
                line.push_str(&format!(" {} {} {}", WRITE_DELIM, r.start, r.end));
            }
            for r in &c.read_ranges {
                line.push_str(&format!(" {} {} {}", READ_DELIM, r.start, r.end));
            }
        }
        EventKind::Communication(c) => {
            for dep in &c.dependencies {
                line.push_str(&format!(
                    " {} {} {} {} {}",
                    COMM_DELIM, dep.producer.thread.0, dep.producer.event.0, dep.range.start, dep.range.end
                ));
            }
        }
        EventKind::Pthread(p) => {
            line.push_str(&format!(",{}{}{}{:#x}", PTHREAD_TAG, p.op.code(), PTHREAD_ADDR_DELIM, p.address));
        }
    }
    line
}
