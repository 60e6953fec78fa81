//! Forward-only trace readers.
//!
//! A [`TraceReader`] decodes one thread's event stream on demand. It keeps a
//! private line cursor and never rewinds; reading after the stream reported
//! exhaustion is an error.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;

use crate::codec::LineDecoder;
use crate::error::TraceError;
use crate::event::{Event, EventId, ThreadId};
use crate::Result;

/// Prefix of per-thread trace file names.
pub const EVENT_FILE_PREFIX: &str = "sigil.events.out-";

/// Buffer size for trace file reads.
const READ_BUFFER_BYTES: usize = 64 * 1024;

/// A supplier of parsed events for one thread.
pub trait EventSource {
    /// Thread this source belongs to.
    fn thread(&self) -> ThreadId;

    /// Whether the underlying stream has reported end-of-stream.
    fn is_exhausted(&self) -> bool;

    /// Last line consumed from the stream (0 before the first read).
    fn line(&self) -> u64;

    /// Decode up to `max` further events in trace order.
    ///
    /// Returns fewer than `max` events only when the stream ends, after which
    /// [`is_exhausted`](Self::is_exhausted) reports `true`. Calling this on an
    /// exhausted source is an error.
    fn read_batch(&mut self, max: usize) -> Result<Vec<Event>>;
}

impl<S: EventSource + ?Sized> EventSource for Box<S> {
    fn thread(&self) -> ThreadId {
        (**self).thread()
    }

    fn is_exhausted(&self) -> bool {
        (**self).is_exhausted()
    }

    fn line(&self) -> u64 {
        (**self).line()
    }

    fn read_batch(&mut self, max: usize) -> Result<Vec<Event>> {
        (**self).read_batch(max)
    }
}

/// Decodes a per-thread text trace from any buffered reader.
pub struct TraceReader<R> {
    input: R,
    decoder: LineDecoder,
    thread: ThreadId,
    line_no: u64,
    last_id: Option<EventId>,
    exhausted: bool,
    scratch: String,
}

impl<R: BufRead> TraceReader<R> {
    /// Create a reader over `input` holding `thread`'s trace.
    pub fn new(thread: ThreadId, input: R) -> Self {
        TraceReader {
            input,
            decoder: LineDecoder::new(thread),
            thread,
            line_no: 0,
            last_id: None,
            exhausted: false,
            scratch: String::new(),
        }
    }

    fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            self.scratch.clear();
            let read = self
                .input
                .read_line(&mut self.scratch)
                .map_err(|source| TraceError::Io {
                    thread: self.thread,
                    source,
                })?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let Some(event) = self.decoder.decode(self.line_no, &self.scratch)? else {
                continue;
            };
            if let Some(last) = self.last_id {
                if event.id <= last {
                    return Err(TraceError::MalformedTrace {
                        thread: self.thread,
                        line: self.line_no,
                        reason: format!("event id {} does not follow {}", event.id, last),
                    });
                }
            }
            self.last_id = Some(event.id);
            return Ok(Some(event));
        }
    }
}

impl<R: BufRead> EventSource for TraceReader<R> {
    fn thread(&self) -> ThreadId {
        self.thread
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn line(&self) -> u64 {
        self.line_no
    }

    fn read_batch(&mut self, max: usize) -> Result<Vec<Event>> {
        if self.exhausted {
            return Err(TraceError::ExhaustedWindow {
                thread: self.thread,
                line: self.line_no,
            });
        }
        let mut batch = Vec::with_capacity(max);
        while batch.len() < max {
            match self.next_event()? {
                Some(event) => batch.push(event),
                None => {
                    debug!(thread = %self.thread, lines = self.line_no, "trace stream exhausted");
                    self.exhausted = true;
                    break;
                }
            }
        }
        Ok(batch)
    }
}

/// Path of `thread`'s trace in `dir`, preferring the gzip-compressed file.
pub fn trace_path(dir: &Path, thread: ThreadId) -> PathBuf {
    let gz = dir.join(format!("{}{}.gz", EVENT_FILE_PREFIX, thread.0));
    if gz.exists() {
        gz
    } else {
        dir.join(format!("{}{}", EVENT_FILE_PREFIX, thread.0))
    }
}

/// Open `thread`'s trace in `dir`. Files ending in `.gz` are decompressed.
pub fn open_trace(dir: &Path, thread: ThreadId) -> Result<TraceReader<Box<dyn BufRead + Send>>> {
    let path = trace_path(dir, thread);
    let file = File::open(&path).map_err(|source| TraceError::Io { thread, source })?;
    let input: Box<dyn BufRead + Send> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(BufReader::with_capacity(READ_BUFFER_BYTES, GzDecoder::new(file)))
    } else {
        Box::new(BufReader::with_capacity(READ_BUFFER_BYTES, file))
    };
    debug!(%thread, path = %path.display(), "opened trace");
    Ok(TraceReader::new(thread, input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(text: &str) -> TraceReader<Cursor<Vec<u8>>> {
        TraceReader::new(ThreadId(0), Cursor::new(text.as_bytes().to_vec()))
    }

    #[test]
    fn test_batches_preserve_order() {
        let mut r = reader("1,0,1,0,0,0\n2,0,2,0,0,0\n\n3,0,3,0,0,0\n");
        let first = r.read_batch(2).unwrap();
        assert_eq!(first.iter().map(|e| e.id.0).collect::<Vec<_>>(), vec![1, 2]);
        assert!(!r.is_exhausted());
        let second = r.read_batch(2).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].line, 4);
        assert!(r.is_exhausted());
    }

    #[test]
    fn test_read_past_end_is_error() {
        let mut r = reader("1,0,1,0,0,0\n");
        r.read_batch(10).unwrap();
        assert!(r.is_exhausted());
        assert!(matches!(
            r.read_batch(1),
            Err(TraceError::ExhaustedWindow { line: 1, .. })
        ));
    }

    #[test]
    fn test_non_increasing_ids_rejected() {
        let mut r = reader("5,0,1,0,0,0\n5,0,1,0,0,0\n");
        match r.read_batch(10) {
            Err(TraceError::MalformedTrace { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected MalformedTrace, got {:?}", other),
        }
    }
}
