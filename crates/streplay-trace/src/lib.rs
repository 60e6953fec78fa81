//! # streplay-trace
//!
//! Trace ingestion for the streplay replay engine.
//!
//! Each simulated thread has its own text trace (optionally gzip-compressed)
//! holding one event per line. This crate provides:
//!
//! - [`Event`] and friends: the typed event model
//! - [`LineDecoder`]: the line codec
//! - [`TraceReader`]: a forward-only per-thread stream decoder
//! - [`EventWindow`]: a bounded lookahead queue refilled in batches
//! - [`PthreadMetadata`]: thread-handle and barrier-participant tables
//!
//! ## Example
//!
//! ```rust
//! use std::io::Cursor;
//! use streplay_trace::{EventWindow, ThreadId, TraceReader};
//!
//! let text = "1,0,10,0,0,0\n2,0,pth_ty:1^0x1000\n";
//! let reader = TraceReader::new(ThreadId(0), Cursor::new(text));
//! let mut window = EventWindow::new(reader, 1, 16);
//!
//! assert_eq!(window.pop()?.id.0, 1);
//! assert_eq!(window.peek()?.map(|e| e.id.0), Some(2));
//! # Ok::<(), streplay_trace::TraceError>(())
//! ```

mod codec;
mod error;
mod event;
mod metadata;
mod reader;
mod window;

pub use codec::{encode, parse_number, LineDecoder, COMM_DELIM, PTHREAD_TAG, READ_DELIM, WRITE_DELIM};
pub use error::TraceError;
pub use event::{
    AddrRange, CommEvent, ComputeEvent, Dependency, Event, EventId, EventKind, ProducerId, PthreadEvent,
    PthreadOp, RangeChunks, ThreadId,
};
pub use metadata::{PthreadMetadata, PTHREAD_FILE};
pub use reader::{open_trace, trace_path, EventSource, TraceReader, EVENT_FILE_PREFIX};
pub use window::{EventWindow, DEFAULT_HIGH_WATER, DEFAULT_LOW_WATER};

/// Result type for trace operations.
pub type Result<T> = std::result::Result<T, TraceError>;
