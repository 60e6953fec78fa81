//! Error types for trace decoding.

use thiserror::Error;

use crate::event::ThreadId;

/// Errors that can occur while reading a thread's trace.
#[derive(Debug, Error)]
pub enum TraceError {
    /// I/O error opening or reading a trace file.
    #[error("I/O error on trace for thread {thread}: {source}")]
    Io {
        /// Thread whose trace failed.
        thread: ThreadId,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A trace line could not be parsed.
    #[error("malformed trace for thread {thread} at line {line}: {reason}")]
    MalformedTrace {
        /// Thread whose trace contains the line.
        thread: ThreadId,
        /// 1-based line number.
        line: u64,
        /// What was wrong with the line.
        reason: String,
    },

    /// An event was requested after the stream and window were both drained.
    #[error("trace for thread {thread} exhausted after line {line}")]
    ExhaustedWindow {
        /// Thread whose trace ran out.
        thread: ThreadId,
        /// Last line read from the stream.
        line: u64,
    },

    /// The pthread metadata file could not be parsed.
    #[error("malformed pthread metadata at line {line}: {reason}")]
    MalformedMetadata {
        /// 1-based line number.
        line: u64,
        /// What was wrong with the line.
        reason: String,
    },

    /// I/O error reading the pthread metadata file.
    #[error("I/O error reading pthread metadata: {0}")]
    MetadataIo(#[source] std::io::Error),
}

impl TraceError {
    /// Thread the error is attributed to, if any.
    pub fn thread(&self) -> Option<ThreadId> {
        match self {
            TraceError::Io { thread, .. }
            | TraceError::MalformedTrace { thread, .. }
            | TraceError::ExhaustedWindow { thread, .. } => Some(*thread),
            TraceError::MalformedMetadata { .. } | TraceError::MetadataIo(_) => None,
        }
    }
}
