//! Error types for the replay engine.
//!
//! Every variant is fatal: any of them means the trace set and configuration
//! disagree, so results past that point would be meaningless.

use streplay_trace::{EventId, ThreadId, TraceError};
use thiserror::Error;

use crate::memory::RequestId;
use crate::{CoreId, Cycle};

/// Errors that terminate a replay run.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// A trace line could not be parsed, or a thread ran out of events early.
    #[error("malformed trace for thread {thread} at line {line}: {reason}")]
    MalformedTrace {
        /// Thread whose trace is at fault.
        thread: ThreadId,
        /// 1-based line number (the last line read if the stream ended).
        line: u64,
        /// What was wrong.
        reason: String,
    },

    /// Unlock without holding, or lock while already holding.
    #[error("lock violation by {thread} at event {event} on {address:#x}: {reason}")]
    LockViolation {
        /// Offending thread.
        thread: ThreadId,
        /// Offending event.
        event: EventId,
        /// Lock address.
        address: u64,
        /// What was violated.
        reason: String,
    },

    /// No progress on some core within the deadlock threshold.
    #[error("deadlock at cycle {time} on {}: {details}", format_cores(.cores))]
    Deadlock {
        /// Cycle at which the deadlock was declared.
        time: Cycle,
        /// Cores that stopped progressing.
        cores: Vec<CoreId>,
        /// Per-thread description of what each blocked thread waits on.
        details: String,
    },

    /// A barrier saw an arrival outside its expected participant set.
    #[error("barrier mismatch for {thread} at event {event} on {address:#x}: {reason}")]
    BarrierMismatch {
        /// Arriving thread.
        thread: ThreadId,
        /// Arriving event.
        event: EventId,
        /// Barrier address.
        address: u64,
        /// What did not match.
        reason: String,
    },

    /// I/O error reading a trace.
    #[error("trace I/O error for thread {thread}: {source}")]
    TraceIo {
        /// Thread whose trace failed.
        thread: ThreadId,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The pthread metadata file is unreadable or malformed.
    #[error("pthread metadata error: {0}")]
    Metadata(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A tick named a core that does not exist.
    #[error("unknown core {0}")]
    UnknownCore(CoreId),

    /// A memory completion named a request that is not in flight.
    #[error("completion for unknown memory request {0}")]
    UnknownRequest(RequestId),
}

fn format_cores(cores: &[CoreId]) -> String {
    cores.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
}

impl From<TraceError> for ReplayError {
    fn from(err: TraceError) -> Self {
        match err {
            TraceError::Io { thread, source } => ReplayError::TraceIo { thread, source },
            TraceError::MalformedTrace { thread, line, reason } => {
                ReplayError::MalformedTrace { thread, line, reason }
            }
            TraceError::ExhaustedWindow { thread, line } => ReplayError::MalformedTrace {
                thread,
                line,
                reason: "trace ended while the thread still expected events".to_string(),
            },
            err @ (TraceError::MalformedMetadata { .. } | TraceError::MetadataIo(_)) => {
                ReplayError::Metadata(err.to_string())
            }
        }
    }
}

impl ReplayError {
    /// Build a `MalformedTrace` error for an event.
    pub(crate) fn malformed(thread: ThreadId, line: u64, reason: impl Into<String>) -> Self {
        ReplayError::MalformedTrace {
            thread,
            line,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_window_becomes_malformed_trace() {
        let err: ReplayError = TraceError::ExhaustedWindow {
            thread: ThreadId(2),
            line: 17,
        }
        .into();
        match err {
            ReplayError::MalformedTrace { thread, line, .. } => {
                assert_eq!(thread, ThreadId(2));
                assert_eq!(line, 17);
            }
            other => panic!("expected MalformedTrace, got {:?}", other),
        }
    }

    #[test]
    fn test_deadlock_message_names_cores() {
        let err = ReplayError::Deadlock {
            time: 1001,
            cores: vec![CoreId(0), CoreId(3)],
            details: "T0 waits on barrier 0x2000".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("C0, C3"), "{}", msg);
        assert!(msg.contains("0x2000"), "{}", msg);
    }
}
