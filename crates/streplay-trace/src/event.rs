//! Typed trace events.
//!
//! Each simulated thread owns a chronological log of events. An event is one of
//! three kinds:
//!
//! - **Compute**: integer/float operation counts plus the address ranges it
//!   wrote and read.
//! - **Communication**: a consumer-side edge on events produced by other threads.
//! - **Pthread**: a synchronization call against a resource address.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Simulated thread identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub u32);

impl ThreadId {
    /// Create a new thread identifier.
    pub const fn new(id: u32) -> Self {
        ThreadId(id)
    }

    /// Index into per-thread tables.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Per-thread event sequence number, strictly increasing within one trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Global identity of a producing event: the thread that ran it and its id.
///
/// Ordering is by thread first, so all producer ids of one thread form a
/// contiguous range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProducerId {
    /// Producing thread.
    pub thread: ThreadId,
    /// Producing event.
    pub event: EventId,
}

impl ProducerId {
    /// Create a producer id.
    pub const fn new(thread: ThreadId, event: EventId) -> Self {
        ProducerId { thread, event }
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.thread, self.event)
    }
}

// ============================================================================
// Address Ranges
// ============================================================================

/// Inclusive byte range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrRange {
    /// First byte.
    pub start: u64,
    /// Last byte (inclusive).
    pub end: u64,
}

impl AddrRange {
    /// Create a range; `start` must not exceed `end`.
    pub const fn new(start: u64, end: u64) -> Self {
        AddrRange { start, end }
    }

    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }

    /// Ranges are never empty; provided for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Number of items [`AddrRange::chunks`] yields for `max_size`.
    pub fn chunk_count(&self, max_size: u64) -> u64 {
        let max_size = max_size.max(1);
        (self.end / max_size - self.start / max_size).saturating_add(1)
    }

    /// Split into accesses of at most `max_size` bytes that never cross a
    /// `max_size`-aligned boundary. Yields `(address, size)` pairs.
    pub fn chunks(&self, max_size: u64) -> RangeChunks {
        RangeChunks {
            next: Some(self.start),
            end: self.end,
            max_size: max_size.max(1),
        }
    }
}

/// Iterator returned by [`AddrRange::chunks`].
#[derive(Debug, Clone)]
pub struct RangeChunks {
    next: Option<u64>,
    end: u64,
    max_size: u64,
}

impl Iterator for RangeChunks {
    type Item = (u64, u32);

    fn next(&mut self) -> Option<Self::Item> {
        let addr = self.next?;
        let boundary = (addr / self.max_size) * self.max_size + (self.max_size - 1);
        let last = boundary.min(self.end);
        self.next = if last >= self.end { None } else { Some(last + 1) };
        Some((addr, (last - addr + 1) as u32))
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Synchronization calls recorded in a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PthreadOp {
    MutexLock,
    MutexUnlock,
    SpinLock,
    SpinUnlock,
    BarrierWait,
    ThreadCreate,
    ThreadJoin,
}

impl PthreadOp {
    /// Decode the numeric operation code used in trace lines.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(PthreadOp::MutexLock),
            2 => Some(PthreadOp::MutexUnlock),
            3 => Some(PthreadOp::ThreadCreate),
            4 => Some(PthreadOp::ThreadJoin),
            5 => Some(PthreadOp::BarrierWait),
            8 => Some(PthreadOp::SpinLock),
            9 => Some(PthreadOp::SpinUnlock),
            _ => None,
        }
    }

    /// Numeric operation code used in trace lines.
    pub fn code(self) -> u32 {
        match self {
            PthreadOp::MutexLock => 1,
            PthreadOp::MutexUnlock => 2,
            PthreadOp::ThreadCreate => 3,
            PthreadOp::ThreadJoin => 4,
            PthreadOp::BarrierWait => 5,
            PthreadOp::SpinLock => 8,
            PthreadOp::SpinUnlock => 9,
        }
    }
}

impl fmt::Display for PthreadOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PthreadOp::MutexLock => "mutex-lock",
            PthreadOp::MutexUnlock => "mutex-unlock",
            PthreadOp::SpinLock => "spin-lock",
            PthreadOp::SpinUnlock => "spin-unlock",
            PthreadOp::BarrierWait => "barrier-wait",
            PthreadOp::ThreadCreate => "thread-create",
            PthreadOp::ThreadJoin => "thread-join",
        };
        f.write_str(name)
    }
}

/// A compute burst with its local memory footprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComputeEvent {
    /// Integer operations.
    pub iops: u64,
    /// Floating-point operations.
    pub flops: u64,
    /// Traced read count (informational).
    pub reads: u64,
    /// Traced write count (informational).
    pub writes: u64,
    /// Byte ranges written, in trace order.
    pub write_ranges: Vec<AddrRange>,
    /// Byte ranges read, in trace order.
    pub read_ranges: Vec<AddrRange>,
}

/// One producer edge of a communication event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    /// Event that must complete first.
    pub producer: ProducerId,
    /// Data handed over by the producer.
    pub range: AddrRange,
}

/// A consumer waiting on data produced by other threads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommEvent {
    /// Producer edges, in trace order.
    pub dependencies: Vec<Dependency>,
}

/// A synchronization call on a resource address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PthreadEvent {
    /// Operation performed.
    pub op: PthreadOp,
    /// Lock, barrier, or thread-handle address.
    pub address: u64,
}

/// Payload of an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Compute(ComputeEvent),
    Communication(CommEvent),
    Pthread(PthreadEvent),
}

impl EventKind {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Compute(_) => "compute",
            EventKind::Communication(_) => "comm",
            EventKind::Pthread(_) => "pthread",
        }
    }
}

/// A parsed trace event owned by its thread's window until consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Sequence id within the thread.
    pub id: EventId,
    /// Owning thread.
    pub thread: ThreadId,
    /// Source line, for diagnostics.
    pub line: u64,
    /// Event payload.
    pub kind: EventKind,
}

impl Event {
    /// Producer id other threads use to depend on this event.
    pub fn producer_id(&self) -> ProducerId {
        ProducerId::new(self.thread, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_split_on_alignment() {
        let chunks: Vec<_> = AddrRange::new(6, 20).chunks(8).collect();
        assert_eq!(chunks, vec![(6, 2), (8, 8), (16, 5)]);
    }

    #[test]
    fn test_chunks_single_byte() {
        let chunks: Vec<_> = AddrRange::new(0x1000, 0x1000).chunks(8).collect();
        assert_eq!(chunks, vec![(0x1000, 1)]);
    }

    #[test]
    fn test_chunks_cover_range_exactly() {
        let range = AddrRange::new(3, 100);
        let total: u64 = range.chunks(8).map(|(_, size)| size as u64).sum();
        assert_eq!(total, range.len());
        assert!(range.chunks(8).all(|(_, size)| size <= 8));
    }

    #[test]
    fn test_chunk_count_matches_chunks() {
        for (start, end) in [(6, 20), (0, 7), (0x1000, 0x1000), (3, 100), (8, 15)] {
            let range = AddrRange::new(start, end);
            assert_eq!(range.chunk_count(8), range.chunks(8).count() as u64, "{:?}", range);
        }
        assert_eq!(AddrRange::new(0, 0x3fff_ffff).chunk_count(8), 0x0800_0000);
        assert_eq!(AddrRange::new(0, u64::MAX).len(), u64::MAX);
    }

    #[test]
    fn test_pthread_codes() {
        for op in [
            PthreadOp::MutexLock,
            PthreadOp::MutexUnlock,
            PthreadOp::SpinLock,
            PthreadOp::SpinUnlock,
            PthreadOp::BarrierWait,
            PthreadOp::ThreadCreate,
            PthreadOp::ThreadJoin,
        ] {
            assert_eq!(PthreadOp::from_code(op.code()), Some(op));
        }
        assert_eq!(PthreadOp::from_code(6), None);
    }

    #[test]
    fn test_producer_ordering_groups_by_thread() {
        let a = ProducerId::new(ThreadId(0), EventId(99));
        let b = ProducerId::new(ThreadId(1), EventId(1));
        assert!(a < b);
    }
}
