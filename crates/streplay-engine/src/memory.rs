//! Boundary with the external memory subsystem.
//!
//! The engine submits timed requests through [`MemoryPort`] and learns of
//! their completion when the host calls
//! [`Engine::complete_memory`](crate::Engine::complete_memory) with the
//! request's id.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;

use streplay_trace::ThreadId;

use crate::{CoreId, Cycle};

/// Identity of an in-flight memory request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req{}", self.0)
    }
}

/// Direction of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemOp {
    Read,
    Write,
}

impl MemOp {
    /// Lowercase name for labels.
    pub const fn as_str(self) -> &'static str {
        match self {
            MemOp::Read => "read",
            MemOp::Write => "write",
        }
    }
}

/// A timed request handed to the memory subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRequest {
    /// Id echoed back on completion.
    pub id: RequestId,
    /// Issuing core.
    pub core: CoreId,
    /// Issuing thread.
    pub thread: ThreadId,
    /// Read or write.
    pub op: MemOp,
    /// Byte address.
    pub address: u64,
    /// Size in bytes.
    pub size: u32,
    /// Whether the line is shared between threads.
    pub shared: bool,
    /// Cache-hierarchy cost estimated by the timing model.
    pub cache_cycles: Cycle,
    /// Cycle the request was issued.
    pub issued_at: Cycle,
}

/// Accepts timed memory requests. Completion is reported asynchronously.
pub trait MemoryPort {
    /// Submit a request.
    fn submit(&mut self, request: MemRequest);
}

/// Memory subsystem that completes a request after its estimated cache cost
/// plus a fixed fabric latency.
#[derive(Debug, Clone)]
pub struct FixedLatencyMemory {
    latency: Cycle,
    pending: BinaryHeap<Reverse<(Cycle, RequestId)>>,
    submitted: u64,
}

impl FixedLatencyMemory {
    /// Create a memory with `latency` cycles per request (at least 1).
    pub fn new(latency: Cycle) -> Self {
        FixedLatencyMemory {
            latency: latency.max(1),
            pending: BinaryHeap::new(),
            submitted: 0,
        }
    }

    /// Completion time of the earliest outstanding request.
    pub fn next_completion(&self) -> Option<Cycle> {
        self.pending.peek().map(|Reverse((at, _))| *at)
    }

    /// Remove the earliest request that completes at or before `now`.
    pub fn pop_ready(&mut self, now: Cycle) -> Option<(Cycle, RequestId)> {
        match self.pending.peek() {
            Some(Reverse((at, _))) if *at <= now => self.pending.pop().map(|Reverse(entry)| entry),
            _ => None,
        }
    }

    /// Requests still outstanding.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Requests submitted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }
}

impl MemoryPort for FixedLatencyMemory {
    fn submit(&mut self, request: MemRequest) {
        self.submitted += 1;
        let done_at = request
            .issued_at
            .saturating_add(request.cache_cycles)
            .saturating_add(self.latency);
        self.pending.push(Reverse((done_at, request.id)));
    }
}
