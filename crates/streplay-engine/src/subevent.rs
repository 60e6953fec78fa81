//! Decomposition of trace events into schedulable sub-events.

use streplay_trace::{AddrRange, CommEvent, ComputeEvent, EventKind, RangeChunks};

use crate::memory::MemOp;

/// One memory access of at most the configured request size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemAccess {
    /// Read or write.
    pub op: MemOp,
    /// Byte address.
    pub address: u64,
    /// Size in bytes.
    pub size: u32,
    /// Communication reads are shared regardless of access history.
    pub shared_hint: bool,
}

/// Smallest schedulable unit of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubEvent {
    /// A compute burst.
    Compute {
        /// Integer operations.
        iops: u64,
        /// Floating-point operations.
        flops: u64,
    },
    /// A memory access.
    Memory(MemAccess),
}

/// Split an event into sub-events in execution order.
///
/// Accesses are produced on demand, so a large address range costs nothing
/// until the scheduler reaches it.
pub fn decompose(kind: &EventKind, max_request_size: u32) -> SubEvents {
    let max_size = max_request_size as u64;
    match kind {
        EventKind::Compute(compute) => SubEvents::compute(compute, max_size),
        EventKind::Communication(comm) => SubEvents::comm(comm, max_size),
        EventKind::Pthread(_) => SubEvents::empty(),
    }
}

/// Accesses of one kind, split into request-sized chunks as they are taken.
#[derive(Debug)]
struct AccessStream {
    op: MemOp,
    shared_hint: bool,
    max_size: u64,
    ranges: std::vec::IntoIter<AddrRange>,
    current: Option<RangeChunks>,
    total: u64,
    taken: u64,
}

impl AccessStream {
    fn new(ranges: Vec<AddrRange>, op: MemOp, max_size: u64, shared_hint: bool) -> Self {
        let total = ranges
            .iter()
            .fold(0u64, |sum, range| sum.saturating_add(range.chunk_count(max_size)));
        AccessStream {
            op,
            shared_hint,
            max_size,
            ranges: ranges.into_iter(),
            current: None,
            total,
            taken: 0,
        }
    }

    fn has_next(&self) -> bool {
        self.taken < self.total
    }

    fn next_access(&mut self) -> Option<MemAccess> {
        loop {
            if let Some((address, size)) = self.current.as_mut().and_then(Iterator::next) {
                self.taken += 1;
                return Some(MemAccess {
                    op: self.op,
                    address,
                    size,
                    shared_hint: self.shared_hint,
                });
            }
            self.current = Some(self.ranges.next()?.chunks(self.max_size));
        }
    }
}

/// Lazy sub-event sequence of one event.
///
/// Operations are spread evenly over the accesses, each step emitting a
/// compute burst followed by one access. Writes and reads interleave in
/// proportion to their counts, writes first on ties.
#[derive(Debug)]
pub struct SubEvents {
    writes: AccessStream,
    reads: AccessStream,
    steps: u64,
    step: u64,
    iops: (u64, u64),
    flops: (u64, u64),
    pending: Option<SubEvent>,
}

impl SubEvents {
    fn new(writes: AccessStream, reads: AccessStream, iops: u64, flops: u64) -> Self {
        let steps = writes.total.saturating_add(reads.total).max(1);
        SubEvents {
            writes,
            reads,
            steps,
            step: 0,
            iops: (iops / steps, iops % steps),
            flops: (flops / steps, flops % steps),
            pending: None,
        }
    }

    fn compute(compute: &ComputeEvent, max_size: u64) -> Self {
        SubEvents::new(
            AccessStream::new(compute.write_ranges.clone(), MemOp::Write, max_size, false),
            AccessStream::new(compute.read_ranges.clone(), MemOp::Read, max_size, false),
            compute.iops,
            compute.flops,
        )
    }

    fn comm(comm: &CommEvent, max_size: u64) -> Self {
        let ranges = comm.dependencies.iter().map(|dep| dep.range).collect();
        SubEvents::new(
            AccessStream::new(Vec::new(), MemOp::Write, max_size, true),
            AccessStream::new(ranges, MemOp::Read, max_size, true),
            0,
            0,
        )
    }

    fn empty() -> Self {
        SubEvents::comm(&CommEvent::default(), 1)
    }

    fn next_access(&mut self) -> Option<MemAccess> {
        let (w, big_w) = (self.writes.taken as u128, self.writes.total as u128);
        let (r, big_r) = (self.reads.taken as u128, self.reads.total as u128);
        // Whichever kind is proportionally further behind goes next.
        if self.writes.has_next() && (!self.reads.has_next() || w * big_r <= r * big_w) {
            self.writes.next_access()
        } else {
            self.reads.next_access()
        }
    }
}

impl Iterator for SubEvents {
    type Item = SubEvent;

    fn next(&mut self) -> Option<SubEvent> {
        loop {
            if let Some(sub) = self.pending.take() {
                return Some(sub);
            }
            if self.step >= self.steps {
                return None;
            }
            let i = self.step;
            self.step += 1;
            self.pending = self.next_access().map(SubEvent::Memory);
            let iops = self.iops.0 + u64::from(i < self.iops.1);
            let flops = self.flops.0 + u64::from(i < self.flops.1);
            if iops > 0 || flops > 0 {
                return Some(SubEvent::Compute { iops, flops });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streplay_trace::{Dependency, EventId, ProducerId, PthreadEvent, PthreadOp, ThreadId};

    fn ops(subs: &[SubEvent]) -> (u64, u64) {
        subs.iter().fold((0, 0), |(i, f), s| match s {
            SubEvent::Compute { iops, flops } => (i + iops, f + flops),
            SubEvent::Memory(_) => (i, f),
        })
    }

    #[test]
    fn test_pure_compute_is_one_burst() {
        let kind = EventKind::Compute(ComputeEvent {
            iops: 10,
            flops: 4,
            ..ComputeEvent::default()
        });
        let subs: Vec<_> = decompose(&kind, 8).collect();
        assert_eq!(subs, vec![SubEvent::Compute { iops: 10, flops: 4 }]);
    }

    #[test]
    fn test_ops_spread_over_accesses() {
        let kind = EventKind::Compute(ComputeEvent {
            iops: 7,
            flops: 0,
            write_ranges: vec![AddrRange::new(0, 7)],
            read_ranges: vec![AddrRange::new(64, 79)],
            ..ComputeEvent::default()
        });
        let subs: Vec<_> = decompose(&kind, 8).collect();
        let memory: Vec<_> = subs
            .iter()
            .filter_map(|s| match s {
                SubEvent::Memory(m) => Some((m.op, m.address)),
                SubEvent::Compute { .. } => None,
            })
            .collect();
        assert_eq!(memory, vec![(MemOp::Write, 0), (MemOp::Read, 64), (MemOp::Read, 72)]);
        assert_eq!(ops(&subs), (7, 0));
        assert_eq!(subs[0], SubEvent::Compute { iops: 3, flops: 0 });
    }

    #[test]
    fn test_zero_op_compute_without_ranges_is_empty() {
        assert_eq!(decompose(&EventKind::Compute(ComputeEvent::default()), 8).count(), 0);
    }

    #[test]
    fn test_comm_reads_are_shared() {
        let kind = EventKind::Communication(CommEvent {
            dependencies: vec![Dependency {
                producer: ProducerId::new(ThreadId(0), EventId(5)),
                range: AddrRange::new(0x100, 0x10f),
            }],
        });
        let subs: Vec<_> = decompose(&kind, 8).collect();
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|s| matches!(
            s,
            SubEvent::Memory(MemAccess { op: MemOp::Read, shared_hint: true, .. })
        )));
    }

    #[test]
    fn test_pthread_has_no_sub_events() {
        let kind = EventKind::Pthread(PthreadEvent {
            op: PthreadOp::MutexLock,
            address: 0x1000,
        });
        assert_eq!(decompose(&kind, 8).count(), 0);
    }

    #[test]
    fn test_huge_range_is_split_lazily() {
        let kind = EventKind::Compute(ComputeEvent {
            iops: 3,
            flops: 0,
            write_ranges: vec![AddrRange::new(0, 0x3fff_ffff)],
            ..ComputeEvent::default()
        });
        let first: Vec<_> = decompose(&kind, 8).take(5).collect();
        let write = |address| {
            SubEvent::Memory(MemAccess {
                op: MemOp::Write,
                address,
                size: 8,
                shared_hint: false,
            })
        };
        assert_eq!(
            first,
            vec![
                SubEvent::Compute { iops: 1, flops: 0 },
                write(0),
                SubEvent::Compute { iops: 1, flops: 0 },
                write(8),
                SubEvent::Compute { iops: 1, flops: 0 },
            ]
        );
    }

    #[test]
    fn test_writes_and_reads_interleave_proportionally() {
        let kind = EventKind::Compute(ComputeEvent {
            write_ranges: vec![AddrRange::new(0, 7)],
            read_ranges: vec![AddrRange::new(64, 87)],
            ..ComputeEvent::default()
        });
        let order: Vec<_> = decompose(&kind, 8)
            .map(|s| match s {
                SubEvent::Memory(m) => m.op,
                SubEvent::Compute { .. } => panic!("no operations to spread"),
            })
            .collect();
        assert_eq!(order, vec![MemOp::Write, MemOp::Read, MemOp::Read, MemOp::Read]);
    }
}
