//! Dependency resolution for trace synchronization.
//!
//! The [`DependencyResolver`] owns every piece of cross-thread state: the
//! producer/consumer waiter table, mutex and spinlock holders, barrier arrival
//! sets, thread start and completion flags, and the RTT statistics. The
//! scheduler asks [`DependencyResolver::can_execute`] before starting an event
//! and reports completions back; threads made eligible by those reports are
//! collected as wakeups in release order.
//!
//! # Ordering
//!
//! Every release is FIFO by arrival: mutex waiters queue per address,
//! communication waiters are released in registration order, and barrier
//! participants are woken in the order they arrived.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

use streplay_metrics::{metric_defs, metrics};
use streplay_trace::{CommEvent, Event, EventId, EventKind, ProducerId, PthreadEvent, PthreadOp, PthreadMetadata, ThreadId};
use tracing::{debug, trace, warn};

use crate::error::ReplayError;
use crate::rtt::RttStats;
use crate::{Cycle, Result};

/// Why an event may not execute yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// A producer event has not completed.
    Dependency {
        /// First unsatisfied producer.
        producer: ProducerId,
    },
    /// The mutex is held by another thread.
    Mutex {
        /// Lock address.
        address: u64,
    },
    /// The spinlock is held by another thread. The thread keeps retrying.
    Spin {
        /// Lock address.
        address: u64,
    },
    /// Not all participants have arrived.
    Barrier {
        /// Barrier address.
        address: u64,
    },
    /// The joined thread has not completed.
    Join {
        /// Joined thread.
        thread: ThreadId,
    },
}

impl BlockReason {
    /// Short label for metrics.
    pub const fn as_str(&self) -> &'static str {
        match self {
            BlockReason::Dependency { .. } => "dependency",
            BlockReason::Mutex { .. } => "mutex",
            BlockReason::Spin { .. } => "spin",
            BlockReason::Barrier { .. } => "barrier",
            BlockReason::Join { .. } => "join",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Dependency { producer } => write!(f, "dependency on {}", producer),
            BlockReason::Mutex { address } => write!(f, "mutex {:#x}", address),
            BlockReason::Spin { address } => write!(f, "spinlock {:#x}", address),
            BlockReason::Barrier { address } => write!(f, "barrier {:#x}", address),
            BlockReason::Join { thread } => write!(f, "join of {}", thread),
        }
    }
}

/// Answer to "may this event execute now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Execute the event.
    Proceed,
    /// Do not execute; the thread waits for a wakeup (or retries, for spins).
    Blocked(BlockReason),
}

/// A consumer waiting on one producer id.
#[derive(Debug, Clone, Copy)]
struct CommWaiter {
    /// Registration order across all producers.
    seq: u64,
    consumer: ThreadId,
    event: EventId,
    line: u64,
    triggered_at: Cycle,
}

#[derive(Debug, Default)]
struct LockState {
    holder: Option<ThreadId>,
    /// Set when an unlock passed the lock straight to a waiter that has not
    /// retried yet.
    handed_to: Option<ThreadId>,
    waiters: VecDeque<ThreadId>,
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: Vec<ThreadId>,
    /// Released participants that have not yet passed their barrier event.
    released: HashSet<ThreadId>,
}

/// Owner of all cross-thread synchronization state.
#[derive(Debug)]
pub struct DependencyResolver {
    metadata: PthreadMetadata,
    /// Last completed event per thread.
    progress: Vec<Option<EventId>>,
    started: Vec<bool>,
    completed: Vec<bool>,
    comm_waiters: BTreeMap<ProducerId, Vec<CommWaiter>>,
    next_wait_seq: u64,
    /// Outstanding waiter entries per consumer.
    pending: Vec<usize>,
    mutexes: HashMap<u64, LockState>,
    spins: HashMap<u64, LockState>,
    barriers: HashMap<u64, BarrierState>,
    joiners: HashMap<ThreadId, Vec<ThreadId>>,
    wakeups: Vec<ThreadId>,
    rtt: RttStats,
    barrier_releases: u64,
    lock_handoffs: u64,
}

impl DependencyResolver {
    /// Resolver for `num_threads` threads. Threads created through a handle in
    /// `metadata` start out not started.
    pub fn new(num_threads: usize, metadata: PthreadMetadata, rtt: RttStats) -> Self {
        let started = (0..num_threads)
            .map(|t| !metadata.is_spawned(ThreadId(t as u32)))
            .collect();
        DependencyResolver {
            metadata,
            progress: vec![None; num_threads],
            started,
            completed: vec![false; num_threads],
            comm_waiters: BTreeMap::new(),
            next_wait_seq: 0,
            pending: vec![0; num_threads],
            mutexes: HashMap::new(),
            spins: HashMap::new(),
            barriers: HashMap::new(),
            joiners: HashMap::new(),
            wakeups: Vec::new(),
            rtt,
            barrier_releases: 0,
            lock_handoffs: 0,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Decide whether `event` may execute at `now`.
    ///
    /// A blocked communication event registers its thread as a waiter on every
    /// unsatisfied producer; the thread must not retry until it is woken.
    pub fn can_execute(&mut self, event: &Event, now: Cycle) -> Result<Verdict> {
        match &event.kind {
            EventKind::Compute(_) => Ok(Verdict::Proceed),
            EventKind::Communication(comm) => self.check_comm(event, comm, now),
            EventKind::Pthread(pth) => self.check_pthread(event, *pth),
        }
    }

    /// Whether a producer id has been satisfied.
    pub fn is_satisfied(&self, producer: ProducerId) -> bool {
        self.progress
            .get(producer.thread.index())
            .copied()
            .flatten()
            .map_or(false, |done| done >= producer.event)
    }

    /// Whether the thread has been started (always true for threads not
    /// created through a handle).
    pub fn is_started(&self, thread: ThreadId) -> bool {
        self.started.get(thread.index()).copied().unwrap_or(false)
    }

    /// Whether the thread has completed its trace.
    pub fn is_completed(&self, thread: ThreadId) -> bool {
        self.completed.get(thread.index()).copied().unwrap_or(false)
    }

    /// Current mutex holder.
    pub fn mutex_holder(&self, address: u64) -> Option<ThreadId> {
        self.mutexes.get(&address).and_then(|l| l.holder)
    }

    /// Current spinlock holder.
    pub fn spin_holder(&self, address: u64) -> Option<ThreadId> {
        self.spins.get(&address).and_then(|l| l.holder)
    }

    /// Threads that have arrived at a barrier and are still waiting.
    pub fn barrier_arrivals(&self, address: u64) -> &[ThreadId] {
        self.barriers.get(&address).map_or(&[], |b| b.arrived.as_slice())
    }

    /// Producer ids with registered waiters.
    pub fn pending_producers(&self) -> usize {
        self.comm_waiters.len()
    }

    /// Round-trip statistics recorded so far.
    pub fn rtt(&self) -> &RttStats {
        &self.rtt
    }

    /// Barrier releases so far.
    pub fn barrier_releases(&self) -> u64 {
        self.barrier_releases
    }

    /// Mutex hand-offs so far.
    pub fn lock_handoffs(&self) -> u64 {
        self.lock_handoffs
    }

    /// Threads made eligible since the last call, in release order.
    pub fn take_wakeups(&mut self) -> Vec<ThreadId> {
        std::mem::take(&mut self.wakeups)
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// Record that `producer` completed at `now`, releasing communication
    /// waiters on it and on every earlier event of the same thread.
    pub fn mark_satisfied(&mut self, producer: ProducerId, now: Cycle) {
        let Some(slot) = self.progress.get_mut(producer.thread.index()) else {
            return;
        };
        *slot = Some(producer.event);

        let lo = ProducerId::new(producer.thread, EventId(0));
        let ready: Vec<ProducerId> = self.comm_waiters.range(lo..=producer).map(|(id, _)| *id).collect();
        let mut released = Vec::new();
        for id in ready {
            let Some(waiters) = self.comm_waiters.remove(&id) else {
                continue;
            };
            for waiter in waiters {
                let cycles = now.saturating_sub(waiter.triggered_at);
                self.rtt.record(producer.thread, waiter.consumer, cycles);
                trace!(producer = %id, consumer = %waiter.consumer, cycles, "Dependency satisfied");
                let pending = &mut self.pending[waiter.consumer.index()];
                *pending = pending.saturating_sub(1);
                if *pending == 0 {
                    released.push((waiter.seq, waiter.consumer));
                }
            }
        }
        released.sort_unstable();
        self.wakeups.extend(released.into_iter().map(|(_, consumer)| consumer));
    }

    /// Record that a thread finished its trace, waking its joiners.
    ///
    /// Fails if consumers still wait on events this thread never produced.
    pub fn thread_completed(&mut self, thread: ThreadId) -> Result<()> {
        if let Some(done) = self.completed.get_mut(thread.index()) {
            *done = true;
        }
        if let Some(joiners) = self.joiners.remove(&thread) {
            self.wakeups.extend(joiners);
        }

        let lo = ProducerId::new(thread, EventId(0));
        let hi = ProducerId::new(thread, EventId(u64::MAX));
        let orphan = self
            .comm_waiters
            .range(lo..=hi)
            .find_map(|(producer, waiters)| waiters.first().map(|w| (*producer, *w)));
        if let Some((producer, waiter)) = orphan {
            return Err(ReplayError::malformed(
                waiter.consumer,
                waiter.line,
                format!(
                    "event {} depends on {} but {} completed without producing it",
                    waiter.event, producer, thread
                ),
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Communication
    // ========================================================================

    fn check_comm(&mut self, event: &Event, comm: &CommEvent, now: Cycle) -> Result<Verdict> {
        let consumer = event.thread;
        if self.pending[consumer.index()] > 0 {
            return Ok(Verdict::Blocked(self.first_unsatisfied(event, comm)?));
        }

        let seq = self.next_wait_seq;
        let mut first = None;
        let mut registered = 0;
        for dep in &comm.dependencies {
            let producer = dep.producer;
            if producer.thread == consumer || self.is_satisfied(producer) {
                continue;
            }
            self.check_producer(event, producer)?;
            // Duplicate references to one producer share a single entry.
            let waiters = self.comm_waiters.entry(producer).or_default();
            if waiters.iter().any(|w| w.consumer == consumer) {
                continue;
            }
            waiters.push(CommWaiter {
                seq,
                consumer,
                event: event.id,
                line: event.line,
                triggered_at: now,
            });
            registered += 1;
            first.get_or_insert(producer);
        }

        match first {
            None => Ok(Verdict::Proceed),
            Some(producer) => {
                self.next_wait_seq += 1;
                self.pending[consumer.index()] = registered;
                debug!(thread = %consumer, event = %event.id, %producer, waits = registered, "Communication blocked");
                Ok(Verdict::Blocked(BlockReason::Dependency { producer }))
            }
        }
    }

    fn first_unsatisfied(&self, event: &Event, comm: &CommEvent) -> Result<BlockReason> {
        comm.dependencies
            .iter()
            .map(|d| d.producer)
            .find(|p| p.thread != event.thread && !self.is_satisfied(*p))
            .map(|producer| BlockReason::Dependency { producer })
            .ok_or_else(|| ReplayError::malformed(event.thread, event.line, "retried while still registered as waiter"))
    }

    fn check_producer(&self, event: &Event, producer: ProducerId) -> Result<()> {
        if producer.thread.index() >= self.progress.len() {
            return Err(ReplayError::malformed(
                event.thread,
                event.line,
                format!("dependency on unknown thread {}", producer.thread),
            ));
        }
        if self.completed[producer.thread.index()] {
            return Err(ReplayError::malformed(
                event.thread,
                event.line,
                format!("dependency on {} which its completed thread never produced", producer),
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Pthread
    // ========================================================================

    fn check_pthread(&mut self, event: &Event, pth: PthreadEvent) -> Result<Verdict> {
        let address = pth.address;
        match pth.op {
            PthreadOp::MutexLock => self.lock(event, address, false),
            PthreadOp::SpinLock => self.lock(event, address, true),
            PthreadOp::MutexUnlock => self.unlock(event, address, false),
            PthreadOp::SpinUnlock => self.unlock(event, address, true),
            PthreadOp::BarrierWait => self.barrier_wait(event, address),
            PthreadOp::ThreadCreate => {
                let target = self.handle_target(event, address)?;
                if self.started[target.index()] {
                    warn!(thread = %event.thread, %target, "Thread created twice");
                } else {
                    self.started[target.index()] = true;
                    self.wakeups.push(target);
                    debug!(thread = %event.thread, %target, "Thread created");
                }
                Ok(Verdict::Proceed)
            }
            PthreadOp::ThreadJoin => {
                let target = self.handle_target(event, address)?;
                if self.completed[target.index()] {
                    return Ok(Verdict::Proceed);
                }
                let joiners = self.joiners.entry(target).or_default();
                if !joiners.contains(&event.thread) {
                    joiners.push(event.thread);
                }
                Ok(Verdict::Blocked(BlockReason::Join { thread: target }))
            }
        }
    }

    fn handle_target(&self, event: &Event, address: u64) -> Result<ThreadId> {
        match self.metadata.created_thread(address) {
            Some(target) if target.index() < self.started.len() => Ok(target),
            Some(target) => Err(ReplayError::malformed(
                event.thread,
                event.line,
                format!("thread handle {:#x} names unknown thread {}", address, target),
            )),
            None => Err(ReplayError::malformed(
                event.thread,
                event.line,
                format!("unknown thread handle {:#x}", address),
            )),
        }
    }

    fn lock(&mut self, event: &Event, address: u64, spin: bool) -> Result<Verdict> {
        let thread = event.thread;
        let table = if spin { &mut self.spins } else { &mut self.mutexes };
        let state = table.entry(address).or_default();

        if state.handed_to == Some(thread) {
            state.handed_to = None;
            return Ok(Verdict::Proceed);
        }
        match state.holder {
            None => {
                state.holder = Some(thread);
                Ok(Verdict::Proceed)
            }
            Some(holder) if holder == thread => Err(ReplayError::LockViolation {
                thread,
                event: event.id,
                address,
                reason: "lock while already holding".to_string(),
            }),
            Some(_) if spin => Ok(Verdict::Blocked(BlockReason::Spin { address })),
            Some(_) => {
                if !state.waiters.contains(&thread) {
                    state.waiters.push_back(thread);
                }
                Ok(Verdict::Blocked(BlockReason::Mutex { address }))
            }
        }
    }

    fn unlock(&mut self, event: &Event, address: u64, spin: bool) -> Result<Verdict> {
        let thread = event.thread;
        let table = if spin { &mut self.spins } else { &mut self.mutexes };
        let Some(state) = table.get_mut(&address).filter(|s| s.holder == Some(thread)) else {
            return Err(ReplayError::LockViolation {
                thread,
                event: event.id,
                address,
                reason: "unlock without holding".to_string(),
            });
        };

        match state.waiters.pop_front() {
            Some(next) => {
                state.holder = Some(next);
                state.handed_to = Some(next);
                self.wakeups.push(next);
                self.lock_handoffs += 1;
                metrics::counter!(metric_defs::LOCK_HANDOFFS.name).increment(1);
                debug!(from = %thread, to = %next, address = format_args!("{:#x}", address), "Mutex handed off");
            }
            None => state.holder = None,
        }
        Ok(Verdict::Proceed)
    }

    fn barrier_wait(&mut self, event: &Event, address: u64) -> Result<Verdict> {
        let thread = event.thread;
        let mismatch = |reason: String| ReplayError::BarrierMismatch {
            thread,
            event: event.id,
            address,
            reason,
        };
        let expected = self
            .metadata
            .barrier_participants(address)
            .ok_or_else(|| mismatch("barrier has no participant entry".to_string()))?;
        if !expected.contains(&thread) {
            return Err(mismatch(format!("{} is not an expected participant", thread)));
        }
        let expected_len = expected.len();

        let state = self.barriers.entry(address).or_default();
        if state.released.remove(&thread) {
            if state.arrived.is_empty() && state.released.is_empty() {
                self.barriers.remove(&address);
            }
            return Ok(Verdict::Proceed);
        }
        if !state.arrived.contains(&thread) {
            state.arrived.push(thread);
        }
        if state.arrived.len() < expected_len {
            return Ok(Verdict::Blocked(BlockReason::Barrier { address }));
        }

        // Every expected participant is here; the last arrival passes now.
        let arrived = std::mem::take(&mut state.arrived);
        for &t in arrived.iter().filter(|&&t| t != thread) {
            state.released.insert(t);
            self.wakeups.push(t);
        }
        if state.released.is_empty() {
            self.barriers.remove(&address);
        }
        self.barrier_releases += 1;
        metrics::counter!(metric_defs::BARRIER_RELEASES.name).increment(1);
        debug!(address = format_args!("{:#x}", address), participants = expected_len, "Barrier released");
        Ok(Verdict::Proceed)
    }
}
