//! The replay engine: per-core scheduling driven by external ticks.
//!
//! Each thread is pinned to core `thread % num_cores`. A core runs one thread
//! at a time; when that thread stalls on synchronization the core swaps to the
//! next runnable thread in its round-robin ready queue. Threads woken by the
//! [`DependencyResolver`] rejoin the back of their core's queue in release
//! order, which keeps the whole replay deterministic.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use streplay_metrics::{metric_defs, metrics, ReplayLabels};
use streplay_trace::{open_trace, EventId, EventSource, EventWindow, PthreadMetadata, ThreadId};
use tracing::{debug, info, trace};

use crate::config::ReplayConfig;
use crate::deadlock::DeadlockDetector;
use crate::error::ReplayError;
use crate::memory::{MemRequest, MemoryPort, RequestId};
use crate::report::{CoreReport, Report, RttEntry, StopReason, ThreadReport};
use crate::resolver::{BlockReason, DependencyResolver, Verdict};
use crate::rtt::RttStats;
use crate::subevent::{decompose, MemAccess, SubEvent};
use crate::thread::{ActiveEvent, ThreadContext, ThreadState};
use crate::timing::{AccessPlan, TimingModel};
use crate::{CoreId, Cycle, Result};

/// One completed event, recorded when `record_timeline` is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    pub thread: ThreadId,
    pub event: EventId,
    pub kind: &'static str,
    pub core: CoreId,
    pub started_at: Cycle,
    pub completed_at: Cycle,
}

/// Per-core scheduling state.
#[derive(Debug)]
struct CoreState {
    id: CoreId,
    /// Threads pinned to this core.
    mapped: Vec<ThreadId>,
    /// Runnable threads waiting for the core, round-robin.
    ready: VecDeque<ThreadId>,
    current: Option<ThreadId>,
    busy_until: Cycle,
    waiting_on: Option<RequestId>,
    last_tick: Option<Cycle>,
    was_active: bool,
    active_cycles: Cycle,
    idle_cycles: Cycle,
    swaps: u64,
}

impl CoreState {
    fn new(id: CoreId) -> Self {
        CoreState {
            id,
            mapped: Vec::new(),
            ready: VecDeque::new(),
            current: None,
            busy_until: 0,
            waiting_on: None,
            last_tick: None,
            was_active: false,
            active_cycles: 0,
            idle_cycles: 0,
            swaps: 0,
        }
    }

    /// Charge the time since the previous tick to active or idle.
    fn account(&mut self, now: Cycle) {
        if let Some(last) = self.last_tick {
            let elapsed = now.saturating_sub(last);
            if self.was_active {
                self.active_cycles += elapsed;
            } else {
                self.idle_cycles += elapsed;
            }
        }
        self.last_tick = Some(now);
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    core: CoreId,
    issued_at: Cycle,
}

/// Outcome of running a thread for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    /// The core is busy for this many cycles.
    Busy(Cycle),
    /// The core waits on a memory request.
    Waiting,
    /// The thread stalled or is spinning; try another.
    Yield,
    /// The thread completed its trace.
    Finished,
    /// The replay reached its event limit.
    Stopped,
}

enum Start {
    Started,
    Blocked(BlockReason),
    Drained,
}

/// Synchronization-aware multi-core trace replay engine.
pub struct Engine {
    config: ReplayConfig,
    threads: Vec<ThreadContext>,
    cores: Vec<CoreState>,
    resolver: DependencyResolver,
    timing: TimingModel,
    deadlock: DeadlockDetector,
    in_flight: HashMap<RequestId, InFlight>,
    next_request: u64,
    memory_requests: u64,
    completed_events: u64,
    completion_order: Vec<ThreadId>,
    stop: Option<StopReason>,
    now: Cycle,
    timeline: Vec<TimelineEntry>,
}

impl Engine {
    /// Build an engine over one event source per thread, in thread order.
    pub fn new(config: ReplayConfig, metadata: PthreadMetadata, sources: Vec<Box<dyn EventSource>>) -> Result<Self> {
        config.validate()?;
        let num_threads = config.num_threads as usize;
        let num_cores = config.num_cores as usize;
        if sources.len() != num_threads {
            return Err(ReplayError::Config(format!(
                "expected {} event sources, got {}",
                num_threads,
                sources.len()
            )));
        }

        for (address, participants) in metadata.barriers() {
            if let Some(stranger) = participants.iter().find(|t| t.index() >= num_threads) {
                return Err(ReplayError::Config(format!(
                    "barrier {:#x} expects {} but only {} threads are traced",
                    address, stranger, num_threads
                )));
            }
        }

        let resolver = DependencyResolver::new(
            num_threads,
            metadata,
            RttStats::new(config.rtt_bin_width, config.rtt_bins),
        );
        let mut cores: Vec<CoreState> = (0..num_cores).map(|c| CoreState::new(CoreId(c as u32))).collect();
        let mut threads = Vec::with_capacity(num_threads);
        for (index, source) in sources.into_iter().enumerate() {
            let id = ThreadId(index as u32);
            if source.thread() != id {
                return Err(ReplayError::Config(format!(
                    "event source {} belongs to {}, expected {}",
                    index,
                    source.thread(),
                    id
                )));
            }
            let home = CoreId((index % num_cores) as u32);
            let started = resolver.is_started(id);
            let core = &mut cores[home.index()];
            core.mapped.push(id);
            if started {
                core.ready.push_back(id);
            }
            let window = EventWindow::new(source, config.window_low_water, config.window_high_water);
            threads.push(ThreadContext::new(id, home, window, started));
        }

        info!(
            threads = num_threads,
            cores = num_cores,
            local_access = ?config.local_access,
            cache_model = ?config.cache.model,
            "Replay engine initialized"
        );

        Ok(Engine {
            timing: TimingModel::new(&config),
            deadlock: DeadlockDetector::new(num_cores, config.deadlock_threshold),
            config,
            threads,
            cores,
            resolver,
            in_flight: HashMap::new(),
            next_request: 0,
            memory_requests: 0,
            completed_events: 0,
            completion_order: Vec::new(),
            stop: None,
            now: 0,
            timeline: Vec::new(),
        })
    }

    /// Open the traces and pthread metadata in `config.event_dir`.
    pub fn from_config(config: &ReplayConfig) -> Result<Self> {
        let metadata = PthreadMetadata::load(&config.event_dir)?;
        let mut sources: Vec<Box<dyn EventSource>> = Vec::with_capacity(config.num_threads as usize);
        for t in 0..config.num_threads {
            sources.push(Box::new(open_trace(&config.event_dir, ThreadId(t))?));
        }
        Engine::new(config.clone(), metadata, sources)
    }

    // ========================================================================
    // Host interface
    // ========================================================================

    /// Run one scheduling step for `core` at `now`.
    ///
    /// Returns the number of cycles until the core wants its next tick, at
    /// least 1. Idle cores and cores waiting on memory ask to be woken after
    /// `wake_frequency` cycles.
    pub fn tick<M: MemoryPort + ?Sized>(&mut self, core: CoreId, now: Cycle, memory: &mut M) -> Result<Cycle> {
        let index = core.index();
        if index >= self.cores.len() {
            return Err(ReplayError::UnknownCore(core));
        }
        self.now = self.now.max(now);
        self.cores[index].account(now);
        let wake = self.config.wake_frequency;

        if self.stop.is_some() {
            self.cores[index].was_active = false;
            return Ok(wake);
        }
        self.check_deadlock(now)?;

        let state = &self.cores[index];
        if state.waiting_on.is_some() {
            return Ok(wake);
        }
        if state.busy_until > now {
            return Ok(state.busy_until - now);
        }

        let delay = self.step(core, now, memory)?;
        let state = &mut self.cores[index];
        state.was_active = state.current.is_some() || state.waiting_on.is_some();
        Ok(delay.max(1))
    }

    /// Deliver the completion of a memory request. Returns the core that
    /// issued it so the host can wake it.
    pub fn complete_memory(&mut self, request: RequestId, now: Cycle) -> Result<CoreId> {
        let flight = self
            .in_flight
            .remove(&request)
            .ok_or(ReplayError::UnknownRequest(request))?;
        let core = &mut self.cores[flight.core.index()];
        if core.waiting_on == Some(request) {
            core.waiting_on = None;
        }
        self.deadlock.record_progress(flight.core, now);
        metrics::histogram!(metric_defs::MEMORY_LATENCY.name).record(now.saturating_sub(flight.issued_at) as f64);
        trace!(%request, core = %flight.core, latency = now.saturating_sub(flight.issued_at), "Memory completed");
        Ok(flight.core)
    }

    /// Whether the replay has stopped (all threads done or event limit hit).
    pub fn is_finished(&self) -> bool {
        self.stop.is_some()
    }

    /// Why the replay stopped, if it has.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    /// Number of simulated cores.
    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }

    /// Active configuration.
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Scheduling state of a thread.
    pub fn thread_state(&self, thread: ThreadId) -> Option<ThreadState> {
        self.threads.get(thread.index()).map(|t| t.state)
    }

    /// Synchronization state.
    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    /// Memory requests still outstanding.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Completed events in completion order (empty unless `record_timeline`).
    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    /// Snapshot of the run's statistics.
    pub fn report(&self) -> Report {
        let threads = self
            .threads
            .iter()
            .map(|t| ThreadReport {
                thread: t.id,
                core: t.home,
                events: t.counts.total(),
                compute_events: t.counts.compute,
                comm_events: t.counts.comm,
                pthread_events: t.counts.pthread,
                stalls: t.stalls,
                completed_at: t.completed_at,
            })
            .collect();
        let cores = self
            .cores
            .iter()
            .map(|c| CoreReport {
                core: c.id,
                active_cycles: c.active_cycles,
                idle_cycles: c.idle_cycles,
                swaps: c.swaps,
            })
            .collect();
        let rtt = self
            .resolver
            .rtt()
            .iter()
            .map(|(&(producer, consumer), histogram)| RttEntry {
                producer,
                consumer,
                histogram: histogram.clone(),
            })
            .collect();

        Report {
            final_cycle: self.now,
            stop_reason: self.stop.unwrap_or(StopReason::InProgress),
            threads,
            completion_order: self.completion_order.clone(),
            cores,
            rtt,
            barrier_releases: self.resolver.barrier_releases(),
            lock_handoffs: self.resolver.lock_handoffs(),
            memory_requests: self.memory_requests,
            local_accesses: self.timing.local_accesses(),
            shared_accesses: self.timing.shared_accesses(),
        }
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    fn step<M: MemoryPort + ?Sized>(&mut self, core: CoreId, now: Cycle, memory: &mut M) -> Result<Cycle> {
        let wake = self.config.wake_frequency;
        let mut yields = 0;
        loop {
            let Some(thread) = self.select_thread(core) else {
                return Ok(wake);
            };
            match self.run_thread(core, thread, now, memory)? {
                Progress::Busy(cycles) => return Ok(cycles),
                Progress::Waiting | Progress::Stopped => return Ok(wake),
                Progress::Finished => {}
                Progress::Yield => {
                    // Every ready thread has had one attempt this tick.
                    yields += 1;
                    if yields > self.cores[core.index()].ready.len() {
                        return Ok(wake);
                    }
                }
            }
        }
    }

    /// The core's current thread, or the next runnable one from its queue.
    fn select_thread(&mut self, core: CoreId) -> Option<ThreadId> {
        let state = &mut self.cores[core.index()];
        if let Some(current) = state.current {
            return Some(current);
        }
        while let Some(next) = state.ready.pop_front() {
            if self.threads[next.index()].state.is_runnable() {
                state.current = Some(next);
                trace!(%core, thread = %next, "Thread scheduled");
                return Some(next);
            }
        }
        None
    }

    fn run_thread<M: MemoryPort + ?Sized>(
        &mut self,
        core: CoreId,
        thread: ThreadId,
        now: Cycle,
        memory: &mut M,
    ) -> Result<Progress> {
        loop {
            let next = self.threads[thread.index()].active.as_mut().map(|a| a.subs.next());
            match next {
                Some(Some(SubEvent::Compute { iops, flops })) => {
                    let cycles = self.timing.compute_cycles(iops, flops);
                    if cycles > 0 {
                        return Ok(self.busy(core, now, cycles));
                    }
                }
                Some(Some(SubEvent::Memory(access))) => match self.timing.plan_access(thread, &access) {
                    AccessPlan::Estimate { cycles: 0 } => {}
                    AccessPlan::Estimate { cycles } => return Ok(self.busy(core, now, cycles)),
                    AccessPlan::Issue { shared, cache_cycles } => {
                        self.issue(core, thread, access, shared, cache_cycles, now, memory);
                        return Ok(Progress::Waiting);
                    }
                },
                Some(None) => {
                    self.complete_event(core, thread, now)?;
                    if self.stop.is_some() {
                        return Ok(Progress::Stopped);
                    }
                }
                None => match self.start_next(core, thread, now)? {
                    Start::Started => {}
                    Start::Blocked(reason) => {
                        self.stall(core, thread, reason);
                        return Ok(Progress::Yield);
                    }
                    Start::Drained => {
                        self.finish_thread(core, thread, now)?;
                        return Ok(Progress::Finished);
                    }
                },
            }
        }
    }

    fn busy(&mut self, core: CoreId, now: Cycle, cycles: Cycle) -> Progress {
        let until = now.saturating_add(cycles);
        self.cores[core.index()].busy_until = until;
        // The core is guaranteed to progress when the burst ends.
        self.deadlock.record_progress(core, until);
        Progress::Busy(cycles)
    }

    #[allow(clippy::too_many_arguments)]
    fn issue<M: MemoryPort + ?Sized>(
        &mut self,
        core: CoreId,
        thread: ThreadId,
        access: MemAccess,
        shared: bool,
        cache_cycles: Cycle,
        now: Cycle,
        memory: &mut M,
    ) {
        let id = RequestId(self.next_request);
        self.next_request += 1;
        self.memory_requests += 1;
        memory.submit(MemRequest {
            id,
            core,
            thread,
            op: access.op,
            address: access.address,
            size: access.size,
            shared,
            cache_cycles,
            issued_at: now,
        });
        self.in_flight.insert(id, InFlight { core, issued_at: now });
        self.cores[core.index()].waiting_on = Some(id);
        self.deadlock.record_progress(core, now);

        let labels = ReplayLabels::core(core.0).with(&[
            ("sharing", if shared { "shared" } else { "local" }.to_string()),
            ("op", access.op.as_str().to_string()),
        ]);
        metrics::counter!(metric_defs::MEMORY_REQUESTS.name, &labels).increment(1);
        trace!(%thread, %core, request = %id, address = access.address, size = access.size, shared, cache_cycles, "Memory issued");
    }

    fn start_next(&mut self, core: CoreId, thread: ThreadId, now: Cycle) -> Result<Start> {
        let ctx = &mut self.threads[thread.index()];
        let Some(event) = ctx.window.peek()? else {
            return Ok(Start::Drained);
        };
        let verdict = self.resolver.can_execute(event, now)?;
        self.apply_wakeups();

        if let Verdict::Blocked(reason) = verdict {
            return Ok(Start::Blocked(reason));
        }

        let ctx = &mut self.threads[thread.index()];
        let event = ctx.window.pop()?;
        if ctx.last_completed.is_some_and(|last| event.id <= last) {
            return Err(ReplayError::malformed(thread, event.line, "event ids out of order"));
        }
        ctx.state = ThreadState::Running;
        ctx.active = Some(ActiveEvent {
            producer: event.producer_id(),
            line: event.line,
            kind: event.kind.name(),
            subs: decompose(&event.kind, self.config.max_request_size),
            started_at: now,
        });
        self.deadlock.record_progress(core, now);
        trace!(%thread, %core, event = %event.id, kind = event.kind.name(), "Event started");
        Ok(Start::Started)
    }

    fn complete_event(&mut self, core: CoreId, thread: ThreadId, now: Cycle) -> Result<()> {
        let ctx = &mut self.threads[thread.index()];
        let Some(active) = ctx.active.take() else {
            return Ok(());
        };
        ctx.last_completed = Some(active.producer.event);
        ctx.counts.bump(active.kind);

        self.resolver.mark_satisfied(active.producer, now);
        self.apply_wakeups();
        self.deadlock.record_progress(core, now);
        self.completed_events += 1;

        let labels = ReplayLabels::thread(thread.0).with(&[("kind", active.kind.to_string())]);
        metrics::counter!(metric_defs::EVENTS_COMPLETED.name, &labels).increment(1);
        trace!(%thread, event = %active.producer.event, line = active.line, "Event completed");

        if self.config.record_timeline {
            self.timeline.push(TimelineEntry {
                thread,
                event: active.producer.event,
                kind: active.kind,
                core,
                started_at: active.started_at,
                completed_at: now,
            });
        }
        if let Some(limit) = self.config.max_events {
            if self.completed_events >= limit {
                info!(events = self.completed_events, cycle = now, "Event limit reached");
                self.stop = Some(StopReason::EventLimit);
            }
        }
        Ok(())
    }

    fn stall(&mut self, core: CoreId, thread: ThreadId, reason: BlockReason) {
        let ctx = &mut self.threads[thread.index()];
        let fresh = ctx.state != ThreadState::Stalled(reason);
        ctx.state = ThreadState::Stalled(reason);
        if fresh {
            ctx.stalls += 1;
            let labels = ReplayLabels::thread(thread.0).with(&[("reason", reason.as_str().to_string())]);
            metrics::counter!(metric_defs::THREAD_STALLS.name, &labels).increment(1);
        }

        let state = &mut self.cores[core.index()];
        state.current = None;
        if let BlockReason::Spin { .. } = reason {
            state.ready.push_back(thread);
            return;
        }
        state.swaps += 1;
        let labels = ReplayLabels::core(core.0).to_labels();
        metrics::counter!(metric_defs::CORE_SWAPS.name, &labels).increment(1);
        debug!(%thread, %core, %reason, "Thread stalled, swapping");
    }

    fn finish_thread(&mut self, core: CoreId, thread: ThreadId, now: Cycle) -> Result<()> {
        let ctx = &mut self.threads[thread.index()];
        ctx.state = ThreadState::Completed;
        ctx.completed_at = Some(now);
        let events = ctx.counts.total();
        self.cores[core.index()].current = None;
        self.completion_order.push(thread);

        self.resolver.thread_completed(thread)?;
        self.apply_wakeups();
        self.deadlock.record_progress(core, now);

        metrics::gauge!(metric_defs::THREADS_COMPLETED.name).set(self.completion_order.len() as f64);
        debug!(%thread, %core, events, cycle = now, "Thread completed");

        if self.completion_order.len() == self.threads.len() {
            info!(cycle = now, events = self.completed_events, "All threads completed");
            self.stop = Some(StopReason::Completed);
        }
        Ok(())
    }

    /// Return threads released by the resolver to their cores' ready queues.
    fn apply_wakeups(&mut self) {
        for thread in self.resolver.take_wakeups() {
            let Some(ctx) = self.threads.get_mut(thread.index()) else {
                continue;
            };
            if ctx.state.is_runnable() || !ctx.state.is_live() {
                continue;
            }
            ctx.state = ThreadState::Running;
            self.cores[ctx.home.index()].ready.push_back(thread);
            trace!(%thread, core = %ctx.home, "Thread woken");
        }
    }

    // ========================================================================
    // Deadlock detection
    // ========================================================================

    fn check_deadlock(&self, now: Cycle) -> Result<()> {
        if !self.deadlock.is_stalled_since(self.deadlock.earliest_progress(), now) {
            return Ok(());
        }
        let mut running = Vec::new();
        let mut unstarted = Vec::new();
        for core in &self.cores {
            let mut live = core
                .mapped
                .iter()
                .map(|t| self.threads[t.index()].state)
                .filter(ThreadState::is_live)
                .peekable();
            if live.peek().is_none() {
                continue;
            }
            if live.all(|s| s == ThreadState::NotStarted) {
                unstarted.push(core.id);
            } else {
                running.push(core.id);
            }
        }

        let mut stalled = self.deadlock.stalled_cores(now, running);
        // A core holding only uncreated threads progresses with the machine.
        if self.deadlock.is_stalled_since(self.deadlock.latest_progress(), now) {
            stalled.extend(unstarted);
            stalled.sort_unstable();
        }
        if stalled.is_empty() {
            return Ok(());
        }
        Err(ReplayError::Deadlock {
            time: now,
            details: self.describe_blocked(&stalled),
            cores: stalled,
        })
    }

    fn describe_blocked(&self, cores: &[CoreId]) -> String {
        let mut parts = Vec::new();
        for &core in cores {
            for &thread in &self.cores[core.index()].mapped {
                let state = self.threads[thread.index()].state;
                if !state.is_live() {
                    continue;
                }
                let extra = match state {
                    ThreadState::Stalled(BlockReason::Mutex { address }) => self
                        .resolver
                        .mutex_holder(address)
                        .map(|h| format!(" held by {}", h)),
                    ThreadState::Stalled(BlockReason::Spin { address }) => self
                        .resolver
                        .spin_holder(address)
                        .map(|h| format!(" held by {}", h)),
                    ThreadState::Stalled(BlockReason::Barrier { address }) => {
                        Some(format!(" ({} arrived)", self.resolver.barrier_arrivals(address).len()))
                    }
                    _ => None,
                };
                parts.push(format!("{} on {}: {}{}", thread, core, state, extra.unwrap_or_default()));
            }
        }
        parts.join("; ")
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("now", &self.now)
            .field("threads", &self.threads)
            .field("cores", &self.cores)
            .field("completed_events", &self.completed_events)
            .field("stop", &self.stop)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FixedLatencyMemory;
    use std::io::Cursor;
    use streplay_trace::TraceReader;

    fn engine(config: ReplayConfig, metadata: PthreadMetadata, traces: &[&str]) -> Engine {
        let sources = traces
            .iter()
            .enumerate()
            .map(|(t, text)| {
                Box::new(TraceReader::new(ThreadId(t as u32), Cursor::new(text.to_string()))) as Box<dyn EventSource>
            })
            .collect();
        Engine::new(config, metadata, sources).unwrap()
    }

    #[test]
    fn test_source_count_must_match() {
        let config = ReplayConfig {
            num_threads: 2,
            ..ReplayConfig::default()
        };
        let sources: Vec<Box<dyn EventSource>> =
            vec![Box::new(TraceReader::new(ThreadId(0), Cursor::new(String::new())))];
        let err = Engine::new(config, PthreadMetadata::default(), sources).unwrap_err();
        assert!(matches!(err, ReplayError::Config(_)));
    }

    #[test]
    fn test_barrier_participant_must_be_traced() {
        let metadata = PthreadMetadata::default().with_barrier(0x10, [ThreadId(0), ThreadId(5)]);
        let sources: Vec<Box<dyn EventSource>> =
            vec![Box::new(TraceReader::new(ThreadId(0), Cursor::new(String::new())))];
        let err = Engine::new(ReplayConfig::default(), metadata, sources).unwrap_err();
        assert!(matches!(err, ReplayError::Config(_)), "{:?}", err);
        assert!(err.to_string().contains("T5"), "{}", err);
    }

    #[test]
    fn test_compute_burst_occupies_core() {
        let mut e = engine(ReplayConfig::default(), PthreadMetadata::default(), &["1,0,10,2,0,0\n"]);
        let mut mem = FixedLatencyMemory::new(20);
        assert_eq!(e.tick(CoreId(0), 0, &mut mem).unwrap(), 14);
        assert_eq!(e.tick(CoreId(0), 5, &mut mem).unwrap(), 9, "still busy");
        assert!(!e.is_finished());
        e.tick(CoreId(0), 14, &mut mem).unwrap();
        assert!(e.is_finished());
        assert_eq!(e.thread_state(ThreadId(0)), Some(ThreadState::Completed));
        assert_eq!(e.report().threads[0].completed_at, Some(14));
    }

    #[test]
    fn test_memory_wait_and_completion() {
        let mut e = engine(ReplayConfig::default(), PthreadMetadata::default(), &["1,0,0,0,0,1 $ 0x40 0x47\n"]);
        let mut mem = FixedLatencyMemory::new(20);
        assert_eq!(e.tick(CoreId(0), 0, &mut mem).unwrap(), 1);
        assert_eq!(e.in_flight(), 1);
        assert_eq!(e.tick(CoreId(0), 1, &mut mem).unwrap(), 1, "waiting on memory");

        // 13 cycles of expected cache cost on top of the fixed latency.
        assert!(mem.pop_ready(32).is_none());
        let (at, id) = mem.pop_ready(33).unwrap();
        assert_eq!(at, 33);
        assert_eq!(e.complete_memory(id, at).unwrap(), CoreId(0));
        assert!(matches!(e.complete_memory(id, at), Err(ReplayError::UnknownRequest(_))));
        e.tick(CoreId(0), 33, &mut mem).unwrap();
        assert!(e.is_finished());
        assert_eq!(e.report().memory_requests, 1);
    }

    #[test]
    fn test_unknown_core() {
        let mut e = engine(ReplayConfig::default(), PthreadMetadata::default(), &[""]);
        let mut mem = FixedLatencyMemory::new(1);
        assert!(matches!(e.tick(CoreId(4), 0, &mut mem), Err(ReplayError::UnknownCore(CoreId(4)))));
    }

    #[test]
    fn test_stalled_thread_is_swapped_for_sibling() {
        // T0 and T2 share core 0; T1 holds the lock on core 1.
        let config = ReplayConfig {
            num_cores: 2,
            num_threads: 3,
            ..ReplayConfig::default()
        };
        let mut e = engine(
            config,
            PthreadMetadata::default(),
            &[
                "1,0,pth_ty:1^0x1000\n2,0,pth_ty:2^0x1000\n",
                "1,1,pth_ty:1^0x1000\n2,1,100,0,0,0\n3,1,pth_ty:2^0x1000\n",
                "1,2,5,0,0,0\n",
            ],
        );
        let mut mem = FixedLatencyMemory::new(1);
        assert_eq!(e.tick(CoreId(1), 0, &mut mem).unwrap(), 100);
        assert_eq!(e.tick(CoreId(0), 0, &mut mem).unwrap(), 5, "T0 stalls, T2 runs");
        assert_eq!(
            e.thread_state(ThreadId(0)),
            Some(ThreadState::Stalled(BlockReason::Mutex { address: 0x1000 }))
        );
        assert_eq!(e.report().cores[0].swaps, 1);
    }

    #[test]
    fn test_event_limit_stops_replay() {
        let config = ReplayConfig {
            max_events: Some(2),
            ..ReplayConfig::default()
        };
        let mut e = engine(config, PthreadMetadata::default(), &["1,0,1,0,0,0\n2,0,1,0,0,0\n3,0,1,0,0,0\n"]);
        let mut mem = FixedLatencyMemory::new(1);
        let mut now = 0;
        while !e.is_finished() {
            now += e.tick(CoreId(0), now, &mut mem).unwrap();
        }
        assert_eq!(e.stop_reason(), Some(StopReason::EventLimit));
        assert_eq!(e.report().total_events(), 2);
    }
}
