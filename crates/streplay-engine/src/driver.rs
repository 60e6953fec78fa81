//! Batch harness: a host clock and memory subsystem around an [`Engine`].
//!
//! The clock is a binary heap of `(time, core)` wakeups. Memory completions
//! due at or before the next wakeup are delivered first, and the issuing core
//! is woken at the completion time. Each core has at most one live wakeup;
//! superseded heap entries are skipped when popped.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tracing::info;

use crate::config::ReplayConfig;
use crate::memory::FixedLatencyMemory;
use crate::report::Report;
use crate::scheduler::Engine;
use crate::{CoreId, Cycle, Result};

/// Runs an engine to completion against a fixed-latency memory.
#[derive(Debug)]
pub struct Driver {
    engine: Engine,
    memory: FixedLatencyMemory,
    queue: BinaryHeap<Reverse<(Cycle, CoreId)>>,
    scheduled: Vec<Option<Cycle>>,
    now: Cycle,
    ticks: u64,
}

impl Driver {
    /// Wrap `engine`; every core gets its first tick at cycle 0.
    pub fn new(engine: Engine, memory_latency: Cycle) -> Self {
        let cores = engine.num_cores();
        let mut driver = Driver {
            engine,
            memory: FixedLatencyMemory::new(memory_latency),
            queue: BinaryHeap::with_capacity(cores * 2),
            scheduled: vec![None; cores],
            now: 0,
            ticks: 0,
        };
        for c in 0..cores {
            driver.schedule(CoreId(c as u32), 0);
        }
        driver
    }

    /// Open the traces named by `config` and wrap them in a driver.
    pub fn from_config(config: &ReplayConfig) -> Result<Self> {
        let engine = Engine::from_config(config)?;
        Ok(Driver::new(engine, config.memory_latency))
    }

    /// Run until every thread completes or the event limit is reached.
    pub fn run(&mut self) -> Result<Report> {
        while !self.engine.is_finished() {
            let next_tick = self.queue.peek().map(|Reverse((at, _))| *at);
            if let Some(done_at) = self.memory.next_completion() {
                if next_tick.map_or(true, |t| done_at <= t) {
                    if let Some((at, request)) = self.memory.pop_ready(done_at) {
                        self.now = at;
                        let core = self.engine.complete_memory(request, at)?;
                        self.schedule(core, at);
                    }
                    continue;
                }
            }

            let Some(Reverse((at, core))) = self.queue.pop() else {
                break;
            };
            if self.scheduled[core.index()] != Some(at) {
                continue;
            }
            self.scheduled[core.index()] = None;
            self.now = at;
            let delay = self.engine.tick(core, at, &mut self.memory)?;
            self.ticks += 1;
            self.schedule(core, at.saturating_add(delay));
        }

        let report = self.engine.report();
        info!(
            cycle = self.now,
            ticks = self.ticks,
            events = report.total_events(),
            stop = %report.stop_reason,
            "Replay finished"
        );
        Ok(report)
    }

    /// Schedule a tick unless an earlier one is already pending.
    fn schedule(&mut self, core: CoreId, at: Cycle) {
        let slot = &mut self.scheduled[core.index()];
        if slot.map_or(true, |pending| at < pending) {
            *slot = Some(at);
            self.queue.push(Reverse((at, core)));
        }
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Time of the last tick or completion.
    pub fn now(&self) -> Cycle {
        self.now
    }

    /// Ticks delivered so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}
