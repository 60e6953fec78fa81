//! Metrics infrastructure for the streplay replay engine.
//!
//! This crate declares every metric the engine emits as a structured [`Metric`]
//! constant and re-exports the `metrics` facade. Without an installed recorder
//! all emission is a no-op, so the engine can emit unconditionally.
//!
//! # Example
//!
//! ```rust
//! use streplay_metrics::{metric_defs, metrics, ReplayLabels};
//!
//! let labels = ReplayLabels::thread(3).with_core(1);
//! metrics::counter!(metric_defs::EVENTS_COMPLETED.name, labels.to_labels().as_slice()).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

impl MetricKind {
    /// Returns the kind as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// ```rust
/// use streplay_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const STALLS: Metric = Metric::counter("streplay.thread.stalls")
///     .with_description("Thread stalls")
///     .with_unit(Unit::Count)
///     .with_labels(&["thread", "reason"]);
///
/// assert_eq!(STALLS.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name.
    pub name: &'static str,
    /// The kind of metric.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// The unit of measurement, if any.
    pub unit: Option<Unit>,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new counter metric.
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    /// Creates a new gauge metric.
    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    /// Creates a new histogram metric.
    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    /// Sets the description.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => describe_counter!(self.name, unit, self.description),
            (MetricKind::Counter, None) => describe_counter!(self.name, self.description),
            (MetricKind::Gauge, Some(unit)) => describe_gauge!(self.name, unit, self.description),
            (MetricKind::Gauge, None) => describe_gauge!(self.name, self.description),
            (MetricKind::Histogram, Some(unit)) => describe_histogram!(self.name, unit, self.description),
            (MetricKind::Histogram, None) => describe_histogram!(self.name, self.description),
        }
    }
}

/// All metric definitions emitted by the replay engine.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Thread Progress
    // ========================================================================

    /// Trace events completed.
    ///
    /// Labels: thread, kind (compute, comm, pthread)
    pub const EVENTS_COMPLETED: Metric = Metric::counter("streplay.events.completed")
        .with_description("Trace events completed")
        .with_unit(Unit::Count)
        .with_labels(&["thread", "kind"]);

    /// Times a thread could not execute its next event.
    ///
    /// Labels: thread, reason (one of [`STALL_REASONS`])
    pub const THREAD_STALLS: Metric = Metric::counter("streplay.thread.stalls")
        .with_description("Times a thread blocked on synchronization")
        .with_unit(Unit::Count)
        .with_labels(&["thread", "reason"]);

    /// Values of the `reason` label on [`THREAD_STALLS`].
    pub const STALL_REASONS: &[&str] = &["dependency", "mutex", "spin", "barrier", "join"];

    /// Threads that have completed their trace.
    pub const THREADS_COMPLETED: Metric = Metric::gauge("streplay.threads.completed")
        .with_description("Threads that have completed their trace")
        .with_unit(Unit::Count);

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Thread swaps performed by a core.
    ///
    /// Labels: core
    pub const CORE_SWAPS: Metric = Metric::counter("streplay.core.swaps")
        .with_description("Stalled threads swapped off a core")
        .with_unit(Unit::Count)
        .with_labels(&["core"]);

    // ========================================================================
    // Memory
    // ========================================================================

    /// Requests submitted to the memory subsystem.
    ///
    /// Labels: core, sharing (local, shared), op (read, write)
    pub const MEMORY_REQUESTS: Metric = Metric::counter("streplay.memory.requests")
        .with_description("Requests submitted to the memory subsystem")
        .with_unit(Unit::Count)
        .with_labels(&["core", "sharing", "op"]);

    /// Round-trip latency of memory subsystem requests, in cycles.
    pub const MEMORY_LATENCY: Metric = Metric::histogram("streplay.memory.latency_cycles")
        .with_description("Memory subsystem request latency in cycles");

    // ========================================================================
    // Synchronization
    // ========================================================================

    /// Cycles between a communication trigger and its satisfaction.
    ///
    /// Labels: producer, consumer
    pub const COMM_RTT: Metric = Metric::histogram("streplay.comm.rtt_cycles")
        .with_description("Cycles between a communication trigger and its satisfaction")
        .with_labels(&["producer", "consumer"]);

    /// Mutex hand-offs to a queued waiter.
    pub const LOCK_HANDOFFS: Metric = Metric::counter("streplay.lock.handoffs")
        .with_description("Mutexes handed directly to a queued waiter")
        .with_unit(Unit::Count);

    /// Barrier releases.
    pub const BARRIER_RELEASES: Metric = Metric::counter("streplay.barrier.releases")
        .with_description("Barrier releases")
        .with_unit(Unit::Count);

    /// Returns a slice of all defined metrics.
    pub const ALL: &[&Metric] = &[
        &EVENTS_COMPLETED,
        &THREAD_STALLS,
        &THREADS_COMPLETED,
        &CORE_SWAPS,
        &MEMORY_REQUESTS,
        &MEMORY_LATENCY,
        &COMM_RTT,
        &LOCK_HANDOFFS,
        &BARRIER_RELEASES,
    ];
}

/// Labels identifying the thread and core a metric refers to.
#[derive(Debug, Clone, Default)]
pub struct ReplayLabels {
    /// Simulated thread id.
    pub thread: Option<u32>,
    /// Simulated core id.
    pub core: Option<u32>,
}

impl ReplayLabels {
    /// Labels for a thread.
    pub fn thread(thread: u32) -> Self {
        Self {
            thread: Some(thread),
            core: None,
        }
    }

    /// Labels for a core.
    pub fn core(core: u32) -> Self {
        Self {
            thread: None,
            core: Some(core),
        }
    }

    /// Adds the core label.
    pub fn with_core(mut self, core: u32) -> Self {
        self.core = Some(core);
        self
    }

    /// Converts to the `metrics` crate label format.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        let mut labels = Vec::with_capacity(2);
        if let Some(thread) = self.thread {
            labels.push(("thread", thread.to_string()));
        }
        if let Some(core) = self.core {
            labels.push(("core", core.to_string()));
        }
        labels
    }

    /// Returns labels with additional key-value pairs.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Describes all metrics. Call once after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
