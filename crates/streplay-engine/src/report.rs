//! End-of-run report.

use std::fmt;

use serde::Serialize;
use streplay_trace::ThreadId;

use crate::rtt::RttHistogram;
use crate::{CoreId, Cycle};

/// Why the replay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every thread replayed its whole trace.
    Completed,
    /// The configured event limit was reached.
    EventLimit,
    /// Still running when the report was taken.
    InProgress,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Completed => f.write_str("all threads completed"),
            StopReason::EventLimit => f.write_str("event limit reached"),
            StopReason::InProgress => f.write_str("in progress"),
        }
    }
}

/// Per-thread totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadReport {
    pub thread: ThreadId,
    pub core: CoreId,
    pub events: u64,
    pub compute_events: u64,
    pub comm_events: u64,
    pub pthread_events: u64,
    /// Times the thread blocked on synchronization.
    pub stalls: u64,
    pub completed_at: Option<Cycle>,
}

/// Per-core totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreReport {
    pub core: CoreId,
    pub active_cycles: Cycle,
    pub idle_cycles: Cycle,
    /// Stalled threads swapped off this core.
    pub swaps: u64,
}

/// RTT histogram of one (producer, consumer) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RttEntry {
    pub producer: ThreadId,
    pub consumer: ThreadId,
    pub histogram: RttHistogram,
}

/// Everything a replay run reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub final_cycle: Cycle,
    pub stop_reason: StopReason,
    pub threads: Vec<ThreadReport>,
    /// Threads in the order they completed.
    pub completion_order: Vec<ThreadId>,
    pub cores: Vec<CoreReport>,
    pub rtt: Vec<RttEntry>,
    pub barrier_releases: u64,
    pub lock_handoffs: u64,
    pub memory_requests: u64,
    pub local_accesses: u64,
    pub shared_accesses: u64,
}

impl Report {
    /// Events completed across all threads.
    pub fn total_events(&self) -> u64 {
        self.threads.iter().map(|t| t.events).sum()
    }

    /// RTT samples across all pairs.
    pub fn total_rtt_samples(&self) -> u64 {
        self.rtt.iter().map(|e| e.histogram.samples).sum()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Replay Report ===")?;
        writeln!(f, "Final cycle: {}", self.final_cycle)?;
        writeln!(f, "Stopped: {}", self.stop_reason)?;
        writeln!(f, "Events: {}", self.total_events())?;
        writeln!(
            f,
            "Memory: {} requests ({} local, {} shared accesses)",
            self.memory_requests, self.local_accesses, self.shared_accesses
        )?;
        writeln!(f, "Barrier releases: {}, lock hand-offs: {}", self.barrier_releases, self.lock_handoffs)?;

        writeln!(f)?;
        writeln!(f, "--- Threads ---")?;
        writeln!(
            f,
            "{:<8} {:<6} {:>10} {:>10} {:>8} {:>8} {:>8} {:>12}",
            "thread", "core", "events", "compute", "comm", "pthread", "stalls", "done_at"
        )?;
        for t in &self.threads {
            let done = t.completed_at.map_or_else(|| "-".to_string(), |c| c.to_string());
            writeln!(
                f,
                "{:<8} {:<6} {:>10} {:>10} {:>8} {:>8} {:>8} {:>12}",
                t.thread.to_string(),
                t.core.to_string(),
                t.events,
                t.compute_events,
                t.comm_events,
                t.pthread_events,
                t.stalls,
                done
            )?;
        }
        let order: Vec<String> = self.completion_order.iter().map(|t| t.to_string()).collect();
        writeln!(f, "Completion order: {}", order.join(" "))?;

        writeln!(f)?;
        writeln!(f, "--- Cores ---")?;
        writeln!(f, "{:<6} {:>14} {:>14} {:>8}", "core", "active", "idle", "swaps")?;
        for c in &self.cores {
            writeln!(
                f,
                "{:<6} {:>14} {:>14} {:>8}",
                c.core.to_string(),
                c.active_cycles,
                c.idle_cycles,
                c.swaps
            )?;
        }

        writeln!(f)?;
        writeln!(f, "--- Communication RTT ---")?;
        if self.rtt.is_empty() {
            writeln!(f, "(no samples)")?;
        }
        for entry in &self.rtt {
            let h = &entry.histogram;
            writeln!(
                f,
                "{} -> {}: {} samples, mean {:.1}, max {} cycles",
                entry.producer,
                entry.consumer,
                h.samples,
                h.mean(),
                h.max_cycles
            )?;
            for (i, count) in h.bins.iter().enumerate().filter(|(_, n)| **n > 0) {
                let lo = i as u64 * h.bin_width;
                if i + 1 == h.bins.len() {
                    writeln!(f, "  [{:>8}, +inf) {}", lo, count)?;
                } else {
                    writeln!(f, "  [{:>8}, {:>8}) {}", lo, lo + h.bin_width, count)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Report {
        let mut histogram = RttHistogram::new(10, 3);
        histogram.bins = vec![0, 1, 1];
        histogram.samples = 2;
        histogram.total_cycles = 55;
        histogram.max_cycles = 40;
        Report {
            final_cycle: 120,
            stop_reason: StopReason::Completed,
            threads: vec![ThreadReport {
                thread: ThreadId(0),
                core: CoreId(0),
                events: 3,
                compute_events: 2,
                comm_events: 1,
                pthread_events: 0,
                stalls: 1,
                completed_at: Some(118),
            }],
            completion_order: vec![ThreadId(0)],
            cores: vec![CoreReport {
                core: CoreId(0),
                active_cycles: 100,
                idle_cycles: 20,
                swaps: 0,
            }],
            rtt: vec![RttEntry {
                producer: ThreadId(1),
                consumer: ThreadId(0),
                histogram,
            }],
            barrier_releases: 0,
            lock_handoffs: 0,
            memory_requests: 4,
            local_accesses: 3,
            shared_accesses: 1,
        }
    }

    #[test]
    fn test_display_sections() {
        let text = sample().to_string();
        assert!(text.contains("Final cycle: 120"));
        assert!(text.contains("T1 -> T0: 2 samples"));
        assert!(text.contains("[      20, +inf) 1"), "{}", text);
        assert!(text.contains("Completion order: T0"));
    }

    #[test]
    fn test_serializes_to_json() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["stop_reason"], "completed");
        assert_eq!(json["threads"][0]["thread"], 0);
        assert_eq!(json["rtt"][0]["histogram"]["bins"][2], 1);
    }

    #[test]
    fn test_totals() {
        let report = sample();
        assert_eq!(report.total_events(), 3);
        assert_eq!(report.total_rtt_samples(), 2);
    }
}
