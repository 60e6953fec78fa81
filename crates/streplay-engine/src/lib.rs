//! # streplay-engine
//!
//! Synchronization-aware multi-core trace replay.
//!
//! The engine interleaves per-thread event traces across a fixed pool of
//! simulated cores. It is driven from outside through a narrow interface:
//!
//! - [`Engine::tick`] runs one scheduling step for a core and returns the delay
//!   until that core wants its next wakeup.
//! - [`MemoryPort`] receives timed memory requests; the host reports their
//!   completion through [`Engine::complete_memory`].
//!
//! [`Driver`] is a self-contained batch harness (binary-heap clock plus a
//! fixed-latency memory) that runs a replay to completion.
//!
//! ## Modules
//!
//! - [`resolver`]: mutexes, spinlocks, barriers, thread create/join and
//!   producer/consumer edges
//! - [`timing`]: compute CPI and the two-level cache model
//! - [`rtt`]: per-pair round-trip histograms
//! - [`deadlock`]: per-core progress watchdog

use std::fmt;

use serde::{Deserialize, Serialize};

mod config;
pub mod deadlock;
mod driver;
mod error;
mod memory;
mod report;
pub mod resolver;
pub mod rtt;
mod scheduler;
mod subevent;
mod thread;
pub mod timing;

pub use config::{CacheConfig, CacheModel, LocalAccessPolicy, ReplayConfig};
pub use deadlock::DeadlockDetector;
pub use driver::Driver;
pub use error::ReplayError;
pub use memory::{FixedLatencyMemory, MemOp, MemRequest, MemoryPort, RequestId};
pub use report::{CoreReport, Report, RttEntry, StopReason, ThreadReport};
pub use resolver::{BlockReason, DependencyResolver, Verdict};
pub use rtt::{RttHistogram, RttStats};
pub use scheduler::{Engine, TimelineEntry};
pub use subevent::{decompose, MemAccess, SubEvent, SubEvents};
pub use thread::ThreadState;
pub use timing::{AccessPlan, TimingModel};

/// Simulated time in cycles.
pub type Cycle = u64;

/// Simulated core identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoreId(pub u32);

impl CoreId {
    /// Index into per-core tables.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// Result type for replay operations.
pub type Result<T> = std::result::Result<T, ReplayError>;
