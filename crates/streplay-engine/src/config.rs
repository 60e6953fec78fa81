//! Replay configuration.
//!
//! Every field has a default, so a YAML file only needs to name what it
//! changes:
//!
//! ```yaml
//! num_cores: 4
//! num_threads: 8
//! event_dir: traces/fft
//! cache:
//!   l1_miss_rate: 0.3
//! local_access: estimate
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use streplay_trace::{DEFAULT_HIGH_WATER, DEFAULT_LOW_WATER};

use crate::error::ReplayError;
use crate::{Cycle, Result};

/// How the cache model turns a memory access into cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheModel {
    /// Deterministic expected value of the two-level model.
    #[default]
    Expected,
    /// Per-access hit/miss draws from a seeded RNG.
    Sampled,
}

/// What happens to accesses to lines no other thread has touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalAccessPolicy {
    /// Submit to the memory subsystem like shared accesses.
    #[default]
    Issue,
    /// Charge the cache-model estimate without contacting the memory subsystem.
    Estimate,
    /// Charge nothing.
    Skip,
}

/// Two-level probabilistic cache parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// L1 hit latency.
    pub l1_hit_cycles: Cycle,
    /// Probability an access misses L1.
    pub l1_miss_rate: f64,
    /// L2 hit latency, paid on an L1 miss.
    pub l2_hit_cycles: Cycle,
    /// Probability an L1 miss also misses L2.
    pub l2_miss_rate: f64,
    /// Extra latency of an L2 miss.
    pub l2_miss_penalty: Cycle,
    /// Line size used to decide whether an address is shared. Power of two.
    pub line_size: u64,
    /// Expected-value or sampled model.
    pub model: CacheModel,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            l1_hit_cycles: 3,
            l1_miss_rate: 0.5,
            l2_hit_cycles: 10,
            l2_miss_rate: 0.1,
            l2_miss_penalty: 100,
            line_size: 64,
            model: CacheModel::Expected,
        }
    }
}

/// Full replay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Simulated cores.
    pub num_cores: u32,
    /// Simulated threads; traces `0..num_threads` must exist.
    pub num_threads: u32,
    /// Directory holding the per-thread traces and pthread metadata.
    pub event_dir: PathBuf,
    /// Directory the runner writes reports into.
    pub output_dir: PathBuf,
    /// Event window refill threshold.
    pub window_low_water: usize,
    /// Event window capacity.
    pub window_high_water: usize,
    /// Cycles without progress on a live core before declaring deadlock.
    pub deadlock_threshold: Cycle,
    /// Cycles between wakeups of an idle or waiting core.
    pub wake_frequency: Cycle,
    /// Stop after this many completed events across all threads.
    pub max_events: Option<u64>,
    /// Cycles per integer operation.
    pub cpi_iops: f64,
    /// Cycles per floating-point operation.
    pub cpi_flops: f64,
    /// Largest single memory request in bytes.
    pub max_request_size: u32,
    /// Cache model parameters.
    pub cache: CacheConfig,
    /// Treatment of thread-local accesses.
    pub local_access: LocalAccessPolicy,
    /// Width of one RTT histogram bin, in cycles.
    pub rtt_bin_width: Cycle,
    /// Number of RTT histogram bins; the last bin absorbs the tail.
    pub rtt_bins: usize,
    /// Latency of the batch driver's memory subsystem.
    pub memory_latency: Cycle,
    /// Seed for the sampled cache model.
    pub seed: u64,
    /// Keep a per-event completion timeline (tests and debugging).
    pub record_timeline: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        ReplayConfig {
            num_cores: 1,
            num_threads: 1,
            event_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            window_low_water: DEFAULT_LOW_WATER,
            window_high_water: DEFAULT_HIGH_WATER,
            deadlock_threshold: 500_000,
            wake_frequency: 1,
            max_events: None,
            cpi_iops: 1.0,
            cpi_flops: 2.0,
            max_request_size: 8,
            cache: CacheConfig::default(),
            local_access: LocalAccessPolicy::Issue,
            rtt_bin_width: 10,
            rtt_bins: 100,
            memory_latency: 20,
            seed: 0,
            record_timeline: false,
        }
    }
}

impl ReplayConfig {
    /// Check that the configuration is internally consistent.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(ReplayError::Config(msg));
        if self.num_cores == 0 {
            return fail("num_cores must be at least 1".into());
        }
        if self.num_threads == 0 {
            return fail("num_threads must be at least 1".into());
        }
        if self.window_high_water == 0 {
            return fail("window_high_water must be at least 1".into());
        }
        if self.window_low_water > self.window_high_water {
            return fail(format!(
                "window_low_water ({}) exceeds window_high_water ({})",
                self.window_low_water, self.window_high_water
            ));
        }
        if self.wake_frequency == 0 {
            return fail("wake_frequency must be at least 1".into());
        }
        if self.deadlock_threshold == 0 {
            return fail("deadlock_threshold must be at least 1".into());
        }
        if self.max_request_size == 0 {
            return fail("max_request_size must be at least 1".into());
        }
        if self.rtt_bin_width == 0 || self.rtt_bins == 0 {
            return fail("rtt_bin_width and rtt_bins must be at least 1".into());
        }
        if !(self.cpi_iops >= 0.0 && self.cpi_flops >= 0.0) {
            return fail("CPI values must be non-negative".into());
        }
        for (name, rate) in [("l1_miss_rate", self.cache.l1_miss_rate), ("l2_miss_rate", self.cache.l2_miss_rate)] {
            if !(0.0..=1.0).contains(&rate) {
                return fail(format!("{} must be within [0, 1], got {}", name, rate));
            }
        }
        if !self.cache.line_size.is_power_of_two() {
            return fail(format!("cache line_size must be a power of two, got {}", self.cache.line_size));
        }
        Ok(())
    }
}
