//! Compute and memory timing model.
//!
//! Compute bursts are charged a fixed cycles-per-operation estimate. Memory
//! accesses are classified as local or shared by tracking which thread last
//! touched each cache line. Shared accesses go through the memory subsystem,
//! which adds its own latency on top of the two-level probabilistic cache
//! estimate. The configured [`LocalAccessPolicy`] decides whether local
//! accesses do the same, pay the estimate alone, or are free.

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use streplay_trace::ThreadId;

use crate::config::{CacheConfig, CacheModel, LocalAccessPolicy, ReplayConfig};
use crate::subevent::MemAccess;
use crate::Cycle;

/// Who has touched a cache line so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineOwner {
    /// Only this thread.
    Private(ThreadId),
    /// More than one thread. Sticky for the rest of the run.
    Shared,
}

/// How the scheduler must carry out one memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPlan {
    /// Submit to the memory subsystem and wait for its completion.
    Issue {
        /// Whether the line is shared between threads.
        shared: bool,
        /// Cache-hierarchy cost the memory subsystem adds to its own latency.
        cache_cycles: Cycle,
    },
    /// Complete locally after `cycles` (0 means immediately).
    Estimate {
        /// Charged cycles.
        cycles: Cycle,
    },
}

/// Cycle estimates for sub-events.
#[derive(Debug)]
pub struct TimingModel {
    cpi_iops: f64,
    cpi_flops: f64,
    cache: CacheConfig,
    line_shift: u32,
    policy: LocalAccessPolicy,
    owners: HashMap<u64, LineOwner>,
    rng: ChaCha8Rng,
    local_accesses: u64,
    shared_accesses: u64,
}

impl TimingModel {
    /// Build a model from the replay configuration.
    pub fn new(config: &ReplayConfig) -> Self {
        TimingModel {
            cpi_iops: config.cpi_iops,
            cpi_flops: config.cpi_flops,
            cache: config.cache.clone(),
            line_shift: config.cache.line_size.max(1).trailing_zeros(),
            policy: config.local_access,
            owners: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            local_accesses: 0,
            shared_accesses: 0,
        }
    }

    /// Cycles for a compute burst: `ceil(iops * cpi_iops + flops * cpi_flops)`,
    /// at least 1 for a non-empty burst.
    pub fn compute_cycles(&self, iops: u64, flops: u64) -> Cycle {
        if iops == 0 && flops == 0 {
            return 0;
        }
        let cycles = (iops as f64 * self.cpi_iops + flops as f64 * self.cpi_flops).ceil();
        (cycles as Cycle).max(1)
    }

    /// Expected cycles of one access under the two-level cache model.
    pub fn expected_access_cycles(&self) -> Cycle {
        let c = &self.cache;
        let expected = c.l1_hit_cycles as f64
            + c.l1_miss_rate * (c.l2_hit_cycles as f64 + c.l2_miss_rate * c.l2_miss_penalty as f64);
        expected.ceil() as Cycle
    }

    /// Cycles of one access: the expected value, or a seeded draw in
    /// sampled mode.
    pub fn access_cycles(&mut self) -> Cycle {
        match self.cache.model {
            CacheModel::Expected => self.expected_access_cycles(),
            CacheModel::Sampled => {
                let c = &self.cache;
                let mut cycles = c.l1_hit_cycles;
                if self.rng.gen::<f64>() < c.l1_miss_rate {
                    cycles = cycles.saturating_add(c.l2_hit_cycles);
                    if self.rng.gen::<f64>() < c.l2_miss_rate {
                        cycles = cycles.saturating_add(c.l2_miss_penalty);
                    }
                }
                cycles
            }
        }
    }

    /// Record `thread` touching the access's line and report whether the
    /// line is now shared.
    pub fn touch(&mut self, thread: ThreadId, access: &MemAccess) -> bool {
        let line = access.address >> self.line_shift;
        let owner = self.owners.entry(line).or_insert(LineOwner::Private(thread));
        if access.shared_hint {
            *owner = LineOwner::Shared;
        } else if let LineOwner::Private(t) = *owner {
            if t != thread {
                *owner = LineOwner::Shared;
            }
        }
        *owner == LineOwner::Shared
    }

    /// Decide how `thread` performs `access`. Issued accesses carry the
    /// cache-model cost so the memory subsystem can charge it.
    pub fn plan_access(&mut self, thread: ThreadId, access: &MemAccess) -> AccessPlan {
        let shared = self.touch(thread, access);
        if shared {
            self.shared_accesses += 1;
            return AccessPlan::Issue {
                shared: true,
                cache_cycles: self.access_cycles(),
            };
        }
        self.local_accesses += 1;
        match self.policy {
            LocalAccessPolicy::Issue => AccessPlan::Issue {
                shared: false,
                cache_cycles: self.access_cycles(),
            },
            LocalAccessPolicy::Estimate => AccessPlan::Estimate {
                cycles: self.access_cycles(),
            },
            LocalAccessPolicy::Skip => AccessPlan::Estimate { cycles: 0 },
        }
    }

    /// Accesses classified local so far.
    pub fn local_accesses(&self) -> u64 {
        self.local_accesses
    }

    /// Accesses classified shared so far.
    pub fn shared_accesses(&self) -> u64 {
        self.shared_accesses
    }
}
