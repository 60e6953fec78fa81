//! Per-core progress watchdog.
//!
//! Progress is an event starting, a sub-event finishing, or an event
//! completing. A core whose last progress lies more than the threshold in the
//! past while it still has live threads is deadlocked. The threshold must
//! exceed the longest legitimate wait (a long compute burst or a slow memory
//! request), since those are indistinguishable from a hang at this level.

use crate::{CoreId, Cycle};

/// Tracks the last cycle each core made progress.
#[derive(Debug, Clone)]
pub struct DeadlockDetector {
    threshold: Cycle,
    last_progress: Vec<Cycle>,
}

impl DeadlockDetector {
    /// Detector for `num_cores` cores, all considered to progress at cycle 0.
    pub fn new(num_cores: usize, threshold: Cycle) -> Self {
        DeadlockDetector {
            threshold,
            last_progress: vec![0; num_cores],
        }
    }

    /// Configured threshold.
    pub fn threshold(&self) -> Cycle {
        self.threshold
    }

    /// Note progress on `core` at `now`.
    #[inline]
    pub fn record_progress(&mut self, core: CoreId, now: Cycle) {
        if let Some(last) = self.last_progress.get_mut(core.index()) {
            *last = (*last).max(now);
        }
    }

    /// Last progress on `core`.
    pub fn last_progress(&self, core: CoreId) -> Cycle {
        self.last_progress.get(core.index()).copied().unwrap_or(0)
    }

    /// Oldest last-progress across all cores.
    pub fn earliest_progress(&self) -> Cycle {
        self.last_progress.iter().copied().min().unwrap_or(0)
    }

    /// Most recent progress on any core.
    pub fn latest_progress(&self) -> Cycle {
        self.last_progress.iter().copied().max().unwrap_or(0)
    }

    /// Whether progress last seen at `last` lies strictly more than the
    /// threshold before `now`.
    pub fn is_stalled_since(&self, last: Cycle, now: Cycle) -> bool {
        now.saturating_sub(last) > self.threshold
    }

    /// Whether `core` has gone strictly more than the threshold without progress.
    pub fn is_stalled(&self, core: CoreId, now: Cycle) -> bool {
        self.is_stalled_since(self.last_progress(core), now)
    }

    /// Cores among `live` that are stalled at `now`.
    pub fn stalled_cores(&self, now: Cycle, live: impl IntoIterator<Item = CoreId>) -> Vec<CoreId> {
        live.into_iter().filter(|&c| self.is_stalled(c, now)).collect()
    }
}
