//! Round-trip statistics for producer/consumer edges.
//!
//! A round trip is the number of cycles between a consumer first finding a
//! producer unsatisfied and the producer's completion. Samples are binned per
//! ordered (producer thread, consumer thread) pair.

use std::collections::BTreeMap;

use serde::Serialize;
use streplay_metrics::{metric_defs, metrics};
use streplay_trace::ThreadId;

use crate::Cycle;

/// Fixed-width histogram; the last bin absorbs everything beyond the range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RttHistogram {
    /// Width of each bin in cycles.
    pub bin_width: Cycle,
    /// Sample count per bin.
    pub bins: Vec<u64>,
    /// Total samples.
    pub samples: u64,
    /// Sum of all samples, for the mean.
    pub total_cycles: u64,
    /// Largest sample.
    pub max_cycles: Cycle,
}

impl RttHistogram {
    /// Empty histogram with `bins` bins of `bin_width` cycles.
    pub fn new(bin_width: Cycle, bins: usize) -> Self {
        RttHistogram {
            bin_width: bin_width.max(1),
            bins: vec![0; bins.max(1)],
            samples: 0,
            total_cycles: 0,
            max_cycles: 0,
        }
    }

    /// Bin index for a sample.
    pub fn bin_of(&self, cycles: Cycle) -> usize {
        let bin = (cycles / self.bin_width).min(usize::MAX as u64) as usize;
        bin.min(self.bins.len() - 1)
    }

    fn record(&mut self, cycles: Cycle) {
        let bin = self.bin_of(cycles);
        self.bins[bin] += 1;
        self.samples += 1;
        self.total_cycles = self.total_cycles.saturating_add(cycles);
        self.max_cycles = self.max_cycles.max(cycles);
    }

    /// Mean sample, or 0 with no samples.
    pub fn mean(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total_cycles as f64 / self.samples as f64
        }
    }
}

/// Histograms keyed by (producer, consumer).
#[derive(Debug, Clone)]
pub struct RttStats {
    bin_width: Cycle,
    bins: usize,
    pairs: BTreeMap<(ThreadId, ThreadId), RttHistogram>,
}

impl RttStats {
    /// Empty statistics; every histogram gets the same bin layout.
    pub fn new(bin_width: Cycle, bins: usize) -> Self {
        RttStats {
            bin_width,
            bins,
            pairs: BTreeMap::new(),
        }
    }

    /// Add one sample for a pair. Only the resolver records samples.
    pub(crate) fn record(&mut self, producer: ThreadId, consumer: ThreadId, cycles: Cycle) {
        let (bin_width, bins) = (self.bin_width, self.bins);
        self.pairs
            .entry((producer, consumer))
            .or_insert_with(|| RttHistogram::new(bin_width, bins))
            .record(cycles);
        metrics::histogram!(
            metric_defs::COMM_RTT.name,
            "producer" => producer.0.to_string(),
            "consumer" => consumer.0.to_string()
        )
        .record(cycles as f64);
    }

    /// Histogram for one pair.
    pub fn histogram(&self, producer: ThreadId, consumer: ThreadId) -> Option<&RttHistogram> {
        self.pairs.get(&(producer, consumer))
    }

    /// All pairs in (producer, consumer) order.
    pub fn iter(&self) -> impl Iterator<Item = (&(ThreadId, ThreadId), &RttHistogram)> {
        self.pairs.iter()
    }

    /// Samples across all pairs.
    pub fn total_samples(&self) -> u64 {
        self.pairs.values().map(|h| h.samples).sum()
    }
}
