//! Bounded per-thread lookahead of decoded events.
//!
//! The window holds at most `high_water` events. When occupancy drops below
//! `low_water` it pulls one batch from its [`EventSource`] that tops it back up
//! to `high_water`, so memory per thread stays bounded for arbitrarily long
//! traces and the number of source reads is `O(events / batch)`.

use std::collections::VecDeque;

use tracing::trace;

use crate::error::TraceError;
use crate::event::{Event, ThreadId};
use crate::reader::EventSource;
use crate::Result;

/// Default refill threshold.
pub const DEFAULT_LOW_WATER: usize = 100;

/// Default window capacity.
pub const DEFAULT_HIGH_WATER: usize = 1000;

/// FIFO of parsed-but-not-executed events for one thread.
pub struct EventWindow<S> {
    source: S,
    buffer: VecDeque<Event>,
    low_water: usize,
    high_water: usize,
    refills: u64,
    consumed: u64,
}

impl<S: EventSource> EventWindow<S> {
    /// Create a window over `source`. `high_water` is raised to at least
    /// `low_water` and 1.
    pub fn new(source: S, low_water: usize, high_water: usize) -> Self {
        let high_water = high_water.max(low_water).max(1);
        EventWindow {
            source,
            buffer: VecDeque::with_capacity(high_water),
            low_water,
            high_water,
            refills: 0,
            consumed: 0,
        }
    }

    /// Thread whose events this window holds.
    pub fn thread(&self) -> ThreadId {
        self.source.thread()
    }

    /// Oldest unconsumed event, or `None` once both the window and the stream
    /// are exhausted.
    pub fn peek(&mut self) -> Result<Option<&Event>> {
        self.top_up()?;
        Ok(self.buffer.front())
    }

    /// Remove and return the oldest event.
    pub fn pop(&mut self) -> Result<Event> {
        self.top_up()?;
        let event = self.buffer.pop_front().ok_or(TraceError::ExhaustedWindow {
            thread: self.source.thread(),
            line: self.source.line(),
        })?;
        self.consumed += 1;
        Ok(event)
    }

    /// Whether the window and its stream are both empty.
    pub fn is_drained(&self) -> bool {
        self.buffer.is_empty() && self.source.is_exhausted()
    }

    /// Events currently buffered.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether no events are buffered (the stream may still have more).
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of batches pulled from the source.
    pub fn refills(&self) -> u64 {
        self.refills
    }

    /// Events popped so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Window capacity.
    pub fn capacity(&self) -> usize {
        self.high_water
    }

    fn top_up(&mut self) -> Result<()> {
        if self.buffer.len() >= self.low_water.max(1) || self.source.is_exhausted() {
            return Ok(());
        }
        let want = self.high_water - self.buffer.len();
        let batch = self.source.read_batch(want)?;
        trace!(
            thread = %self.source.thread(),
            fetched = batch.len(),
            buffered = self.buffer.len(),
            "window refill"
        );
        self.refills += 1;
        self.buffer.extend(batch);
        Ok(())
    }
}
