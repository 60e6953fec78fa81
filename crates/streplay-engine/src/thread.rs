//! Per-thread replay state.

use std::fmt;

use streplay_trace::{EventId, EventSource, EventWindow, ProducerId, ThreadId};

use crate::resolver::BlockReason;
use crate::subevent::SubEvents;
use crate::{CoreId, Cycle};

/// Scheduling state of a simulated thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Waiting to be created by another thread.
    NotStarted,
    /// Runnable or running.
    Running,
    /// Waiting on synchronization. Spinning threads stay runnable.
    Stalled(BlockReason),
    /// Trace fully replayed.
    Completed,
}

impl ThreadState {
    /// Whether the scheduler may pick this thread.
    pub fn is_runnable(&self) -> bool {
        matches!(self, ThreadState::Running | ThreadState::Stalled(BlockReason::Spin { .. }))
    }

    /// Whether the thread still has work left.
    pub fn is_live(&self) -> bool {
        !matches!(self, ThreadState::Completed)
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadState::NotStarted => f.write_str("not started"),
            ThreadState::Running => f.write_str("running"),
            ThreadState::Stalled(BlockReason::Spin { address }) => write!(f, "spinning on {:#x}", address),
            ThreadState::Stalled(reason) => write!(f, "stalled on {}", reason),
            ThreadState::Completed => f.write_str("completed"),
        }
    }
}

/// The event a thread is part-way through.
#[derive(Debug)]
pub(crate) struct ActiveEvent {
    pub producer: ProducerId,
    pub line: u64,
    pub kind: &'static str,
    pub subs: SubEvents,
    pub started_at: Cycle,
}

/// Events completed per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EventCounts {
    pub compute: u64,
    pub comm: u64,
    pub pthread: u64,
}

impl EventCounts {
    pub fn bump(&mut self, kind: &str) {
        match kind {
            "compute" => self.compute += 1,
            "comm" => self.comm += 1,
            _ => self.pthread += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.compute + self.comm + self.pthread
    }
}

/// A simulated thread: its lookahead window plus scheduling bookkeeping.
pub(crate) struct ThreadContext {
    pub id: ThreadId,
    pub home: CoreId,
    pub state: ThreadState,
    pub window: EventWindow<Box<dyn EventSource>>,
    pub active: Option<ActiveEvent>,
    pub last_completed: Option<EventId>,
    pub counts: EventCounts,
    pub stalls: u64,
    pub completed_at: Option<Cycle>,
}

impl ThreadContext {
    pub fn new(id: ThreadId, home: CoreId, window: EventWindow<Box<dyn EventSource>>, started: bool) -> Self {
        ThreadContext {
            id,
            home,
            state: if started { ThreadState::Running } else { ThreadState::NotStarted },
            window,
            active: None,
            last_completed: None,
            counts: EventCounts::default(),
            stalls: 0,
            completed_at: None,
        }
    }
}

impl fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadContext")
            .field("id", &self.id)
            .field("home", &self.home)
            .field("state", &self.state)
            .field("buffered", &self.window.len())
            .field("last_completed", &self.last_completed)
            .finish()
    }
}
