//! Pthread metadata recorded alongside the event traces.
//!
//! The file `sigil.pthread.out` maps thread-handle addresses to the threads
//! they create and lists each barrier's participants:
//!
//! ```text
//! ##0x7ffd1000,1
//! ##0x7ffd1008,2
//! **0x601040,0,1,2
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::debug;

use crate::codec::parse_number;
use crate::error::TraceError;
use crate::event::ThreadId;
use crate::Result;

/// Name of the metadata file inside the event directory.
pub const PTHREAD_FILE: &str = "sigil.pthread.out";

const CREATE_PREFIX: &str = "##";
const BARRIER_PREFIX: &str = "**";

/// Thread-creation handles and barrier participant sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PthreadMetadata {
    handles: HashMap<u64, ThreadId>,
    barriers: HashMap<u64, BTreeSet<ThreadId>>,
}

impl PthreadMetadata {
    /// Load metadata from `dir`. A missing file yields empty metadata.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(PTHREAD_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "no pthread metadata");
            return Ok(Self::default());
        }
        let file = File::open(&path).map_err(TraceError::MetadataIo)?;
        Self::parse(BufReader::new(file))
    }

    /// Parse metadata lines from `input`.
    pub fn parse<R: BufRead>(input: R) -> Result<Self> {
        let mut meta = Self::default();
        for (idx, line) in input.lines().enumerate() {
            let line_no = idx as u64 + 1;
            let line = line.map_err(TraceError::MetadataIo)?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let malformed = |reason: &str| TraceError::MalformedMetadata {
                line: line_no,
                reason: format!("{}: {:?}", reason, line),
            };

            if let Some(body) = line.strip_prefix(CREATE_PREFIX) {
                let (address, thread) = body.split_once(',').ok_or_else(|| malformed("expected address,thread"))?;
                let address = parse_number(address).ok_or_else(|| malformed("invalid handle address"))?;
                let thread = parse_thread(thread).ok_or_else(|| malformed("invalid thread id"))?;
                meta.handles.insert(address, thread);
            } else if let Some(body) = line.strip_prefix(BARRIER_PREFIX) {
                let mut fields = body.split(',');
                let address = fields
                    .next()
                    .and_then(parse_number)
                    .ok_or_else(|| malformed("invalid barrier address"))?;
                let mut participants = BTreeSet::new();
                for field in fields {
                    participants.insert(parse_thread(field).ok_or_else(|| malformed("invalid thread id"))?);
                }
                if participants.is_empty() {
                    return Err(malformed("barrier without participants"));
                }
                meta.barriers.entry(address).or_default().extend(participants);
            } else {
                return Err(malformed("unrecognized metadata line"));
            }
        }
        Ok(meta)
    }

    /// Register a thread-creation handle.
    pub fn with_handle(mut self, address: u64, thread: ThreadId) -> Self {
        self.handles.insert(address, thread);
        self
    }

    /// Register a barrier and its participants.
    pub fn with_barrier(mut self, address: u64, participants: impl IntoIterator<Item = ThreadId>) -> Self {
        self.barriers.entry(address).or_default().extend(participants);
        self
    }

    /// Thread created through handle `address`.
    pub fn created_thread(&self, address: u64) -> Option<ThreadId> {
        self.handles.get(&address).copied()
    }

    /// Whether `thread` is started by some thread-create rather than at time zero.
    pub fn is_spawned(&self, thread: ThreadId) -> bool {
        self.handles.values().any(|&t| t == thread)
    }

    /// Expected participants of barrier `address`.
    pub fn barrier_participants(&self, address: u64) -> Option<&BTreeSet<ThreadId>> {
        self.barriers.get(&address)
    }

    /// Every barrier with its participants, ordered by address.
    pub fn barriers(&self) -> Vec<(u64, &BTreeSet<ThreadId>)> {
        let mut barriers: Vec<_> = self.barriers.iter().map(|(&a, p)| (a, p)).collect();
        barriers.sort_unstable_by_key(|&(address, _)| address);
        barriers
    }
}

fn parse_thread(text: &str) -> Option<ThreadId> {
    parse_number(text).and_then(|n| u32::try_from(n).ok()).map(ThreadId)
}
