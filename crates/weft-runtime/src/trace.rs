#![forbid(unsafe_code)]

//! Scheduler event trace.
//!
//! Records what the scheduler did (roots scheduled, callbacks
//! requested/fired, units begun and completed, commit passes, errors
//! trapped) as a bounded ring of entries with monotonic sequence
//! numbers. Traces serve two purposes:
//!
//! - tests assert ordering properties directly on the event stream
//!   (commit atomicity, mutation-before-lifecycle, callback dedup)
//! - golden comparison: [`SchedTrace::checksum`] gives a stable FNV-1a
//!   hash of the JSONL rendering, so behavioral drift shows up as a
//!   checksum change
//!
//! Sequence numbers are logical, never wall-clock, so traces are
//! deterministic across machines.

use std::collections::VecDeque;

use serde::Serialize;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Which host callback kind an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    /// Next-animation-frame callback.
    Animation,
    /// Idle/deadline callback.
    Deferred,
}

/// One scheduler event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedEvent {
    /// A root entered the scheduled chain (or had its priority raised).
    RootScheduled { root: u32, priority: &'static str },
    /// The scheduler asked the host for a callback.
    CallbackRequested { kind: CallbackKind },
    /// The host re-entered the scheduler through a callback entry point.
    CallbackFired { kind: CallbackKind },
    /// A unit of work began.
    UnitBegan { fiber: u32 },
    /// A fiber finished completing.
    UnitCompleted { fiber: u32 },
    /// A finished tree entered commit.
    CommitStarted { finished: u32, effects: u32 },
    /// The mutation pass acted on a fiber.
    CommitMutation { fiber: u32 },
    /// The lifecycle pass acted on a fiber.
    CommitLifecycle { fiber: u32 },
    /// Commit finished; the tree is now current.
    CommitFinished { finished: u32 },
    /// A user error was pinned to a boundary (`None`: uncaught).
    ErrorTrapped { boundary: Option<u32> },
    /// A boundary was told to absorb an error.
    BoundaryAcknowledged { boundary: u32 },
    /// The scheduled-root chain was dropped after an uncaught error.
    RegistryQuiesced,
}

/// A sequenced trace entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    /// Monotonic sequence number.
    pub seq: u64,
    /// The event itself.
    #[serde(flatten)]
    pub event: SchedEvent,
}

/// Bounded ring of scheduler events.
#[derive(Debug, Clone, Default)]
pub struct SchedTrace {
    entries: VecDeque<TraceEntry>,
    capacity: usize,
    next_seq: u64,
}

impl SchedTrace {
    /// A trace retaining at most `capacity` entries (0 = unbounded).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            next_seq: 0,
        }
    }

    /// Append an event, evicting the oldest entry when full.
    pub fn record(&mut self, event: SchedEvent) {
        if self.capacity != 0 && self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(TraceEntry {
            seq: self.next_seq,
            event,
        });
        self.next_seq += 1;
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total events ever recorded, including evicted ones.
    pub fn recorded(&self) -> u64 {
        self.next_seq
    }

    /// Iterate retained entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter()
    }

    /// Iterate retained events, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &SchedEvent> {
        self.entries.iter().map(|e| &e.event)
    }

    /// Drop every retained entry. Sequence numbers keep counting.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Render retained entries as JSON Lines.
    pub fn to_jsonl(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            // Serialization of these plain enums cannot fail.
            if let Ok(line) = serde_json::to_string(entry) {
                out.push_str(&line);
                out.push('\n');
            }
        }
        out
    }

    /// FNV-1a hash of the JSONL rendering; stable across platforms.
    pub fn checksum(&self) -> u64 {
        let mut hash = FNV_OFFSET;
        for byte in self.to_jsonl().bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }
}
