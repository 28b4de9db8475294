//! Bounded window of recently seen sequence numbers.
//!
//! The server acknowledges receipt of every CMD packet, so a client that
//! never saw an ACK will retransmit the same sequence. The window lets the
//! receive path recognize those retransmissions and suppress re-execution
//! while still re-sending the ACK.
//!
//! The window is bounded so per-session memory cannot grow without limit.
//! A sequence that has already been evicted is treated as "not recently
//! seen" and the command will run again; with at-least-once delivery this
//! is the accepted trade-off, not a bug. The default capacity (128) is far
//! larger than any realistic retransmission horizon for hand-pressed
//! buttons.

use std::collections::{HashSet, VecDeque};

/// Default number of sequence numbers remembered per session.
pub const DEFAULT_WINDOW_CAPACITY: usize = 128;

/// Fixed-capacity set of recently observed sequence numbers with FIFO
/// eviction.
#[derive(Debug, Clone)]
pub struct SequenceWindow {
    capacity: usize,
    order: VecDeque<u64>,
    members: HashSet<u64>,
}

impl SequenceWindow {
    /// Creates a window remembering at most `capacity` sequence numbers.
    /// A capacity of zero is clamped to one so the window always functions.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Records `sequence` as seen.
    ///
    /// Returns `true` if the sequence was newly inserted, `false` if it was
    /// already present (a duplicate). Inserting at capacity evicts the
    /// oldest remembered sequence.
    pub fn insert(&mut self, sequence: u64) -> bool {
        if !self.members.insert(sequence) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        self.order.push_back(sequence);
        true
    }

    /// Forgets `sequence` as if it had never been seen.
    ///
    /// Returns `true` if the sequence was present. The receive path uses
    /// this when a recorded command could not be handed off for execution,
    /// so the client's retransmission is not mistaken for a duplicate.
    pub fn remove(&mut self, sequence: u64) -> bool {
        if !self.members.remove(&sequence) {
            return false;
        }
        self.order.retain(|seq| *seq != sequence);
        true
    }

    /// Returns `true` if `sequence` is still inside the window.
    pub fn contains(&self, sequence: u64) -> bool {
        self.members.contains(&sequence)
    }

    /// Number of sequences currently remembered.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if no sequences are remembered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The maximum number of sequences this window remembers.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SequenceWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
