//! Per-session replay buffer
//!
//! A bounded ring of the most recent outbound frames. Event ids are
//! per-session monotonic integers starting at 1, so a reconnecting client's
//! `Last-Event-Id` cursor maps directly onto the ring. When the cursor has
//! fallen off the ring the buffer reports a gap instead of silently skipping
//! frames; the client must re-initialize.

use std::collections::VecDeque;

/// Minimum ring capacity; configs below this are clamped up
pub const MIN_BUFFER_CAPACITY: usize = 64;

/// One buffered outbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFrame {
    /// Monotonic per-session event id (starts at 1)
    pub id: u64,
    /// SSE event name (`message`, `error`, ...)
    pub event: String,
    /// JSON-encoded payload
    pub data: String,
}

/// Bounded ring of recent outbound frames
#[derive(Debug)]
pub struct ReplayBuffer {
    frames: VecDeque<StoredFrame>,
    capacity: usize,
    next_id: u64,
}

impl ReplayBuffer {
    /// Create a buffer; capacities below [`MIN_BUFFER_CAPACITY`] are clamped
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_BUFFER_CAPACITY);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    /// Append a frame, assigning it the next event id; evicts the oldest
    /// frame when the ring is full
    pub fn push(&mut self, event: impl Into<String>, data: impl Into<String>) -> StoredFrame {
        let frame = StoredFrame {
            id: self.next_id,
            event: event.into(),
            data: data.into(),
        };
        self.next_id += 1;
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame.clone());
        frame
    }

    /// Frames with id greater than `last_seen`, in original order
    ///
    /// Returns `None` when the frame immediately after `last_seen` has been
    /// evicted; the caller maps that to `AlreadyDiscarded`.
    pub fn replay_from(&self, last_seen: u64) -> Option<Vec<StoredFrame>> {
        // Nothing newer than the cursor.
        if last_seen + 1 >= self.next_id {
            return Some(Vec::new());
        }
        let oldest = self.frames.front().map_or(self.next_id, |f| f.id);
        if last_seen + 1 < oldest {
            return None;
        }
        Some(
            self.frames
                .iter()
                .filter(|f| f.id > last_seen)
                .cloned()
                .collect(),
        )
    }

    /// Highest event id assigned so far (0 if none)
    pub fn last_id(&self) -> u64 {
        self.next_id - 1
    }

    /// Number of frames currently buffered
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the buffer holds no frames
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
