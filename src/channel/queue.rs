//! Timestamp-ordered merge of a channel's two log streams.

use crate::tail::Stream;
use chrono::NaiveDateTime;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard};

/// Whether queued lines may be consumed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Lines accumulate until the primary stream has been opened.
    Buffering,
    Live,
}

/// A completed log line waiting to be applied.
#[derive(Debug, Clone)]
pub struct QueuedLine {
    pub timestamp: NaiveDateTime,
    pub origin: Stream,
    pub text: String,
    seq: u64,
}

impl QueuedLine {
    /// Arrival order within the queue, used to break timestamp ties.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl PartialEq for QueuedLine {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedLine {}

impl PartialOrd for QueuedLine {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedLine {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then(self.seq.cmp(&other.seq))
    }
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    heap: BinaryHeap<Reverse<QueuedLine>>,
    next_seq: u64,
    dropped: u64,
}

/// Per-channel priority queue shared between the watcher thread and the
/// consumer loop.
#[derive(Debug)]
pub struct EventQueue {
    inner: Mutex<Inner>,
    buffer_limit: usize,
}

impl EventQueue {
    /// Creates a queue in the buffering phase.
    ///
    /// While buffering, at most `buffer_limit` lines are held; the oldest are
    /// dropped beyond that.
    pub fn new(buffer_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Buffering,
                heap: BinaryHeap::new(),
                next_seq: 0,
                dropped: 0,
            }),
            buffer_limit: buffer_limit.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking producer leaves the heap itself intact
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, timestamp: NaiveDateTime, origin: Stream, text: impl Into<String>) {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        if inner.phase == Phase::Buffering && inner.heap.len() >= self.buffer_limit {
            inner.heap.pop();
            inner.dropped += 1;
            if inner.dropped == 1 {
                tracing::warn!(
                    limit = self.buffer_limit,
                    "Buffered log lines exceed limit, dropping oldest"
                );
            }
        }

        inner.heap.push(Reverse(QueuedLine {
            timestamp,
            origin,
            text: text.into(),
            seq,
        }));
    }

    /// Switches to the live phase. Returns how many buffered lines became
    /// available, or `None` if the queue was already live.
    pub fn go_live(&self) -> Option<usize> {
        let mut inner = self.lock();
        if inner.phase == Phase::Live {
            return None;
        }
        inner.phase = Phase::Live;
        if inner.dropped > 0 {
            tracing::warn!(dropped = inner.dropped, "Lines lost while buffering");
        }
        Some(inner.heap.len())
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn is_live(&self) -> bool {
        self.phase() == Phase::Live
    }

    /// Takes every queued line in timestamp order. Empty while buffering.
    pub fn drain(&self) -> Vec<QueuedLine> {
        let mut inner = self.lock();
        if inner.phase == Phase::Buffering {
            return Vec::new();
        }
        let mut lines = Vec::with_capacity(inner.heap.len());
        while let Some(Reverse(line)) = inner.heap.pop() {
            lines.push(line);
        }
        lines
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
