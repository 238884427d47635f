//! Bounded per-lane buffer for distinguished points awaiting transmission.
//!
//! One producer (the walker thread) pushes, one consumer (the merge
//! client) drains. Push never blocks: a full buffer rejects the incoming
//! record and counts it. Overflow policy is **drop-newest** — the
//! committed prefix keeps its insertion order untouched, the counter
//! tells the operator to raise the capacity or lower the DP rate, and
//! every dropped point is rediscoverable by continued walking.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use wallaby_core::dp::DpRecord;

/// Backpressure signal: the buffer is at capacity and the record was not
/// queued. Recoverable by design — count it, report it, keep walking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("distinguished-point buffer is full")]
pub struct Overflow;

pub struct DpBuffer {
    queue: Mutex<VecDeque<DpRecord>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl DpBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "a zero-capacity buffer cannot hold anything");
        DpBuffer {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Non-blocking push. `Err(Overflow)` means the record was dropped
    /// and counted.
    pub fn push(&self, record: DpRecord) -> Result<(), Overflow> {
        let mut queue = self.lock();
        if queue.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(Overflow);
        }
        queue.push_back(record);
        Ok(())
    }

    /// Take everything currently queued, in insertion order. Atomic with
    /// respect to concurrent pushes — a drain never observes a partially
    /// constructed record and never loses a racing push (the push either
    /// lands in this drain or in the next one). The buffer is immediately
    /// reusable.
    pub fn drain(&self) -> Vec<DpRecord> {
        let mut queue = self.lock();
        queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records rejected by overflow since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<DpRecord>> {
        // A poisoned lock still guards a structurally intact queue;
        // records are plain data.
        self.queue.lock().unwrap_or_else(|p| p.into_inner())
    }
}
