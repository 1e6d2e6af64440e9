//! Statistics registers shared between concurrently running SubUnits.
//!
//! Everything a SubUnit touches is exclusively its own, except global
//! counters (items produced per kind, energy delivered, ...). Those are
//! updated with atomic adds during the tick and committed into a per-slot
//! [`RingBuffer`] history once the tick has drained.

use std::sync::atomic::{AtomicI64, Ordering};

// ---------------------------------------------------------------------------
// StatRegister
// ---------------------------------------------------------------------------

/// A fixed set of atomic counters indexed by slot.
#[derive(Debug)]
pub struct StatRegister {
    slots: Vec<AtomicI64>,
    history: Vec<RingBuffer>,
}

impl StatRegister {
    /// Create a register with `slot_count` counters, each keeping the last
    /// `history_capacity` committed tick totals.
    pub fn new(slot_count: usize, history_capacity: usize) -> Self {
        Self {
            slots: (0..slot_count).map(|_| AtomicI64::new(0)).collect(),
            history: (0..slot_count)
                .map(|_| RingBuffer::new(history_capacity))
                .collect(),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Add to a slot. Safe to call from any worker. Out-of-range slots are
    /// ignored.
    #[inline]
    pub fn add(&self, slot: usize, amount: i64) {
        if let Some(counter) = self.slots.get(slot) {
            counter.fetch_add(amount, Ordering::Relaxed);
        }
    }

    /// Current (uncommitted) value of a slot.
    pub fn current(&self, slot: usize) -> i64 {
        self.slots
            .get(slot)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Move every slot's current value into its history and reset it.
    ///
    /// Takes `&mut self`: only called between ticks, when no worker holds a
    /// reference.
    pub fn commit(&mut self) {
        for (counter, history) in self.slots.iter_mut().zip(self.history.iter_mut()) {
            let value = std::mem::replace(counter.get_mut(), 0);
            history.push(value);
        }
    }

    pub fn history(&self, slot: usize) -> Option<&RingBuffer> {
        self.history.get(slot)
    }

    /// Sum of the committed history of a slot.
    pub fn windowed_total(&self, slot: usize) -> i64 {
        self.history
            .get(slot)
            .map(|h| h.iter().sum())
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// RingBuffer
// ---------------------------------------------------------------------------

/// A fixed-capacity ring buffer of committed values. Oldest entry is
/// overwritten when full; iterates oldest to newest.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    data: Vec<i64>,
    head: usize,
    len: usize,
}

impl RingBuffer {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            data: vec![0; capacity],
            head: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, value: i64) {
        self.data[self.head] = value;
        self.head = (self.head + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn latest(&self) -> Option<i64> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.head + self.capacity() - 1) % self.capacity();
        Some(self.data[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        let start = if self.len < self.capacity() { 0 } else { self.head };
        (0..self.len).map(move |i| self.data[(start + i) % self.capacity()])
    }
}
