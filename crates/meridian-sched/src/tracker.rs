//! Per-(map, phase) claim and completion counters.
//!
//! Claiming is a single `fetch_add` on the active phase's `scheduled`
//! counter; an index at or past `total` means the phase is fully handed out.
//! The worker whose completion brings `completed` to `total` advances the
//! map's cursor under the signal mutex and wakes every waiter, so phase N's
//! effects happen-before any item of phase N+1 is claimed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use meridian_core::id::HostMapId;

use crate::error::SchedulerError;
use crate::plan::{PhaseKind, WorkPlan};

#[derive(Debug)]
struct PhaseTracker {
    kind: PhaseKind,
    total: usize,
    scheduled: AtomicUsize,
    completed: AtomicUsize,
}

/// What a completion did to the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// More items of the phase are outstanding.
    Item,
    /// The phase finished and the next one is claimable.
    PhaseAdvanced,
    /// The last phase finished.
    MapDone,
}

#[derive(Debug)]
pub struct MapTracker {
    map: HostMapId,
    /// Non-empty phases only.
    phases: Vec<PhaseTracker>,
    cursor: AtomicUsize,
    signal: Mutex<()>,
    advanced: Condvar,
}

impl MapTracker {
    /// Build a fresh tracker. Phases with no items are dropped here so the
    /// cursor never stops on them.
    pub fn new(plan: &WorkPlan) -> Self {
        let phases = plan
            .phases
            .iter()
            .filter(|p| p.work.item_count() > 0)
            .map(|p| PhaseTracker {
                kind: p.kind,
                total: p.work.item_count(),
                scheduled: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            })
            .collect();
        Self {
            map: plan.map,
            phases,
            cursor: AtomicUsize::new(0),
            signal: Mutex::new(()),
            advanced: Condvar::new(),
        }
    }

    pub fn map(&self) -> HostMapId {
        self.map
    }

    pub fn phase_count(&self) -> usize {
        self.phases.len()
    }

    pub fn phase_kind(&self, phase_index: usize) -> Option<PhaseKind> {
        self.phases.get(phase_index).map(|p| p.kind)
    }

    pub fn phase_total(&self, phase_index: usize) -> Option<usize> {
        self.phases.get(phase_index).map(|p| p.total)
    }

    /// Index of the active phase; `phase_count()` once done.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.cursor() >= self.phases.len()
    }

    /// Items not yet completed in the active and later phases.
    pub fn outstanding(&self) -> usize {
        let cursor = self.cursor();
        self.phases
            .iter()
            .skip(cursor)
            .map(|p| p.total.saturating_sub(p.completed.load(Ordering::Relaxed)))
            .sum()
    }

    /// Claim the next item of the active phase as `(phase_index, item)`.
    pub fn try_claim(&self) -> Option<(usize, usize)> {
        let index = self.cursor();
        let phase = self.phases.get(index)?;
        // Cheap check first so exhausted phases don't keep inflating the
        // counter.
        if phase.scheduled.load(Ordering::Relaxed) >= phase.total {
            return None;
        }
        let item = phase.scheduled.fetch_add(1, Ordering::AcqRel);
        (item < phase.total).then_some((index, item))
    }

    /// Record one completed item of `phase_index`.
    pub fn complete(&self, phase_index: usize) -> Result<Progress, SchedulerError> {
        let Some(phase) = self.phases.get(phase_index) else {
            return Err(SchedulerError::UnknownPhase {
                map: self.map,
                phase_index,
            });
        };
        let current = self.cursor();
        if current != phase_index {
            return Err(SchedulerError::PhaseOutOfOrder {
                map: self.map,
                phase_index,
                current,
            });
        }

        let completed = phase.completed.fetch_add(1, Ordering::AcqRel) + 1;
        if completed > phase.total {
            return Err(SchedulerError::CompletionOverflow {
                map: self.map,
                phase: phase.kind,
                phase_index,
                completed,
                total: phase.total,
            });
        }
        if completed < phase.total {
            return Ok(Progress::Item);
        }

        let next = phase_index + 1;
        {
            let _guard = self.signal.lock();
            self.cursor.store(next, Ordering::Release);
            self.advanced.notify_all();
        }
        tracing::trace!(map = %self.map, phase = phase.kind.name(), "phase complete");
        Ok(if next == self.phases.len() {
            Progress::MapDone
        } else {
            Progress::PhaseAdvanced
        })
    }

    /// Sleep until the cursor moves past `seen` or `timeout` elapses.
    ///
    /// The cursor is only advanced while holding the signal mutex, so a
    /// change between the caller's read and this call is never missed.
    pub fn wait_for_advance(&self, seen: usize, timeout: Duration) {
        let mut guard = self.signal.lock();
        if self.cursor.load(Ordering::Acquire) != seen {
            return;
        }
        let _ = self.advanced.wait_for(&mut guard, timeout);
    }

    /// Wake every waiter without advancing (used on abort).
    pub fn wake_all(&self) {
        let _guard = self.signal.lock();
        self.advanced.notify_all();
    }
}
